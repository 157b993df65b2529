// SPDX-License-Identifier: Apache-2.0

//! ACME certificate acquisition with an on-disk PEM cache.
//!
//! One certificate pair per host lives under the cert directory as
//! `{host}.crt` / `{host}.key`. Acquisition is coalesced per host so
//! two simultaneous handshakes for a new name order exactly once.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, LetsEncrypt,
    NewAccount, NewOrder, OrderStatus,
};
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell, RwLock};
use tracing::{debug, info, warn};

/// Certificates within this many days of expiry are re-acquired.
pub const RENEWAL_WINDOW_DAYS: i64 = 30;
/// File name holding the ACME account credentials inside the cert dir.
const ACCOUNT_FILE: &str = "account.json";

/// Errors from certificate acquisition, parsing, and cache maintenance.
#[derive(Debug, Error)]
pub enum CertError {
    #[error("host {0} is not covered by the configured domains")]
    HostNotAllowed(String),

    #[error("client hello carried no server name")]
    MissingServerName,

    #[error("acme order for {host} failed: {message}")]
    Acme { host: String, message: String },

    #[error("bad certificate material for {host}: {message}")]
    Parse { host: String, message: String },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Certificate manager settings derived from the TLS configuration.
#[derive(Debug, Clone)]
pub struct CertConfig {
    pub email: String,
    pub cert_dir: PathBuf,
    pub staging: bool,
    pub domains: Vec<String>,
}

/// Metadata for one cached certificate, read back from disk.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CertInfo {
    pub host: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub expired: bool,
    pub path: PathBuf,
}

#[derive(Clone)]
struct CachedCert {
    key: Arc<CertifiedKey>,
    not_after: DateTime<Utc>,
}

/// Acquires, caches, and renews certificates for whitelisted hosts.
pub struct CertManager {
    config: CertConfig,
    cache: RwLock<HashMap<String, CachedCert>>,
    orders: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    challenges: std::sync::RwLock<HashMap<String, String>>,
    account: OnceCell<Account>,
    #[cfg(test)]
    stub: Option<OrderStub>,
}

/// Test seam replacing real ACME orders with delayed local issuance.
#[cfg(test)]
struct OrderStub {
    delay: Duration,
    issued: std::sync::atomic::AtomicUsize,
}

impl CertManager {
    pub fn new(config: CertConfig) -> io::Result<Self> {
        std::fs::create_dir_all(&config.cert_dir)?;
        Ok(CertManager {
            config,
            cache: RwLock::new(HashMap::new()),
            orders: Mutex::new(HashMap::new()),
            challenges: std::sync::RwLock::new(HashMap::new()),
            account: OnceCell::new(),
            #[cfg(test)]
            stub: None,
        })
    }

    /// Returns whether an SNI host is covered by the configured domains,
    /// either exactly or as a subdomain.
    pub fn host_allowed(&self, host: &str) -> bool {
        let host = normalize_sni(host);
        self.config.domains.iter().any(|domain| {
            let domain = domain.to_ascii_lowercase();
            host == domain || host.ends_with(&format!(".{domain}"))
        })
    }

    /// Returns a cached or freshly ordered certificate for an SNI host.
    ///
    /// At most one ACME order is in flight per host; concurrent callers
    /// for the same name wait on the host guard and then find the cache
    /// warm. Cancelling one waiter leaves the others intact.
    pub async fn get_certificate(&self, sni: &str) -> Result<Arc<CertifiedKey>, CertError> {
        let host = normalize_sni(sni);
        if host.is_empty() {
            return Err(CertError::MissingServerName);
        }
        if !self.host_allowed(&host) {
            return Err(CertError::HostNotAllowed(host));
        }

        if let Some(cached) = self.cache.read().await.get(&host) {
            if !needs_renewal(cached.not_after) {
                return Ok(Arc::clone(&cached.key));
            }
        }

        let guard = {
            let mut orders = self.orders.lock().await;
            Arc::clone(orders.entry(host.clone()).or_default())
        };
        let _in_flight = guard.lock().await;

        // A sibling may have finished the order while we waited.
        if let Some(cached) = self.cache.read().await.get(&host) {
            if !needs_renewal(cached.not_after) {
                return Ok(Arc::clone(&cached.key));
            }
        }

        if let Some(cached) = self.load_from_disk(&host) {
            if !needs_renewal(cached.not_after) {
                let key = Arc::clone(&cached.key);
                self.cache.write().await.insert(host, cached);
                return Ok(key);
            }
        }

        let cached = self.order_certificate(&host).await?;
        let key = Arc::clone(&cached.key);
        self.cache.write().await.insert(host, cached);
        Ok(key)
    }

    /// HTTP-01 key authorization for a pending challenge token.
    pub fn challenge_response(&self, token: &str) -> Option<String> {
        self.challenges
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(token)
            .cloned()
    }

    /// Walks the cert directory and parses metadata from every `*.crt`.
    pub fn certificates(&self) -> Result<Vec<CertInfo>, CertError> {
        let mut infos = Vec::new();
        for entry in std::fs::read_dir(&self.config.cert_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("crt") {
                continue;
            }
            let Some(host) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match parse_cert_validity(&path) {
                Ok((not_before, not_after)) => infos.push(CertInfo {
                    host,
                    not_before,
                    not_after,
                    expired: not_after < Utc::now(),
                    path,
                }),
                Err(e) => warn!(path = %path.display(), error = %e, "unreadable certificate"),
            }
        }
        infos.sort_by(|a, b| a.host.cmp(&b.host));
        Ok(infos)
    }

    /// Re-acquires every certificate inside the renewal window.
    /// Failures are logged and skipped; returns how many were renewed.
    pub async fn renew_all(&self) -> usize {
        let infos = match self.certificates() {
            Ok(infos) => infos,
            Err(e) => {
                warn!(error = %e, "certificate scan failed");
                return 0;
            }
        };

        let mut renewed = 0;
        for info in infos {
            if info.not_after - Utc::now() > ChronoDuration::days(RENEWAL_WINDOW_DAYS) {
                continue;
            }
            info!(host = %info.host, not_after = %info.not_after, "renewing certificate");
            match self.get_certificate(&info.host).await {
                Ok(_) => renewed += 1,
                Err(e) => warn!(host = %info.host, error = %e, "renewal failed"),
            }
        }
        renewed
    }

    /// Removes certificate pairs whose `notAfter` has passed. Returns
    /// the affected hosts.
    pub fn cleanup(&self) -> Result<Vec<String>, CertError> {
        let mut removed = Vec::new();
        for info in self.certificates()? {
            if !info.expired {
                continue;
            }
            std::fs::remove_file(&info.path)?;
            let _ = std::fs::remove_file(self.key_path(&info.host));
            info!(host = %info.host, "removed expired certificate");
            removed.push(info.host);
        }
        Ok(removed)
    }

    fn cert_path(&self, host: &str) -> PathBuf {
        self.config.cert_dir.join(format!("{host}.crt"))
    }

    fn key_path(&self, host: &str) -> PathBuf {
        self.config.cert_dir.join(format!("{host}.key"))
    }

    fn load_from_disk(&self, host: &str) -> Option<CachedCert> {
        let cert_path = self.cert_path(host);
        let key_path = self.key_path(host);
        if !cert_path.exists() || !key_path.exists() {
            return None;
        }
        let (_, not_after) = parse_cert_validity(&cert_path).ok()?;
        let cert_pem = std::fs::read(&cert_path).ok()?;
        let key_pem = std::fs::read(&key_path).ok()?;
        match build_certified_key(host, &cert_pem, &key_pem) {
            Ok(key) => Some(CachedCert {
                key: Arc::new(key),
                not_after,
            }),
            Err(e) => {
                warn!(host, error = %e, "cached certificate is unusable");
                None
            }
        }
    }

    fn store_to_disk(&self, host: &str, cert_pem: &str, key_pem: &str) -> io::Result<()> {
        std::fs::write(self.cert_path(host), cert_pem)?;
        let key_path = self.key_path(host);
        std::fs::write(&key_path, key_pem)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(())
    }

    /// ACME account handle, created once and persisted in the cert dir.
    async fn account(&self) -> Result<&Account, CertError> {
        self.account
            .get_or_try_init(|| async {
                let directory = if self.config.staging {
                    LetsEncrypt::Staging.url()
                } else {
                    LetsEncrypt::Production.url()
                };

                let credentials_path = self.config.cert_dir.join(ACCOUNT_FILE);
                if let Ok(raw) = std::fs::read_to_string(&credentials_path) {
                    if let Ok(credentials) = serde_json::from_str::<AccountCredentials>(&raw) {
                        match Account::from_credentials(credentials).await {
                            Ok(account) => return Ok(account),
                            Err(e) => {
                                warn!(error = %e, "stored acme account rejected, creating a new one")
                            }
                        }
                    }
                }

                let contact = format!("mailto:{}", self.config.email);
                let (account, credentials) = Account::create(
                    &NewAccount {
                        contact: &[&contact],
                        terms_of_service_agreed: true,
                        only_return_existing: false,
                    },
                    directory,
                    None,
                )
                .await
                .map_err(|e| CertError::Acme {
                    host: String::new(),
                    message: format!("account creation failed: {e}"),
                })?;

                if let Ok(raw) = serde_json::to_string(&credentials) {
                    if let Err(e) = std::fs::write(&credentials_path, raw) {
                        warn!(error = %e, "could not persist acme account credentials");
                    }
                }
                Ok(account)
            })
            .await
    }

    /// Runs one HTTP-01 order for a host and stores the result.
    async fn order_certificate(&self, host: &str) -> Result<CachedCert, CertError> {
        #[cfg(test)]
        if let Some(stub) = &self.stub {
            return self.stub_order(host, stub).await;
        }

        let acme_err = |message: String| CertError::Acme {
            host: host.to_string(),
            message,
        };

        info!(host, staging = self.config.staging, "ordering certificate");
        let account = self.account().await?;
        let mut order = account
            .new_order(&NewOrder {
                identifiers: &[Identifier::Dns(host.to_string())],
            })
            .await
            .map_err(|e| acme_err(format!("order creation failed: {e}")))?;

        let authorizations = order
            .authorizations()
            .await
            .map_err(|e| acme_err(format!("authorization fetch failed: {e}")))?;

        let mut tokens = Vec::new();
        for authz in &authorizations {
            match authz.status {
                AuthorizationStatus::Valid => continue,
                AuthorizationStatus::Pending => {}
                status => return Err(acme_err(format!("authorization is {status:?}"))),
            }

            let challenge = authz
                .challenges
                .iter()
                .find(|c| c.r#type == ChallengeType::Http01)
                .ok_or_else(|| acme_err("no http-01 challenge offered".to_string()))?;

            let key_auth = order.key_authorization(challenge);
            self.challenges
                .write()
                .unwrap_or_else(|p| p.into_inner())
                .insert(challenge.token.clone(), key_auth.as_str().to_string());
            tokens.push(challenge.token.clone());

            order
                .set_challenge_ready(&challenge.url)
                .await
                .map_err(|e| acme_err(format!("challenge submission failed: {e}")))?;
        }

        let ready = async {
            let mut delay = Duration::from_millis(500);
            loop {
                let state = order
                    .refresh()
                    .await
                    .map_err(|e| acme_err(format!("order refresh failed: {e}")))?;
                match state.status {
                    OrderStatus::Ready | OrderStatus::Valid => return Ok(()),
                    OrderStatus::Invalid => {
                        return Err(acme_err("order became invalid".to_string()))
                    }
                    _ => {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(Duration::from_secs(8));
                    }
                }
            }
        };
        let result = tokio::time::timeout(Duration::from_secs(120), ready)
            .await
            .map_err(|_| acme_err("order never became ready".to_string()))
            .and_then(|r| r);

        // Tokens are single-use; drop them regardless of the outcome.
        let finish = |tokens: &[String]| {
            let mut challenges = self.challenges.write().unwrap_or_else(|p| p.into_inner());
            for token in tokens {
                challenges.remove(token);
            }
        };
        if let Err(e) = result {
            finish(&tokens);
            return Err(e);
        }

        let mut params = rcgen::CertificateParams::new(vec![host.to_string()]).map_err(|e| {
            CertError::Parse {
                host: host.to_string(),
                message: e.to_string(),
            }
        })?;
        params.distinguished_name = rcgen::DistinguishedName::new();
        let key_pair = rcgen::KeyPair::generate().map_err(|e| CertError::Parse {
            host: host.to_string(),
            message: e.to_string(),
        })?;
        let csr = params
            .serialize_request(&key_pair)
            .map_err(|e| CertError::Parse {
                host: host.to_string(),
                message: e.to_string(),
            })?;

        order
            .finalize(csr.der())
            .await
            .map_err(|e| acme_err(format!("finalize failed: {e}")))?;

        let cert_pem = {
            let mut attempts = 0;
            loop {
                match order
                    .certificate()
                    .await
                    .map_err(|e| acme_err(format!("certificate download failed: {e}")))?
                {
                    Some(pem) => break pem,
                    None if attempts < 10 => {
                        attempts += 1;
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    None => {
                        finish(&tokens);
                        return Err(acme_err("certificate never issued".to_string()));
                    }
                }
            }
        };
        finish(&tokens);

        let key_pem = key_pair.serialize_pem();
        self.store_to_disk(host, &cert_pem, &key_pem)?;
        debug!(host, "certificate stored");

        let (_, not_after) = parse_cert_validity(&self.cert_path(host))?;
        let key = build_certified_key(host, cert_pem.as_bytes(), key_pem.as_bytes())?;
        Ok(CachedCert {
            key: Arc::new(key),
            not_after,
        })
    }

    /// Replaces real orders with delayed self-signed issuance so tests
    /// can race concurrent acquisitions without the network.
    #[cfg(test)]
    fn with_stubbed_orders(mut self, delay: Duration) -> Self {
        self.stub = Some(OrderStub {
            delay,
            issued: std::sync::atomic::AtomicUsize::new(0),
        });
        self
    }

    #[cfg(test)]
    async fn stub_order(&self, host: &str, stub: &OrderStub) -> Result<CachedCert, CertError> {
        stub.issued
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        tokio::time::sleep(stub.delay).await;

        let signed = rcgen::generate_simple_self_signed(vec![host.to_string()]).map_err(|e| {
            CertError::Parse {
                host: host.to_string(),
                message: e.to_string(),
            }
        })?;
        let cert_pem = signed.cert.pem();
        let key_pem = signed.key_pair.serialize_pem();
        self.store_to_disk(host, &cert_pem, &key_pem)?;

        let (_, not_after) = parse_cert_validity(&self.cert_path(host))?;
        let key = build_certified_key(host, cert_pem.as_bytes(), key_pem.as_bytes())?;
        Ok(CachedCert {
            key: Arc::new(key),
            not_after,
        })
    }
}

/// Lowercases an SNI value and strips any port suffix.
pub fn normalize_sni(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host,
    }
}

fn needs_renewal(not_after: DateTime<Utc>) -> bool {
    not_after - Utc::now() < ChronoDuration::days(RENEWAL_WINDOW_DAYS)
}

/// Reads the validity window from the first certificate in a PEM file.
fn parse_cert_validity(path: &Path) -> Result<(DateTime<Utc>, DateTime<Utc>), CertError> {
    let host = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let parse_err = |message: String| CertError::Parse {
        host: host.clone(),
        message,
    };

    let raw = std::fs::read(path)?;
    let (_, pem) =
        x509_parser::pem::parse_x509_pem(&raw).map_err(|e| parse_err(e.to_string()))?;
    let cert = pem.parse_x509().map_err(|e| parse_err(e.to_string()))?;
    let validity = cert.validity();
    let not_before = DateTime::<Utc>::from_timestamp(validity.not_before.timestamp(), 0)
        .ok_or_else(|| parse_err("notBefore out of range".to_string()))?;
    let not_after = DateTime::<Utc>::from_timestamp(validity.not_after.timestamp(), 0)
        .ok_or_else(|| parse_err("notAfter out of range".to_string()))?;
    Ok((not_before, not_after))
}

/// Builds a rustls server identity from PEM chain and key bytes.
pub fn build_certified_key(
    host: &str,
    cert_pem: &[u8],
    key_pem: &[u8],
) -> Result<CertifiedKey, CertError> {
    let parse_err = |message: String| CertError::Parse {
        host: host.to_string(),
        message,
    };

    let certs = rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| parse_err(e.to_string()))?;
    if certs.is_empty() {
        return Err(parse_err("no certificates in chain".to_string()));
    }
    let key = rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| parse_err(e.to_string()))?
        .ok_or_else(|| parse_err("no private key found".to_string()))?;
    let signer = rustls::crypto::ring::sign::any_supported_type(&key)
        .map_err(|e| parse_err(e.to_string()))?;
    Ok(CertifiedKey::new(certs, signer))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(domains: &[&str]) -> (tempfile::TempDir, CertManager) {
        let tmp = tempfile::tempdir().unwrap();
        let manager = CertManager::new(CertConfig {
            email: "ops@example.com".to_string(),
            cert_dir: tmp.path().to_path_buf(),
            staging: true,
            domains: domains.iter().map(ToString::to_string).collect(),
        })
        .unwrap();
        (tmp, manager)
    }

    /// Writes a self-signed pair for `host` into the manager's cert dir.
    fn write_self_signed(dir: &Path, host: &str) {
        let signed = rcgen::generate_simple_self_signed(vec![host.to_string()]).unwrap();
        std::fs::write(dir.join(format!("{host}.crt")), signed.cert.pem()).unwrap();
        std::fs::write(
            dir.join(format!("{host}.key")),
            signed.key_pair.serialize_pem(),
        )
        .unwrap();
    }

    /// Writes an already expired pair for `host`.
    fn write_expired(dir: &Path, host: &str) {
        let mut params = rcgen::CertificateParams::new(vec![host.to_string()]).unwrap();
        params.not_before = rcgen::date_time_ymd(2020, 1, 1);
        params.not_after = rcgen::date_time_ymd(2021, 1, 1);
        let key_pair = rcgen::KeyPair::generate().unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        std::fs::write(dir.join(format!("{host}.crt")), cert.pem()).unwrap();
        std::fs::write(dir.join(format!("{host}.key")), key_pair.serialize_pem()).unwrap();
    }

    #[test]
    fn normalize_strips_ports_and_case() {
        assert_eq!(normalize_sni("App.Example.COM:8443"), "app.example.com");
        assert_eq!(normalize_sni("app.example.com"), "app.example.com");
        assert_eq!(normalize_sni("  web.localhost:80 "), "web.localhost");
    }

    #[test]
    fn host_policy_accepts_exact_and_subdomains() {
        let (_tmp, manager) = manager(&["example.com", "web.localhost"]);
        assert!(manager.host_allowed("example.com"));
        assert!(manager.host_allowed("app.example.com"));
        assert!(manager.host_allowed("deep.app.example.com"));
        assert!(manager.host_allowed("web.localhost:8443"));
        assert!(!manager.host_allowed("example.org"));
        assert!(!manager.host_allowed("notexample.com"));
    }

    #[test]
    fn certificates_reports_validity_and_expiry() {
        let (tmp, manager) = manager(&["example.com"]);
        write_self_signed(tmp.path(), "a.example.com");
        write_expired(tmp.path(), "b.example.com");

        let infos = manager.certificates().unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].host, "a.example.com");
        assert!(!infos[0].expired);
        assert_eq!(infos[1].host, "b.example.com");
        assert!(infos[1].expired);
    }

    #[test]
    fn cleanup_removes_only_expired_pairs() {
        let (tmp, manager) = manager(&["example.com"]);
        write_self_signed(tmp.path(), "a.example.com");
        write_expired(tmp.path(), "b.example.com");

        let removed = manager.cleanup().unwrap();
        assert_eq!(removed, vec!["b.example.com"]);
        assert!(tmp.path().join("a.example.com.crt").exists());
        assert!(!tmp.path().join("b.example.com.crt").exists());
        assert!(!tmp.path().join("b.example.com.key").exists());
    }

    #[tokio::test]
    async fn get_certificate_rejects_unlisted_host() {
        let (_tmp, manager) = manager(&["example.com"]);
        let err = manager.get_certificate("other.org").await.unwrap_err();
        assert!(matches!(err, CertError::HostNotAllowed(_)));
    }

    #[tokio::test]
    async fn warm_disk_cache_serves_without_ordering() {
        let (tmp, manager) = manager(&["example.com"]);
        write_self_signed(tmp.path(), "a.example.com");

        let first = manager.get_certificate("a.example.com:443").await.unwrap();
        let second = manager.get_certificate("a.example.com").await.unwrap();
        // Same identity on the warm path.
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn concurrent_cold_requests_coalesce_into_one_order() {
        let tmp = tempfile::tempdir().unwrap();
        let manager = Arc::new(
            CertManager::new(CertConfig {
                email: "ops@example.com".to_string(),
                cert_dir: tmp.path().to_path_buf(),
                staging: true,
                domains: vec!["example.com".to_string()],
            })
            .unwrap()
            .with_stubbed_orders(Duration::from_millis(200)),
        );

        // Two simultaneous handshakes for the same new host.
        let first = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_certificate("new.example.com").await })
        };
        let second = {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.get_certificate("new.example.com:443").await })
        };

        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        // Exactly one order ran; the sibling waited on the host guard
        // and picked up the shared result.
        assert!(Arc::ptr_eq(&first, &second));
        let issued = manager
            .stub
            .as_ref()
            .unwrap()
            .issued
            .load(std::sync::atomic::Ordering::SeqCst);
        assert_eq!(issued, 1);
    }

    #[test]
    fn certified_key_builds_from_generated_pem() {
        let signed = rcgen::generate_simple_self_signed(vec!["x.example.com".to_string()]).unwrap();
        let key = build_certified_key(
            "x.example.com",
            signed.cert.pem().as_bytes(),
            signed.key_pair.serialize_pem().as_bytes(),
        )
        .unwrap();
        assert_eq!(key.cert.len(), 1);
    }

    #[test]
    fn challenge_responses_round_trip() {
        let (_tmp, manager) = manager(&["example.com"]);
        manager
            .challenges
            .write()
            .unwrap()
            .insert("tok".to_string(), "tok.auth".to_string());
        assert_eq!(manager.challenge_response("tok").unwrap(), "tok.auth");
        assert!(manager.challenge_response("other").is_none());
    }
}
