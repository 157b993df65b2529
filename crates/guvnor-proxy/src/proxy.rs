// SPDX-License-Identifier: Apache-2.0

//! Host-routing reverse proxy with TLS termination.
//!
//! The HTTP listener serves ACME challenges, optionally redirects to
//! HTTPS, and proxies everything else. The HTTPS listener resolves a
//! certificate per handshake from the SNI before completing the
//! handshake, so acquisition runs inside the handshake context.

use chrono::{DateTime, Utc};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{
    HeaderMap, HeaderName, HeaderValue, CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, HOST, LOCATION,
    PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, REFERER, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
    USER_AGENT,
};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri, Version};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use rustls::sign::CertifiedKey;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_rustls::LazyConfigAcceptor;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use guvnor_config::{AppSpec, GlobalConfig};
use guvnor_runtime::Supervisor;

use crate::certs::{build_certified_key, normalize_sni, CertError, CertManager};
use crate::ProxyError;

/// Path prefix served from the certificate manager's challenge table.
const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Reverse proxy over both public listeners.
pub struct Proxy {
    state: Arc<ProxyState>,
}

struct ProxyState {
    config: GlobalConfig,
    supervisor: Arc<Supervisor>,
    certs: Option<Arc<CertManager>>,
    file_certs: HashMap<String, Arc<CertifiedKey>>,
    client: Client<HttpConnector, ProxyBody>,
    tracking_header: Option<HeaderName>,
    inflight: AtomicUsize,
}

impl Proxy {
    pub fn new(
        config: GlobalConfig,
        supervisor: Arc<Supervisor>,
        certs: Option<Arc<CertManager>>,
    ) -> Result<Self, ProxyError> {
        let mut file_certs = HashMap::new();
        for app in &config.apps {
            if !app.tls.enabled {
                continue;
            }
            if let (Some(cert_file), Some(key_file)) = (&app.tls.cert_file, &app.tls.key_file) {
                let cert_pem = std::fs::read(cert_file)?;
                let key_pem = std::fs::read(key_file)?;
                let key = build_certified_key(&app.hostname, &cert_pem, &key_pem)?;
                file_certs.insert(app.hostname.clone(), Arc::new(key));
            }
        }

        let tracking_header = config
            .server
            .enable_tracking
            .then(|| HeaderName::from_bytes(config.server.tracking_header.as_bytes()))
            .transpose()
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "invalid tracking header")
            })?;

        let client = Client::builder(TokioExecutor::new())
            .pool_max_idle_per_host(32)
            .pool_idle_timeout(Duration::from_secs(90))
            .build_http();

        Ok(Proxy {
            state: Arc::new(ProxyState {
                config,
                supervisor,
                certs,
                file_certs,
                client,
                tracking_header,
                inflight: AtomicUsize::new(0),
            }),
        })
    }

    /// Serves plain HTTP until shutdown, then drains in-flight requests.
    pub async fn run_http(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ProxyError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.server.http_port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        info!(%addr, "http listener ready");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "http accept failed");
                            continue;
                        }
                    };
                    let state = Arc::clone(&self.state);
                    tokio::spawn(serve_plain(state, stream, peer));
                }
                _ = shutdown.changed() => break,
            }
        }
        self.drain().await;
        Ok(())
    }

    /// Serves HTTPS until shutdown, then drains in-flight requests.
    pub async fn run_https(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), ProxyError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.server.https_port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        info!(%addr, "https listener ready");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "https accept failed");
                            continue;
                        }
                    };
                    let state = Arc::clone(&self.state);
                    tokio::spawn(serve_tls(state, stream, peer));
                }
                _ = shutdown.changed() => break,
            }
        }
        self.drain().await;
        Ok(())
    }

    /// Waits for in-flight requests to finish, bounded by the
    /// configured shutdown timeout.
    async fn drain(&self) {
        let deadline = Instant::now() + self.state.config.server.shutdown_timeout();
        while self.state.inflight.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

async fn serve_plain(state: Arc<ProxyState>, stream: TcpStream, peer: SocketAddr) {
    let io = TokioIo::new(stream);
    let builder = connection_builder(&state);
    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        async move { route(state, req.map(incoming_body), false, peer, None).await }
    });
    if let Err(e) = builder.serve_connection_with_upgrades(io, service).await {
        debug!(%peer, error = %e, "http connection closed with error");
    }
}

/// Connection builder with the configured header read timeout applied.
fn connection_builder(state: &Arc<ProxyState>) -> auto::Builder<TokioExecutor> {
    let mut builder = auto::Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(hyper_util::rt::TokioTimer::new())
        .header_read_timeout(state.config.server.read_timeout());
    builder
}

async fn serve_tls(state: Arc<ProxyState>, stream: TcpStream, peer: SocketAddr) {
    let acceptor = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), stream);
    let start = match acceptor.await {
        Ok(start) => start,
        Err(e) => {
            debug!(%peer, error = %e, "tls accept failed");
            return;
        }
    };

    let sni = start.client_hello().server_name().map(str::to_string);
    let key = match resolve_server_key(&state, sni.as_deref()).await {
        Ok(key) => key,
        Err(e) => {
            warn!(%peer, sni = sni.as_deref().unwrap_or("-"), error = %e, "tls handshake rejected");
            return;
        }
    };

    let tls_config = Arc::new(server_tls_config(&state, key));
    let tls_stream = match start.into_stream(tls_config).await {
        Ok(stream) => stream,
        Err(e) => {
            debug!(%peer, error = %e, "tls handshake failed");
            return;
        }
    };

    let client_cert = tls_stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .and_then(|der| ClientCertDetails::parse(der.as_ref()))
        .map(Arc::new);

    let io = TokioIo::new(tls_stream);
    let builder = connection_builder(&state);
    let service = service_fn(move |req: Request<Incoming>| {
        let state = Arc::clone(&state);
        let client_cert = client_cert.clone();
        async move { route(state, req.map(incoming_body), true, peer, client_cert).await }
    });
    if let Err(e) = builder.serve_connection_with_upgrades(io, service).await {
        debug!(%peer, error = %e, "https connection closed with error");
    }
}

/// Picks the server identity for one handshake: per-app file
/// certificates first, then the ACME cache/order path.
async fn resolve_server_key(
    state: &Arc<ProxyState>,
    sni: Option<&str>,
) -> Result<Arc<CertifiedKey>, CertError> {
    let Some(sni) = sni else {
        return Err(CertError::MissingServerName);
    };
    let host = normalize_sni(sni);
    if let Some(key) = state.file_certs.get(&host) {
        return Ok(Arc::clone(key));
    }
    match &state.certs {
        Some(certs) => certs.get_certificate(&host).await,
        None => Err(CertError::HostNotAllowed(host)),
    }
}

/// Builds the per-connection rustls config: TLS 1.2 minimum, `h2` +
/// `http/1.1` ALPN, and optional client-certificate capture.
fn server_tls_config(state: &Arc<ProxyState>, key: Arc<CertifiedKey>) -> rustls::ServerConfig {
    let builder = rustls::ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ]);

    let capture = state.config.tls.certificate_headers
        || state
            .config
            .apps
            .iter()
            .any(|app| app.tls.certificate_headers);
    let builder = if capture {
        builder.with_client_cert_verifier(Arc::new(ClientCertCapture::new()))
    } else {
        builder.with_no_client_auth()
    };

    let mut config = builder.with_cert_resolver(Arc::new(SingleCertResolver(key)));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    config
}

/// Routes one request: ACME challenges, HTTPS redirect, host lookup,
/// then the upstream round trip. Failures map to 404/503/502.
async fn route(
    state: Arc<ProxyState>,
    req: Request<ProxyBody>,
    tls: bool,
    peer: SocketAddr,
    client_cert: Option<Arc<ClientCertDetails>>,
) -> Result<Response<ProxyBody>, Infallible> {
    let begun = Instant::now();
    let _guard = InflightGuard::enter(&state.inflight);

    let method = req.method().clone();
    let version = req.version();
    let request_uri = req
        .uri()
        .path_and_query()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());
    let referer = header_str(req.headers(), &REFERER);
    let user_agent = header_str(req.headers(), &USER_AGENT);
    let peer_ip = client_ip(req.headers(), peer);
    let raw_host = host_of(&req);

    let log = |response: &Response<ProxyBody>, app: Option<&str>| {
        access_log(
            &peer_ip,
            &method,
            &request_uri,
            version,
            response.status(),
            response_bytes(response),
            referer.as_deref(),
            user_agent.as_deref(),
            app,
            begun,
        );
    };

    if !tls {
        if let Some(token) = req.uri().path().strip_prefix(ACME_CHALLENGE_PREFIX) {
            let response = match state
                .certs
                .as_ref()
                .and_then(|certs| certs.challenge_response(token))
            {
                Some(key_auth) => text_response(StatusCode::OK, key_auth),
                None => text_response(StatusCode::NOT_FOUND, "Not Found"),
            };
            log(&response, None);
            return Ok(response);
        }

        if state.config.tls.force_https && state.config.tls_active() {
            if let Some(host) = raw_host.as_deref() {
                let location =
                    redirect_location(host, state.config.server.https_port, &request_uri);
                let mut response =
                    text_response(StatusCode::MOVED_PERMANENTLY, "Moved Permanently");
                if let Ok(value) = HeaderValue::from_str(&location) {
                    response.headers_mut().insert(LOCATION, value);
                }
                log(&response, None);
                return Ok(response);
            }
        }
    }

    let host = raw_host.as_deref().map(normalize_sni).unwrap_or_default();
    let Some(app) = state.config.app_for_hostname(&host).cloned() else {
        let response = text_response(StatusCode::NOT_FOUND, "Domain not found");
        log(&response, None);
        return Ok(response);
    };

    let running = match state.supervisor.get(&app.name).await {
        Some(process) => process.is_running().await,
        None => false,
    };
    if !running {
        let response = text_response(StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable");
        log(&response, Some(&app.name));
        return Ok(response);
    }

    let response = forward(&state, req, &app, tls, &peer_ip, raw_host.as_deref(), client_cert)
        .await;
    log(&response, Some(&app.name));
    Ok(response)
}

/// Rewrites the request for the backend and performs the round trip.
async fn forward(
    state: &Arc<ProxyState>,
    req: Request<ProxyBody>,
    app: &AppSpec,
    tls: bool,
    peer_ip: &str,
    raw_host: Option<&str>,
    client_cert: Option<Arc<ClientCertDetails>>,
) -> Response<ProxyBody> {
    let (mut parts, body) = req.into_parts();

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/");
    let uri: Uri = match format!("http://127.0.0.1:{}{path_and_query}", app.port).parse() {
        Ok(uri) => uri,
        Err(e) => {
            error!(error = %e, "could not build upstream uri");
            return text_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
        }
    };
    parts.uri = uri;
    // The upstream hop is always HTTP/1.1 regardless of the inbound ALPN.
    parts.version = Version::HTTP_11;

    strip_hop_headers(&mut parts.headers);

    let forwarded_for = match header_str(&parts.headers, &x_header("x-forwarded-for")) {
        Some(prior) if !prior.is_empty() => format!("{prior}, {peer_ip}"),
        _ => peer_ip.to_string(),
    };
    insert_header(&mut parts.headers, "x-forwarded-for", &forwarded_for);
    insert_header(
        &mut parts.headers,
        "x-forwarded-proto",
        if tls { "https" } else { "http" },
    );
    if let Some(host) = raw_host {
        insert_header(&mut parts.headers, "x-forwarded-host", host);
    }

    if let Some(name) = &state.tracking_header {
        append_tracking(&mut parts.headers, name);
    }

    if tls && (state.config.tls.certificate_headers || app.tls.certificate_headers) {
        inject_certificate_headers(&mut parts.headers, client_cert.as_deref());
    }

    match state.client.request(Request::from_parts(parts, body)).await {
        Ok(response) => response.map(incoming_body),
        Err(e) => {
            warn!(app = %app.name, port = app.port, error = %e, "upstream round trip failed");
            text_response(StatusCode::BAD_GATEWAY, "Bad Gateway")
        }
    }
}

/// Appends exactly one fresh UUID to the tracking chain header.
fn append_tracking(headers: &mut HeaderMap, name: &HeaderName) {
    let fresh = Uuid::new_v4().to_string();
    let value = match headers.get(name).and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing};{fresh}"),
        _ => fresh,
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name.clone(), value);
    }
}

/// Injects parsed client-certificate metadata for the backend.
fn inject_certificate_headers(headers: &mut HeaderMap, cert: Option<&ClientCertDetails>) {
    let Some(cert) = cert else {
        insert_header(headers, "x-certificate-detected", "off");
        return;
    };
    insert_header(headers, "x-certificate-detected", "on");
    insert_header(headers, "x-certificate-cn", &cert.cn);
    insert_header(headers, "x-certificate-subject", &cert.subject);
    insert_header(headers, "x-certificate-issuer", &cert.issuer);
    insert_header(headers, "x-certificate-serial", &cert.serial);
    insert_header(
        headers,
        "x-certificate-not-before",
        &cert.not_before.to_rfc3339(),
    );
    insert_header(
        headers,
        "x-certificate-not-after",
        &cert.not_after.to_rfc3339(),
    );
    insert_header(
        headers,
        "x-certificate-status",
        if cert.expired() { "expired" } else { "valid" },
    );
}

/// Client IP in priority order: first X-Forwarded-For hop, X-Real-IP,
/// then the socket peer address.
fn client_ip(headers: &HeaderMap, peer: SocketAddr) -> String {
    if let Some(xff) = header_str(headers, &x_header("x-forwarded-for")) {
        if let Some(first) = xff.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    if let Some(real) = header_str(headers, &x_header("x-real-ip")) {
        let real = real.trim();
        if !real.is_empty() {
            return real.to_string();
        }
    }
    peer.ip().to_string()
}

/// Redirect target with the HTTPS port substituted when it is not 443.
fn redirect_location(host_header: &str, https_port: u16, request_uri: &str) -> String {
    let host = normalize_sni(host_header);
    if https_port == 443 {
        format!("https://{host}{request_uri}")
    } else {
        format!("https://{host}:{https_port}{request_uri}")
    }
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in [
        CONNECTION,
        PROXY_AUTHENTICATE,
        PROXY_AUTHORIZATION,
        TE,
        TRAILER,
        TRANSFER_ENCODING,
        UPGRADE,
    ] {
        headers.remove(name);
    }
    headers.remove(x_header("keep-alive"));
}

fn host_of<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| req.uri().authority().map(|a| a.to_string()))
}

fn header_str(headers: &HeaderMap, name: &HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), value);
    }
}

fn x_header(name: &'static str) -> HeaderName {
    HeaderName::from_static(name)
}

fn incoming_body(body: Incoming) -> ProxyBody {
    body.boxed()
}

fn text_response(status: StatusCode, body: impl Into<String>) -> Response<ProxyBody> {
    let body = body.into();
    let mut response = Response::new(
        Full::new(Bytes::from(body))
            .map_err(|never| match never {})
            .boxed(),
    );
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

fn response_bytes(response: &Response<ProxyBody>) -> u64 {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

/// One Apache-combined line per request, levelled by status class.
#[allow(clippy::too_many_arguments)]
fn access_log(
    peer_ip: &str,
    method: &Method,
    request_uri: &str,
    version: Version,
    status: StatusCode,
    bytes: u64,
    referer: Option<&str>,
    user_agent: Option<&str>,
    app: Option<&str>,
    begun: Instant,
) {
    let line = format!(
        "{peer_ip} - - [{}] \"{method} {request_uri} {version:?}\" {} {bytes} \"{}\" \"{}\" app={} rt={}ms",
        chrono::Local::now().format("%d/%b/%Y:%H:%M:%S %z"),
        status.as_u16(),
        referer.unwrap_or("-"),
        user_agent.unwrap_or("-"),
        app.unwrap_or("-"),
        begun.elapsed().as_millis(),
    );
    match status.as_u16() {
        500.. => error!(target: "guvnor::access", "{line}"),
        400.. => warn!(target: "guvnor::access", "{line}"),
        _ => info!(target: "guvnor::access", "{line}"),
    }
}

struct InflightGuard<'a>(&'a AtomicUsize);

impl<'a> InflightGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        InflightGuard(counter)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Owned client-certificate metadata parsed once per connection.
#[derive(Debug, Clone)]
struct ClientCertDetails {
    cn: String,
    subject: String,
    issuer: String,
    serial: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
}

impl ClientCertDetails {
    fn parse(der: &[u8]) -> Option<Self> {
        use x509_parser::prelude::FromDer;
        let (_, cert) = x509_parser::certificate::X509Certificate::from_der(der).ok()?;
        let validity = cert.validity();
        Some(ClientCertDetails {
            cn: dn_components(cert.subject()),
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            serial: cert.raw_serial_as_string(),
            not_before: DateTime::<Utc>::from_timestamp(validity.not_before.timestamp(), 0)?,
            not_after: DateTime::<Utc>::from_timestamp(validity.not_after.timestamp(), 0)?,
        })
    }

    fn expired(&self) -> bool {
        let now = Utc::now();
        now < self.not_before || now > self.not_after
    }
}

/// DN-formatted subject components joined by `", "`.
fn dn_components(name: &x509_parser::x509::X509Name<'_>) -> String {
    let mut parts = Vec::new();
    let attrs: [(&str, Option<&str>); 6] = [
        ("CN", name.iter_common_name().next().and_then(|a| a.as_str().ok())),
        ("O", name.iter_organization().next().and_then(|a| a.as_str().ok())),
        ("OU", name.iter_organizational_unit().next().and_then(|a| a.as_str().ok())),
        ("C", name.iter_country().next().and_then(|a| a.as_str().ok())),
        ("ST", name.iter_state_or_province().next().and_then(|a| a.as_str().ok())),
        ("L", name.iter_locality().next().and_then(|a| a.as_str().ok())),
    ];
    for (label, value) in attrs {
        if let Some(value) = value {
            parts.push(format!("{label}={value}"));
        }
    }
    parts.join(", ")
}

/// Serves the certificate resolved before the handshake completed.
#[derive(Debug)]
struct SingleCertResolver(Arc<CertifiedKey>);

impl rustls::server::ResolvesServerCert for SingleCertResolver {
    fn resolve(
        &self,
        _client_hello: rustls::server::ClientHello<'_>,
    ) -> Option<Arc<CertifiedKey>> {
        Some(Arc::clone(&self.0))
    }
}

/// Accepts any presented client certificate so its metadata can be
/// surfaced to backends; chain verification is not performed here.
#[derive(Debug)]
struct ClientCertCapture {
    provider: Arc<rustls::crypto::CryptoProvider>,
}

impl ClientCertCapture {
    fn new() -> Self {
        ClientCertCapture {
            provider: Arc::new(rustls::crypto::ring::default_provider()),
        }
    }
}

impl rustls::server::danger::ClientCertVerifier for ClientCertCapture {
    fn root_hint_subjects(&self) -> &[rustls::DistinguishedName] {
        &[]
    }

    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn verify_client_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::server::danger::ClientCertVerified, rustls::Error> {
        Ok(rustls::server::danger::ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &rustls::pki_types::CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
