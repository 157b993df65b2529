use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration consumed by the server composer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub server: ServerConfig,
    pub tls: TlsConfig,
    pub apps: Vec<AppSpec>,
}

impl GlobalConfig {
    /// Returns whether any TLS listener should be brought up.
    pub fn tls_active(&self) -> bool {
        self.tls.enabled || self.apps.iter().any(|app| app.tls.enabled)
    }

    /// Returns whether automatic certificate acquisition is requested anywhere.
    pub fn auto_cert_active(&self) -> bool {
        (self.tls.enabled && self.tls.auto_cert)
            || self
                .apps
                .iter()
                .any(|app| app.tls.enabled && app.tls.auto_cert)
    }

    /// Looks up an app by its routing hostname (already lowercased).
    pub fn app_for_hostname(&self, hostname: &str) -> Option<&AppSpec> {
        self.apps
            .iter()
            .find(|app| app.hostname.eq_ignore_ascii_case(hostname))
    }
}

/// Listener and request-handling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub http_port: u16,
    pub https_port: u16,
    pub read_timeout_secs: u64,
    pub write_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub log_level: String,
    pub enable_tracking: bool,
    pub tracking_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            http_port: 8080,
            https_port: 8443,
            read_timeout_secs: 30,
            write_timeout_secs: 30,
            shutdown_timeout_secs: 10,
            log_level: "info".to_string(),
            enable_tracking: true,
            tracking_header: "X-GUVNOR-TRACKING".to_string(),
        }
    }
}

impl ServerConfig {
    /// Loopback port the management API binds to.
    pub fn management_port(&self) -> u16 {
        self.http_port.saturating_add(1000)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Global TLS and certificate-acquisition settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    pub auto_cert: bool,
    pub cert_dir: PathBuf,
    pub email: String,
    pub staging: bool,
    pub force_https: bool,
    pub certificate_headers: bool,
    pub domains: Vec<String>,
}

/// One managed backend application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSpec {
    pub name: String,
    /// Routing hostname; materialized to `{name}.localhost` during validation.
    pub hostname: String,
    /// Loopback port the backend listens on; 0 means auto-assign from 3000.
    pub port: u16,
    pub command: String,
    pub args: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub health_check: HealthCheckConfig,
    pub restart_policy: RestartPolicy,
    pub tls: AppTlsConfig,
}

/// HTTP health probing settings for one app.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    pub path: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        HealthCheckConfig {
            enabled: false,
            path: "/health".to_string(),
            interval_secs: 30,
            timeout_secs: 5,
            retries: 3,
            expected_status: None,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Bounded restart policy applied when a child exits non-zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub backoff_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy {
            enabled: true,
            max_retries: 5,
            backoff_secs: 2,
        }
    }
}

impl RestartPolicy {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }
}

/// Per-app TLS override of the global settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppTlsConfig {
    pub enabled: bool,
    pub auto_cert: bool,
    pub email: String,
    pub staging: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    pub certificate_headers: bool,
}
