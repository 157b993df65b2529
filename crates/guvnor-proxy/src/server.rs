// SPDX-License-Identifier: Apache-2.0

//! Composition root: wires configuration to the supervisor, prober,
//! certificate manager, proxy listeners, and management API, and owns
//! the ordered shutdown sequence.

use anyhow::Context;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

use guvnor_config::GlobalConfig;
use guvnor_runtime::{HealthProber, LogRing, RuntimeError, SharedLogSink, Supervisor};

use crate::certs::{CertConfig, CertManager};
use crate::mgmt::ManagementApi;
use crate::proxy::Proxy;

/// Cadence of the certificate renewal sweep.
const RENEWAL_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// On-disk locations owned by the running server.
#[derive(Debug, Clone)]
pub struct ServerPaths {
    pub pid_dir: PathBuf,
    pub cert_dir: PathBuf,
}

/// Runs the supervisor until an interrupt or terminate signal arrives.
pub async fn run(config: GlobalConfig, paths: ServerPaths) -> anyhow::Result<()> {
    run_until(config, paths, wait_for_shutdown_signal()).await
}

/// Runs the supervisor until the given future resolves, then tears
/// down in order: management API, listeners, prober, children.
pub async fn run_until(
    config: GlobalConfig,
    paths: ServerPaths,
    shutdown_signal: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    if config.tls_active() {
        // The provider must be in place before any rustls config is built.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    let logs = Arc::new(
        LogRing::default().with_shared_sink(SharedLogSink::new(SharedLogSink::default_path())),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let supervisor = Arc::new(
        Supervisor::new(&paths.pid_dir, Arc::clone(&logs), shutdown_rx.clone())
            .context("supervisor construction failed")?,
    );
    supervisor.adopt_specs(&config.apps).await;

    for app in &config.apps {
        match supervisor.start(app).await {
            Ok(()) => info!(app = %app.name, port = app.port, "app started"),
            Err(RuntimeError::AlreadyRunning { name }) => {
                info!(app = %name, "already running, keeping recovered process");
            }
            Err(e) => error!(app = %app.name, error = %e, "app failed to start"),
        }
    }

    let prober = Arc::new(HealthProber::new(
        Arc::clone(&supervisor),
        Arc::clone(&logs),
    ));
    let prober_handles = prober.spawn(&config.apps, shutdown_rx.clone());

    let certs = if config.auto_cert_active() {
        Some(Arc::new(
            CertManager::new(cert_config_from(&config, &paths))
                .context("certificate manager construction failed")?,
        ))
    } else {
        None
    };

    let proxy = Arc::new(Proxy::new(
        config.clone(),
        Arc::clone(&supervisor),
        certs.clone(),
    )?);

    let http_handle = {
        let proxy = Arc::clone(&proxy);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy.run_http(shutdown).await {
                error!(error = %e, "http listener failed");
            }
        })
    };

    let https_handle = config.tls_active().then(|| {
        let proxy = Arc::clone(&proxy);
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = proxy.run_https(shutdown).await {
                error!(error = %e, "https listener failed");
            }
        })
    });

    let renewal_handle = certs.as_ref().map(|certs| {
        let certs = Arc::clone(certs);
        let mut shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(RENEWAL_INTERVAL) => {}
                    _ = shutdown.changed() => break,
                }
                let renewed = certs.renew_all().await;
                if renewed > 0 {
                    info!(renewed, "certificate renewal sweep finished");
                }
            }
        })
    });

    let mgmt = ManagementApi::new(
        Arc::clone(&supervisor),
        Arc::clone(&logs),
        Some(Arc::clone(&prober)),
        shutdown_rx.clone(),
    );
    let mgmt_port = config.server.management_port();
    let mgmt_handle = tokio::spawn(async move {
        if let Err(e) = mgmt.run(mgmt_port).await {
            error!(error = %e, "management api failed");
        }
    });

    shutdown_signal.await;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    let _ = mgmt_handle.await;
    let _ = http_handle.await;
    if let Some(handle) = https_handle {
        let _ = handle.await;
    }
    if let Some(handle) = renewal_handle {
        handle.abort();
    }
    for handle in prober_handles {
        handle.abort();
    }

    for result in supervisor.stop_all().await {
        info!(
            app = %result.name,
            status = ?result.status,
            duration_ms = result.duration_ms,
            "app stopped"
        );
    }
    info!("shutdown complete");
    Ok(())
}

/// Derives the certificate manager settings: global domains plus the
/// hostnames of every app that participates in automatic TLS.
pub fn cert_config_from(config: &GlobalConfig, paths: &ServerPaths) -> CertConfig {
    let mut domains = config.tls.domains.clone();
    let global_auto = config.tls.enabled && config.tls.auto_cert;
    for app in &config.apps {
        let app_auto = app.tls.enabled && app.tls.auto_cert;
        if (global_auto || app_auto) && !domains.contains(&app.hostname) {
            domains.push(app.hostname.clone());
        }
    }

    let email = if config.tls.email.trim().is_empty() {
        config
            .apps
            .iter()
            .map(|app| app.tls.email.trim())
            .find(|email| !email.is_empty())
            .unwrap_or_default()
            .to_string()
    } else {
        config.tls.email.clone()
    };

    let cert_dir = if config.tls.cert_dir.as_os_str().is_empty() {
        paths.cert_dir.clone()
    } else {
        config.tls.cert_dir.clone()
    };

    CertConfig {
        email,
        cert_dir,
        staging: config.tls.staging,
        domains,
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received interrupt"),
                _ = sigterm.recv() => info!("received terminate signal"),
            }
        }
        Err(e) => {
            warn!(error = %e, "terminate handler unavailable, watching interrupt only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use guvnor_config::AppSpec;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};

    fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn http_get(addr: &str, host: &str, path: &str) -> (u16, String) {
        let mut stream = TcpStream::connect(addr).unwrap();
        let request =
            format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        let status = response
            .lines()
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let body = response
            .split_once("\r\n\r\n")
            .map(|(_, b)| b.to_string())
            .unwrap_or_default();
        (status, body)
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn composes_listeners_and_tears_down_in_order() {
        let tmp = tempfile::tempdir().unwrap();
        let http_port = free_port();

        let mut config = GlobalConfig::default();
        config.server.http_port = http_port;
        config.server.shutdown_timeout_secs = 1;
        config.apps.push(AppSpec {
            name: "web".to_string(),
            hostname: "web.localhost".to_string(),
            port: free_port(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 60".to_string()],
            ..AppSpec::default()
        });

        let paths = ServerPaths {
            pid_dir: tmp.path().join("pids"),
            cert_dir: tmp.path().join("certs"),
        };
        let pid_file = paths.pid_dir.join("web.pid");

        let (trigger, mut fired) = watch::channel(false);
        let server = tokio::spawn(run_until(config, paths, async move {
            let _ = fired.changed().await;
        }));

        // Wait for the management API to come up.
        let mgmt_addr = format!("127.0.0.1:{}", http_port + 1000);
        let mut ready = false;
        for _ in 0..100 {
            if TcpStream::connect(&mgmt_addr).is_ok() {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(ready, "management api never came up");

        let (status, body) = http_get(&mgmt_addr, "localhost", "/api/ping");
        assert_eq!(status, 200);
        assert!(body.contains("\"ok\""));

        let (status, body) = http_get(&mgmt_addr, "localhost", "/api/status");
        assert_eq!(status, 200);
        assert!(body.contains("\"web\""));

        assert!(pid_file.exists());

        // Routed host with a child that serves nothing: bad gateway.
        let proxy_addr = format!("127.0.0.1:{http_port}");
        let (status, body) = http_get(&proxy_addr, "web.localhost", "/x");
        assert_eq!(status, 502);
        assert_eq!(body, "Bad Gateway");

        // Unknown host: routing miss.
        let (status, body) = http_get(&proxy_addr, "zzz.localhost", "/");
        assert_eq!(status, 404);
        assert_eq!(body, "Domain not found");

        trigger.send(true).unwrap();
        server.await.unwrap().unwrap();
        assert!(!pid_file.exists(), "pid file should be removed on stop");
    }
}
