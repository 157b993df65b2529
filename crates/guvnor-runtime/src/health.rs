// SPDX-License-Identifier: Apache-2.0

//! Periodic HTTP health probing with restart escalation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::warn;

use guvnor_config::AppSpec;

use crate::logring::{LogLevel, LogRing};
use crate::supervisor::Supervisor;

/// Delay before the first probe of a freshly started fleet.
pub const STARTUP_GRACE: Duration = Duration::from_secs(5);
/// User agent sent with every probe request.
pub const PROBE_USER_AGENT: &str = "guvnor-healthcheck/1.0";
/// Maximum bytes of response body kept for reporting.
const SNIPPET_LIMIT: usize = 1024;

/// Probe verdict for one app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Latest probe result for one app, exposed over the management API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: HealthState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    pub response_snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Probes each health-checked app and asks the supervisor for a restart
/// after sustained failure. One probe is outstanding per app.
pub struct HealthProber {
    supervisor: Arc<Supervisor>,
    logs: Arc<LogRing>,
    client: reqwest::Client,
    results: Arc<RwLock<HashMap<String, HealthStatus>>>,
    grace: Duration,
}

impl HealthProber {
    pub fn new(supervisor: Arc<Supervisor>, logs: Arc<LogRing>) -> Self {
        HealthProber {
            supervisor,
            logs,
            client: reqwest::Client::new(),
            results: Arc::new(RwLock::new(HashMap::new())),
            grace: STARTUP_GRACE,
        }
    }

    /// Overrides the initial grace delay.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Latest probe results keyed by app name.
    pub async fn snapshot(&self) -> HashMap<String, HealthStatus> {
        self.results.read().await.clone()
    }

    /// Spawns one probe loop per health-checked app.
    pub fn spawn(
        self: &Arc<Self>,
        apps: &[AppSpec],
        shutdown: watch::Receiver<bool>,
    ) -> Vec<JoinHandle<()>> {
        apps.iter()
            .filter(|app| app.health_check.enabled)
            .map(|app| {
                let prober = Arc::clone(self);
                let app = app.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    prober.probe_loop(app, shutdown).await;
                })
            })
            .collect()
    }

    async fn probe_loop(self: Arc<Self>, app: AppSpec, mut shutdown: watch::Receiver<bool>) {
        tokio::select! {
            _ = tokio::time::sleep(self.grace) => {}
            _ = shutdown.changed() => return,
        }

        let mut failures: u32 = 0;
        loop {
            let running = match self.supervisor.get(&app.name).await {
                Some(process) => process.is_running().await,
                None => false,
            };

            if !running {
                // Not counted as a failure.
                self.record(&app.name, unknown_status()).await;
            } else {
                let status = self.probe_once(&app).await;
                let healthy = status.status == HealthState::Healthy;
                self.record(&app.name, status).await;

                if healthy {
                    failures = 0;
                } else {
                    failures += 1;
                }

                if failures >= app.health_check.retries && app.restart_policy.enabled {
                    warn!(
                        name = %app.name,
                        failures,
                        "health checks failing, restarting process"
                    );
                    self.logs.append(
                        &app.name,
                        LogLevel::Warn,
                        format!("health check failed {failures} time(s), restarting"),
                    );
                    match self.supervisor.restart(&app.name).await {
                        Ok(()) => {
                            failures = 0;
                            self.logs.append(
                                &app.name,
                                LogLevel::Info,
                                "restarted after failed health checks",
                            );
                        }
                        Err(e) => {
                            self.logs.append(
                                &app.name,
                                LogLevel::Error,
                                format!("health restart failed: {e}"),
                            );
                        }
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(app.health_check.interval()) => {}
                _ = shutdown.changed() => return,
            }
        }
    }

    /// Performs one probe against the app's loopback endpoint.
    async fn probe_once(&self, app: &AppSpec) -> HealthStatus {
        let begun = Instant::now();
        let url = format!(
            "http://127.0.0.1:{}{}",
            app.port, app.health_check.path
        );

        match self
            .client
            .get(&url)
            .header(reqwest::header::USER_AGENT, PROBE_USER_AGENT)
            .timeout(app.health_check.timeout())
            .send()
            .await
        {
            Ok(response) => {
                let code = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let state = if probe_success(code, app.health_check.expected_status) {
                    HealthState::Healthy
                } else {
                    HealthState::Unhealthy
                };
                HealthStatus {
                    status: state,
                    http_status: Some(code),
                    response_snippet: truncate_snippet(body),
                    error: None,
                    timestamp: Utc::now(),
                    duration_ms: begun.elapsed().as_millis() as u64,
                }
            }
            Err(e) => HealthStatus {
                status: HealthState::Unhealthy,
                http_status: None,
                response_snippet: String::new(),
                error: Some(e.to_string()),
                timestamp: Utc::now(),
                duration_ms: begun.elapsed().as_millis() as u64,
            },
        }
    }

    async fn record(&self, name: &str, status: HealthStatus) {
        self.results.write().await.insert(name.to_string(), status);
    }
}

fn unknown_status() -> HealthStatus {
    HealthStatus {
        status: HealthState::Unknown,
        http_status: None,
        response_snippet: String::new(),
        error: None,
        timestamp: Utc::now(),
        duration_ms: 0,
    }
}

/// A probe succeeds on 2xx, or on an exact match when an expected
/// status is configured.
fn probe_success(status: u16, expected: Option<u16>) -> bool {
    match expected {
        Some(expected) => status == expected,
        None => (200..300).contains(&status),
    }
}

/// Truncates a body to the snippet limit on a char boundary.
fn truncate_snippet(mut body: String) -> String {
    if body.len() > SNIPPET_LIMIT {
        let mut cut = SNIPPET_LIMIT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}
