// SPDX-License-Identifier: Apache-2.0

//! HTTP client for a running supervisor's management API.

use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Management ports probed when the configuration gives no answer.
const CANDIDATE_PORTS: [u16; 4] = [9080, 9081, 9082, 9090];
/// Per-probe deadline while discovering a running supervisor.
const PROBE_TIMEOUT: Duration = Duration::from_millis(800);

/// Client bound to one discovered management API endpoint.
pub struct ApiClient {
    base: String,
    client: reqwest::Client,
}

impl ApiClient {
    /// Finds a running supervisor by probing `/api/ping` on the port
    /// derived from the configuration, then on fixed candidates.
    pub async fn discover(config_path: Option<&str>) -> Option<ApiClient> {
        let mut candidates = Vec::new();
        let configured = config_path.unwrap_or("guvnor.toml");
        if let Ok(config) = guvnor_config::load(Path::new(configured)) {
            candidates.push(config.server.management_port());
        }
        for port in CANDIDATE_PORTS {
            if !candidates.contains(&port) {
                candidates.push(port);
            }
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .ok()?;

        for port in candidates {
            let url = format!("http://127.0.0.1:{port}/api/ping");
            match client.get(&url).timeout(PROBE_TIMEOUT).send().await {
                Ok(response) if response.status().is_success() => {
                    return Some(ApiClient {
                        base: format!("http://127.0.0.1:{port}"),
                        client,
                    });
                }
                _ => continue,
            }
        }
        None
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, String> {
        let url = format!("{}{path}", self.base);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;
        read_json(response).await
    }

    pub async fn post_json(&self, path: &str) -> Result<Value, String> {
        let url = format!("{}{path}", self.base);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;
        read_json(response).await
    }

    /// Follows the SSE log stream, invoking the callback per event
    /// until the server closes the stream.
    pub async fn stream_logs(
        &self,
        process: Option<&str>,
        mut on_event: impl FnMut(&Value),
    ) -> Result<(), String> {
        let mut url = format!("{}/api/logs/stream", self.base);
        if let Some(process) = process {
            url.push_str(&format!("?process={process}"));
        }

        let mut response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(24 * 60 * 60))
            .send()
            .await
            .map_err(|e| format!("request to {url} failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("stream rejected with {}", response.status()));
        }

        let mut buffer = String::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| format!("stream read failed: {e}"))?
        {
            buffer.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(end) = buffer.find("\n\n") {
                let event: String = buffer.drain(..end + 2).collect();
                for line in event.lines() {
                    if let Some(data) = line.strip_prefix("data: ") {
                        if let Ok(value) = serde_json::from_str::<Value>(data) {
                            on_event(&value);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

async fn read_json(response: reqwest::Response) -> Result<Value, String> {
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .map_err(|e| format!("invalid response body: {e}"))?;
    if status.is_success() {
        Ok(body)
    } else {
        let message = body["error"].as_str().unwrap_or("unknown error");
        Err(format!("{status}: {message}"))
    }
}
