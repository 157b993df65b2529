// SPDX-License-Identifier: Apache-2.0

//! Loopback management API for CLI clients.
//!
//! JSON endpoints over `127.0.0.1:{http_port + 1000}` plus a
//! Server-Sent-Events log stream that pushes the records produced
//! since the previous tick.

use http_body_util::{combinators::BoxBody, BodyExt, Full, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CACHE_CONTROL, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use guvnor_runtime::{HealthProber, LogRing, RuntimeError, Supervisor};

use crate::ProxyError;

/// Default number of records returned by the log endpoints.
const DEFAULT_LOG_LINES: usize = 100;
/// Cadence of the SSE log stream.
const STREAM_TICK: Duration = Duration::from_secs(1);

type ApiBody = BoxBody<Bytes, Infallible>;

/// Read/control endpoints bound to loopback only.
pub struct ManagementApi {
    state: Arc<ApiState>,
}

struct ApiState {
    supervisor: Arc<Supervisor>,
    logs: Arc<LogRing>,
    prober: Option<Arc<HealthProber>>,
    shutdown: watch::Receiver<bool>,
}

impl ManagementApi {
    pub fn new(
        supervisor: Arc<Supervisor>,
        logs: Arc<LogRing>,
        prober: Option<Arc<HealthProber>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        ManagementApi {
            state: Arc::new(ApiState {
                supervisor,
                logs,
                prober,
                shutdown,
            }),
        }
    }

    /// Serves the API until the shutdown channel fires.
    pub async fn run(&self, port: u16) -> Result<(), ProxyError> {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind { addr, source })?;
        info!(%addr, "management api ready");

        let mut shutdown = self.state.shutdown.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!(error = %e, "management accept failed");
                            continue;
                        }
                    };
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        let service = service_fn(move |req: Request<Incoming>| {
                            let state = Arc::clone(&state);
                            async move { Ok::<_, Infallible>(dispatch(state, req).await) }
                        });
                        if let Err(e) = auto::Builder::new(TokioExecutor::new())
                            .serve_connection(TokioIo::new(stream), service)
                            .await
                        {
                            debug!(%peer, error = %e, "management connection closed with error");
                        }
                    });
                }
                _ = shutdown.changed() => break,
            }
        }
        Ok(())
    }
}

/// Routes one request to its handler; unknown paths get JSON errors.
async fn dispatch<B>(state: Arc<ApiState>, req: Request<B>) -> Response<ApiBody> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    if method == Method::OPTIONS {
        return json_response(StatusCode::OK, json!({}));
    }

    match (method, path.as_str()) {
        (Method::GET, "/api/ping") => json_response(
            StatusCode::OK,
            json!({"status": "ok", "time": chrono::Utc::now().to_rfc3339()}),
        ),

        (Method::GET, "/api/status") => {
            let processes = state.supervisor.running_info().await;
            json_response(
                StatusCode::OK,
                json!({
                    "processes": processes,
                    "count": processes.len(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }),
            )
        }

        (Method::GET, "/api/health") => {
            let results = match &state.prober {
                Some(prober) => prober.snapshot().await,
                None => Default::default(),
            };
            json_response(
                StatusCode::OK,
                json!({"checks": results, "timestamp": chrono::Utc::now().to_rfc3339()}),
            )
        }

        (Method::GET, "/api/logs") => {
            let process = query_param(query.as_deref(), "process");
            let lines = lines_param(query.as_deref());
            let records = match process.as_deref() {
                Some(tag) => state.logs.tail_by_tag(tag, lines),
                None => state.logs.merged(lines),
            };
            json_response(
                StatusCode::OK,
                json!({"logs": records, "count": records.len()}),
            )
        }

        (Method::GET, "/api/logs/stream") => {
            stream_response(state, query_param(query.as_deref(), "process"))
        }

        (Method::GET, rest) if rest.starts_with("/api/logs/") => {
            let process = rest.trim_start_matches("/api/logs/");
            if process.is_empty() || process.contains('/') {
                return error_response(StatusCode::NOT_FOUND, "unknown log target");
            }
            let records = state
                .logs
                .tail_by_tag(process, lines_param(query.as_deref()));
            json_response(
                StatusCode::OK,
                json!({"process": process, "logs": records, "count": records.len()}),
            )
        }

        (Method::POST, "/api/stop") => {
            let results = state.supervisor.stop_all().await;
            json_response(
                StatusCode::OK,
                json!({
                    "results": results,
                    "count": results.len(),
                    "timestamp": chrono::Utc::now().to_rfc3339(),
                }),
            )
        }

        (Method::POST, rest) if rest.starts_with("/api/restart/") => {
            let process = rest.trim_start_matches("/api/restart/");
            if process.is_empty() || process.contains('/') {
                return error_response(StatusCode::NOT_FOUND, "unknown process");
            }
            match state.supervisor.restart(process).await {
                Ok(()) => json_response(
                    StatusCode::OK,
                    json!({"status": "restarted", "process": process}),
                ),
                Err(RuntimeError::NotFound { .. }) => {
                    error_response(StatusCode::NOT_FOUND, "unknown process")
                }
                Err(RuntimeError::ExternallyOwned { .. }) => {
                    error_response(StatusCode::CONFLICT, "process is externally owned")
                }
                Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, &e.to_string()),
            }
        }

        (method, "/api/ping" | "/api/status" | "/api/health" | "/api/logs" | "/api/stop") => {
            error_response(
                StatusCode::METHOD_NOT_ALLOWED,
                &format!("{method} not allowed"),
            )
        }

        _ => error_response(StatusCode::NOT_FOUND, "not found"),
    }
}

/// SSE stream of log records produced since the previous tick.
fn stream_response(state: Arc<ApiState>, process: Option<String>) -> Response<ApiBody> {
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Frame<Bytes>, Infallible>>(16);
    let logs = Arc::clone(&state.logs);
    let mut shutdown = state.shutdown.clone();

    tokio::spawn(async move {
        let mut last_seq = logs.latest_seq();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(STREAM_TICK) => {}
                _ = shutdown.changed() => break,
            }

            let records = logs.since(last_seq, process.as_deref());
            let frame = if records.is_empty() {
                // Heartbeat comment; also detects a gone client.
                Bytes::from_static(b": keep-alive\n\n")
            } else {
                last_seq = records.last().map(|r| r.sequence()).unwrap_or(last_seq);
                let payload = json!({"type": "logs", "logs": records});
                Bytes::from(format!("data: {payload}\n\n"))
            };
            if tx.send(Ok(Frame::data(frame))).await.is_err() {
                // Client disconnected; terminate promptly.
                break;
            }
        }
    });

    let stream =
        futures_util::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|f| (f, rx)) });
    let mut response = Response::new(BodyExt::boxed(StreamBody::new(stream)));
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    apply_cors(response.headers_mut());
    response
}

fn json_response(status: StatusCode, value: serde_json::Value) -> Response<ApiBody> {
    let body = Full::new(Bytes::from(value.to_string()))
        .map_err(|never| match never {})
        .boxed();
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    apply_cors(response.headers_mut());
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<ApiBody> {
    json_response(status, json!({"error": message}))
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("http://localhost:*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("Content-Type"),
    );
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    let query = query?;
    for pair in query.split('&') {
        if let Some((name, value)) = pair.split_once('=') {
            if name == key && !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

fn lines_param(query: Option<&str>) -> usize {
    query_param(query, "lines")
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_LOG_LINES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use guvnor_runtime::LogLevel;

    fn shutdown_rx() -> watch::Receiver<bool> {
        static CHANNEL: std::sync::OnceLock<watch::Sender<bool>> = std::sync::OnceLock::new();
        CHANNEL.get_or_init(|| watch::channel(false).0).subscribe()
    }

    fn api(tmp: &std::path::Path) -> (Arc<ApiState>, Arc<LogRing>) {
        let logs = Arc::new(LogRing::new(100));
        let supervisor =
            Arc::new(Supervisor::new(tmp, Arc::clone(&logs), shutdown_rx()).unwrap());
        let api = ManagementApi::new(supervisor, Arc::clone(&logs), None, shutdown_rx());
        (api.state, logs)
    }

    fn get(path: &str) -> Request<()> {
        Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(())
            .unwrap()
    }

    fn post(path: &str) -> Request<()> {
        Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(())
            .unwrap()
    }

    async fn body_json(response: Response<ApiBody>) -> serde_json::Value {
        let collected = response.into_body().collect().await.unwrap();
        serde_json::from_slice(&collected.to_bytes()).unwrap()
    }

    #[tokio::test]
    async fn ping_reports_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _) = api(tmp.path());

        let response = dispatch(state, get("/api/ping")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["time"].is_string());
    }

    #[tokio::test]
    async fn status_lists_processes() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _) = api(tmp.path());

        let body = body_json(dispatch(state, get("/api/status")).await).await;
        assert_eq!(body["count"], 0);
        assert!(body["processes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn logs_endpoints_filter_by_process() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, logs) = api(tmp.path());
        logs.append("web", LogLevel::Info, "w0");
        logs.append("api", LogLevel::Warn, "a0");
        logs.append("web", LogLevel::Info, "w1");

        let merged = body_json(dispatch(Arc::clone(&state), get("/api/logs")).await).await;
        assert_eq!(merged["count"], 3);

        let scoped =
            body_json(dispatch(Arc::clone(&state), get("/api/logs/web?lines=1")).await).await;
        assert_eq!(scoped["count"], 1);
        assert_eq!(scoped["logs"][0]["message"], "w1");

        let by_param =
            body_json(dispatch(state, get("/api/logs?process=api")).await).await;
        assert_eq!(by_param["count"], 1);
        assert_eq!(by_param["logs"][0]["tag"], "api");
    }

    #[tokio::test]
    async fn stop_returns_empty_results_for_idle_fleet() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _) = api(tmp.path());

        let body = body_json(dispatch(state, post("/api/stop")).await).await;
        assert_eq!(body["count"], 0);
        assert!(body["results"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn restart_unknown_process_is_404() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _) = api(tmp.path());

        let response = dispatch(state, post("/api/restart/ghost")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn wrong_method_is_405_and_unknown_path_404() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _) = api(tmp.path());

        let response = dispatch(Arc::clone(&state), post("/api/ping")).await;
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);

        let response = dispatch(state, get("/api/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn options_returns_cors_headers() {
        let tmp = tempfile::tempdir().unwrap();
        let (state, _) = api(tmp.path());

        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/api/status")
            .body(())
            .unwrap();
        let response = dispatch(state, request).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-origin")
                .unwrap(),
            "http://localhost:*"
        );
        assert_eq!(
            response
                .headers()
                .get("access-control-allow-methods")
                .unwrap(),
            "GET, POST, OPTIONS"
        );
    }
}
