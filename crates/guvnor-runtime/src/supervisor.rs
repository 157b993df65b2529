// SPDX-License-Identifier: Apache-2.0

//! Fleet of managed processes with PID-file recovery.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinSet;
use tracing::{debug, info};

use guvnor_config::AppSpec;

use crate::logring::{LogLevel, LogRing};
use crate::process::{process_is_alive, Process, ProcessInfo, StopResult, StopStatus};
use crate::RuntimeError;

/// Owns the `name → Process` map and fleet operations.
///
/// Lock order is always the supervisor map first, then the individual
/// process mutex; never the reverse.
pub struct Supervisor {
    pid_dir: PathBuf,
    logs: Arc<LogRing>,
    shutdown: watch::Receiver<bool>,
    processes: RwLock<HashMap<String, Arc<Process>>>,
}

impl Supervisor {
    /// Creates the supervisor and recovers state from PID files.
    ///
    /// Each `{name}.pid` with a live pid becomes a Running entry owned
    /// externally until `adopt_specs` re-attaches its configuration;
    /// stale files are removed.
    pub fn new(
        pid_dir: impl Into<PathBuf>,
        logs: Arc<LogRing>,
        shutdown: watch::Receiver<bool>,
    ) -> io::Result<Self> {
        let pid_dir = pid_dir.into();
        std::fs::create_dir_all(&pid_dir)?;
        let processes = recover(&pid_dir, &logs)?;
        Ok(Supervisor {
            pid_dir,
            logs,
            shutdown,
            processes: RwLock::new(processes),
        })
    }

    /// Re-attaches specs to recovered processes with matching names.
    pub async fn adopt_specs(&self, apps: &[AppSpec]) {
        let processes = self.processes.read().await;
        for app in apps {
            if let Some(process) = processes.get(&app.name) {
                process.adopt_spec(app.clone()).await;
            }
        }
    }

    /// Starts one app, rejecting the call when it is already running.
    pub async fn start(&self, spec: &AppSpec) -> Result<(), RuntimeError> {
        let mut processes = self.processes.write().await;
        if let Some(existing) = processes.get(&spec.name) {
            if existing.is_running().await {
                return Err(RuntimeError::AlreadyRunning {
                    name: spec.name.clone(),
                });
            }
        }

        let process = Arc::new(Process::new(
            spec.clone(),
            &self.pid_dir,
            Arc::clone(&self.logs),
        ));
        let started = process.start(self.shutdown.clone()).await;
        // Keep failed entries visible so status reports the Failed state.
        processes.insert(spec.name.clone(), process);
        started
    }

    pub async fn stop(&self, name: &str) -> Result<StopResult, RuntimeError> {
        let process = self.get(name).await.ok_or_else(|| RuntimeError::NotFound {
            name: name.to_string(),
        })?;
        process.stop().await
    }

    /// Restarts one app through its process lock, serializing with any
    /// health-prober-initiated restart.
    pub async fn restart(&self, name: &str) -> Result<(), RuntimeError> {
        let process = self.get(name).await.ok_or_else(|| RuntimeError::NotFound {
            name: name.to_string(),
        })?;
        if process.is_external().await {
            return Err(RuntimeError::ExternallyOwned {
                name: name.to_string(),
            });
        }
        process.restart(self.shutdown.clone()).await
    }

    /// Stops every process concurrently and collects per-app results.
    ///
    /// Individual failures land in their result entry with
    /// `status = error`; the remaining stops still execute.
    pub async fn stop_all(&self) -> Vec<StopResult> {
        let snapshot: Vec<Arc<Process>> = {
            let processes = self.processes.read().await;
            processes.values().cloned().collect()
        };

        let mut tasks = JoinSet::new();
        for process in snapshot {
            tasks.spawn(async move {
                let name = process.name().to_string();
                match process.stop().await {
                    Ok(result) => result,
                    Err(e) => StopResult {
                        name,
                        pid: 0,
                        status: StopStatus::Error,
                        duration_ms: 0,
                        error: Some(e.to_string()),
                    },
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            if let Ok(result) = joined {
                results.push(result);
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        results
    }

    pub async fn get(&self, name: &str) -> Option<Arc<Process>> {
        self.processes.read().await.get(name).cloned()
    }

    /// Snapshot of the process map.
    pub async fn list(&self) -> HashMap<String, Arc<Process>> {
        self.processes.read().await.clone()
    }

    /// Per-process info snapshots, sorted by name. Includes recovered
    /// externally-owned entries.
    pub async fn running_info(&self) -> Vec<ProcessInfo> {
        let snapshot: Vec<Arc<Process>> = {
            let processes = self.processes.read().await;
            processes.values().cloned().collect()
        };
        let mut infos = Vec::with_capacity(snapshot.len());
        for process in snapshot {
            infos.push(process.info().await);
        }
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }
}

/// Scans a PID directory, keeping live pids and removing stale files.
fn recover(pid_dir: &Path, logs: &Arc<LogRing>) -> io::Result<HashMap<String, Arc<Process>>> {
    let mut processes = HashMap::new();
    for entry in std::fs::read_dir(pid_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("pid") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        let pid = std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| content.trim().parse::<u32>().ok())
            .unwrap_or(0);

        if pid != 0 && process_is_alive(pid) {
            info!(name, pid, "recovered running process from pid file");
            logs.append(
                &name,
                LogLevel::Info,
                format!("recovered running process (pid {pid})"),
            );
            processes.insert(
                name.clone(),
                Arc::new(Process::recovered(&name, pid, path, Arc::clone(logs))),
            );
        } else {
            debug!(name, pid, "removing stale pid file");
            let _ = std::fs::remove_file(&path);
        }
    }
    Ok(processes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcessState;
    use guvnor_config::RestartPolicy;

    fn logs() -> Arc<LogRing> {
        Arc::new(LogRing::new(100))
    }

    fn shutdown_rx() -> watch::Receiver<bool> {
        static CHANNEL: std::sync::OnceLock<watch::Sender<bool>> = std::sync::OnceLock::new();
        CHANNEL.get_or_init(|| watch::channel(false).0).subscribe()
    }

    #[cfg(unix)]
    fn sleep_spec(name: &str) -> AppSpec {
        AppSpec {
            name: name.to_string(),
            command: "sh".to_string(),
            args: vec!["-c".to_string(), "sleep 60".to_string()],
            restart_policy: RestartPolicy {
                enabled: false,
                max_retries: 0,
                backoff_secs: 0,
            },
            ..AppSpec::default()
        }
    }

    #[cfg(unix)]
    fn supervisor(pid_dir: &Path) -> Supervisor {
        Supervisor::new(pid_dir, logs(), shutdown_rx()).unwrap()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_stop_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = supervisor(tmp.path());

        supervisor.start(&sleep_spec("web")).await.unwrap();
        let info = supervisor.running_info().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].state, ProcessState::Running);

        let result = supervisor.stop("web").await.unwrap();
        assert_eq!(result.status, StopStatus::Stopped);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_rejects_running_app() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = supervisor(tmp.path());

        supervisor.start(&sleep_spec("web")).await.unwrap();
        let err = supervisor.start(&sleep_spec("web")).await.unwrap_err();
        assert!(matches!(err, RuntimeError::AlreadyRunning { .. }));
        supervisor.stop_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_unknown_app_reports_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = supervisor(tmp.path());
        assert!(matches!(
            supervisor.stop("ghost").await.unwrap_err(),
            RuntimeError::NotFound { .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_all_is_idempotent_when_nothing_runs() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = supervisor(tmp.path());

        supervisor.start(&sleep_spec("web")).await.unwrap();
        supervisor.start(&sleep_spec("api")).await.unwrap();

        let first = supervisor.stop_all().await;
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|r| r.status == StopStatus::Stopped));
        assert_eq!(first[0].name, "api");

        let second = supervisor.stop_all().await;
        assert!(second.iter().all(|r| r.status == StopStatus::NotRunning));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn recovery_keeps_live_pids_and_removes_stale_files() {
        let tmp = tempfile::tempdir().unwrap();

        // A live pid: this test process itself.
        std::fs::write(tmp.path().join("alive.pid"), format!("{}\n", std::process::id())).unwrap();
        // A dead pid: a child that has already exited.
        let mut child = std::process::Command::new("sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        let dead_pid = child.id();
        child.wait().unwrap();
        std::fs::write(tmp.path().join("dead.pid"), format!("{dead_pid}\n")).unwrap();
        // Not a pid file at all.
        std::fs::write(tmp.path().join("notes.txt"), "keep me").unwrap();

        let supervisor = supervisor(tmp.path());
        let info = supervisor.running_info().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].name, "alive");
        assert!(info[0].external);
        assert_eq!(info[0].state, ProcessState::Running);

        assert!(!tmp.path().join("dead.pid").exists());
        assert!(tmp.path().join("alive.pid").exists());
        assert!(tmp.path().join("notes.txt").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn recovered_without_spec_is_not_restartable() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("ghost.pid"), format!("{}\n", std::process::id())).unwrap();

        let supervisor = supervisor(tmp.path());
        assert!(matches!(
            supervisor.restart("ghost").await.unwrap_err(),
            RuntimeError::ExternallyOwned { .. }
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn adopt_specs_reattaches_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        // Recovered entry backed by a real child we control.
        let mut child = std::process::Command::new("sh")
            .args(["-c", "sleep 60"])
            .spawn()
            .unwrap();
        let old_pid = child.id();
        // Reap the child once it is signalled so liveness probes see it exit.
        std::thread::spawn(move || {
            let _ = child.wait();
        });
        std::fs::write(tmp.path().join("web.pid"), format!("{old_pid}\n")).unwrap();

        let supervisor = supervisor(tmp.path());
        supervisor.adopt_specs(&[sleep_spec("web")]).await;

        let process = supervisor.get("web").await.unwrap();
        assert!(!process.is_external().await);
        let info = process.info().await;
        assert_eq!(info.command, "sh");

        // Now restart-eligible: the old pid is stopped and a new child spawned.
        supervisor.restart("web").await.unwrap();
        let new_pid = supervisor.get("web").await.unwrap().pid().await;
        assert_ne!(new_pid, old_pid);
        supervisor.stop_all().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_start_remains_visible() {
        let tmp = tempfile::tempdir().unwrap();
        let supervisor = supervisor(tmp.path());

        let mut spec = sleep_spec("web");
        spec.command = "/nonexistent/guvnor-test-binary".to_string();
        assert!(supervisor.start(&spec).await.is_err());

        let info = supervisor.running_info().await;
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].state, ProcessState::Failed);
    }
}
