// SPDX-License-Identifier: Apache-2.0

//! One managed OS child: spawn, observe, stop, PID file, restart loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use guvnor_config::AppSpec;

use crate::logring::{LogLevel, LogRing};
use crate::RuntimeError;

/// Graceful window between SIGTERM and SIGKILL.
pub const STOP_GRACE: Duration = Duration::from_secs(10);
/// How long to wait for a process to disappear after SIGKILL.
const KILL_WAIT: Duration = Duration::from_secs(5);
/// Pause between the stop and start halves of a restart.
const RESTART_PAUSE: Duration = Duration::from_secs(1);
/// Liveness poll interval while waiting for an exit.
const EXIT_POLL: Duration = Duration::from_millis(100);

/// Lifecycle state of a managed child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessState::Stopped => write!(f, "stopped"),
            ProcessState::Starting => write!(f, "starting"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopping => write!(f, "stopping"),
            ProcessState::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome category of one stop operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopStatus {
    Stopped,
    Killed,
    NotRunning,
    Error,
}

/// Per-app result of a stop operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopResult {
    pub name: String,
    pub pid: u32,
    pub status: StopStatus,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of a process for status listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub name: String,
    pub pid: u32,
    pub state: ProcessState,
    pub restarts: u32,
    pub command: String,
    pub args: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub port: u16,
    pub external: bool,
}

struct Inner {
    spec: Option<AppSpec>,
    state: ProcessState,
    pid: u32,
    started_at: Option<DateTime<Utc>>,
    restart_count: u32,
    stop_requested: bool,
    external: bool,
}

/// One managed child process. All transitions happen under the inner
/// mutex; readers receive snapshots.
pub struct Process {
    name: String,
    pid_file: PathBuf,
    logs: Arc<LogRing>,
    inner: Mutex<Inner>,
}

impl Process {
    /// Creates a process for a validated app spec. Does not spawn.
    pub fn new(spec: AppSpec, pid_dir: &std::path::Path, logs: Arc<LogRing>) -> Self {
        let name = spec.name.clone();
        Process {
            pid_file: pid_dir.join(format!("{name}.pid")),
            name,
            logs,
            inner: Mutex::new(Inner {
                spec: Some(spec),
                state: ProcessState::Stopped,
                pid: 0,
                started_at: None,
                restart_count: 0,
                stop_requested: false,
                external: false,
            }),
        }
    }

    /// Wraps an already-running pid recovered from a PID file.
    ///
    /// Recovered processes are externally owned until a spec is adopted:
    /// they are observable and stoppable but never restarted.
    pub fn recovered(name: &str, pid: u32, pid_file: PathBuf, logs: Arc<LogRing>) -> Self {
        Process {
            name: name.to_string(),
            pid_file,
            logs,
            inner: Mutex::new(Inner {
                spec: None,
                state: ProcessState::Running,
                pid,
                started_at: None,
                restart_count: 0,
                stop_requested: false,
                external: true,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Re-attaches a spec to a recovered process, making it restart-eligible.
    pub async fn adopt_spec(&self, spec: AppSpec) {
        let mut inner = self.inner.lock().await;
        if inner.spec.is_none() {
            inner.spec = Some(spec);
            inner.external = false;
        }
    }

    pub async fn state(&self) -> ProcessState {
        self.inner.lock().await.state
    }

    pub async fn pid(&self) -> u32 {
        self.inner.lock().await.pid
    }

    pub async fn restart_count(&self) -> u32 {
        self.inner.lock().await.restart_count
    }

    pub async fn is_external(&self) -> bool {
        self.inner.lock().await.external
    }

    pub async fn info(&self) -> ProcessInfo {
        let inner = self.inner.lock().await;
        ProcessInfo {
            name: self.name.clone(),
            pid: inner.pid,
            state: inner.state,
            restarts: inner.restart_count,
            command: inner
                .spec
                .as_ref()
                .map(|s| s.command.clone())
                .unwrap_or_default(),
            args: inner
                .spec
                .as_ref()
                .map(|s| s.args.clone())
                .unwrap_or_default(),
            started_at: inner.started_at,
            port: inner.spec.as_ref().map(|s| s.port).unwrap_or(0),
            external: inner.external,
        }
    }

    /// Returns whether the child is running, probing the pid with signal 0.
    /// A failed probe transitions the state to stopped.
    pub async fn is_running(&self) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.state != ProcessState::Running {
            return false;
        }
        if inner.pid != 0 && process_is_alive(inner.pid) {
            return true;
        }
        inner.state = ProcessState::Stopped;
        inner.pid = 0;
        let _ = std::fs::remove_file(&self.pid_file);
        false
    }

    /// Spawns the child and the supervision task that restarts it on
    /// non-zero exits while the restart policy allows.
    pub async fn start(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), RuntimeError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            ProcessState::Running | ProcessState::Starting | ProcessState::Stopping => {
                return Err(RuntimeError::AlreadyRunning {
                    name: self.name.clone(),
                });
            }
            ProcessState::Stopped | ProcessState::Failed => {}
        }
        let Some(spec) = inner.spec.clone() else {
            return Err(RuntimeError::ExternallyOwned {
                name: self.name.clone(),
            });
        };

        inner.state = ProcessState::Starting;
        inner.stop_requested = false;

        let mut child = match spawn_child(&spec) {
            Ok(child) => child,
            Err(source) => {
                inner.state = ProcessState::Failed;
                self.logs.append(
                    &self.name,
                    LogLevel::Error,
                    format!("failed to start: {source}"),
                );
                return Err(RuntimeError::Spawn {
                    name: self.name.clone(),
                    source,
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        self.write_pid_file(pid)?;
        self.attach_output(&mut child);

        inner.pid = pid;
        inner.state = ProcessState::Running;
        inner.started_at = Some(Utc::now());
        drop(inner);

        self.logs
            .append(&self.name, LogLevel::Info, format!("started (pid {pid})"));

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.supervise(child, spec, shutdown).await;
        });
        Ok(())
    }

    /// Stops the child: SIGTERM to the process group, a 10 s graceful
    /// window, then SIGKILL. Removes the PID file.
    pub async fn stop(&self) -> Result<StopResult, RuntimeError> {
        let begun = Instant::now();
        let pid = {
            let mut inner = self.inner.lock().await;
            match inner.state {
                ProcessState::Running | ProcessState::Starting => {}
                _ => {
                    return Ok(self.stop_result(StopStatus::NotRunning, 0, begun, None));
                }
            }
            if inner.pid == 0 || !process_is_alive(inner.pid) {
                // Also parks a supervision task waiting out a backoff.
                inner.stop_requested = true;
                inner.state = ProcessState::Stopped;
                inner.pid = 0;
                let _ = std::fs::remove_file(&self.pid_file);
                return Ok(self.stop_result(StopStatus::NotRunning, 0, begun, None));
            }
            inner.stop_requested = true;
            inner.state = ProcessState::Stopping;
            inner.pid
        };

        if let Err(e) = terminate_group(pid) {
            let mut inner = self.inner.lock().await;
            inner.state = ProcessState::Stopped;
            inner.pid = 0;
            return Ok(self.stop_result(StopStatus::Error, pid, begun, Some(e.to_string())));
        }

        let mut killed = false;
        if !wait_for_exit(pid, STOP_GRACE).await {
            warn!(name = %self.name, pid, "graceful window exceeded, sending SIGKILL");
            kill_group(pid);
            killed = true;
            wait_for_exit(pid, KILL_WAIT).await;
        }

        {
            let mut inner = self.inner.lock().await;
            inner.state = ProcessState::Stopped;
            inner.pid = 0;
            inner.started_at = None;
        }
        let _ = std::fs::remove_file(&self.pid_file);

        let status = if killed {
            self.logs
                .append(&self.name, LogLevel::Warn, "force-killed after stop timeout");
            StopStatus::Killed
        } else {
            self.logs.append(&self.name, LogLevel::Info, "stopped");
            StopStatus::Stopped
        };
        Ok(self.stop_result(status, pid, begun, None))
    }

    /// Stops the child, waits one second, then starts it again.
    pub async fn restart(
        self: &Arc<Self>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), RuntimeError> {
        let _ = self.stop().await?;
        tokio::time::sleep(RESTART_PAUSE).await;
        self.start(shutdown).await
    }

    fn stop_result(
        &self,
        status: StopStatus,
        pid: u32,
        begun: Instant,
        error: Option<String>,
    ) -> StopResult {
        StopResult {
            name: self.name.clone(),
            pid,
            status,
            duration_ms: begun.elapsed().as_millis() as u64,
            error,
        }
    }

    fn write_pid_file(&self, pid: u32) -> Result<(), RuntimeError> {
        std::fs::write(&self.pid_file, format!("{pid}\n")).map_err(|source| {
            RuntimeError::PidFile {
                path: self.pid_file.clone(),
                source,
            }
        })
    }

    /// Pumps child stdout/stderr lines into the log ring under the app tag.
    fn attach_output(&self, child: &mut Child) {
        if let Some(stdout) = child.stdout.take() {
            let logs = Arc::clone(&self.logs);
            let tag = self.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    logs.append(&tag, LogLevel::Info, line);
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let logs = Arc::clone(&self.logs);
            let tag = self.name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    logs.append(&tag, LogLevel::Error, line);
                }
            });
        }
    }

    /// Waits for exits and applies the restart policy. The task is the
    /// child's reaper; it never outlives the last spawned generation.
    async fn supervise(
        self: Arc<Self>,
        mut child: Child,
        spec: AppSpec,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let status = child.wait().await;
            let _ = std::fs::remove_file(&self.pid_file);

            let mut inner = self.inner.lock().await;
            if inner.stop_requested || *shutdown.borrow() {
                // stop() or the composer owns the remaining transitions.
                return;
            }
            let exited_running = inner.state == ProcessState::Running;
            inner.pid = 0;

            let status = match status {
                Ok(status) => status,
                Err(e) => {
                    inner.state = ProcessState::Failed;
                    self.logs.append(
                        &self.name,
                        LogLevel::Error,
                        format!("wait failed: {e}"),
                    );
                    return;
                }
            };

            if status.success() {
                inner.state = ProcessState::Stopped;
                self.logs
                    .append(&self.name, LogLevel::Info, "exited cleanly");
                return;
            }

            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let policy = spec.restart_policy.clone();
            if !(exited_running && policy.enabled && inner.restart_count < policy.max_retries) {
                inner.state = ProcessState::Failed;
                self.logs.append(
                    &self.name,
                    LogLevel::Error,
                    format!("exited with status {code}, not restarting"),
                );
                return;
            }

            inner.restart_count += 1;
            inner.state = ProcessState::Starting;
            let attempt = inner.restart_count;
            drop(inner);

            self.logs.append(
                &self.name,
                LogLevel::Warn,
                format!(
                    "exited with status {code}, restarting in {}s (attempt {attempt}/{})",
                    policy.backoff_secs, policy.max_retries
                ),
            );

            tokio::select! {
                _ = tokio::time::sleep(policy.backoff()) => {}
                _ = shutdown.changed() => return,
            }

            let mut inner = self.inner.lock().await;
            if inner.stop_requested || *shutdown.borrow() {
                inner.state = ProcessState::Stopped;
                return;
            }
            match spawn_child(&spec) {
                Ok(mut next) => {
                    let pid = next.id().unwrap_or(0);
                    if let Err(e) = self.write_pid_file(pid) {
                        debug!(name = %self.name, error = %e, "pid file write failed");
                    }
                    self.attach_output(&mut next);
                    inner.pid = pid;
                    inner.state = ProcessState::Running;
                    inner.started_at = Some(Utc::now());
                    drop(inner);
                    self.logs.append(
                        &self.name,
                        LogLevel::Info,
                        format!("restarted (pid {pid})"),
                    );
                    child = next;
                }
                Err(e) => {
                    inner.state = ProcessState::Failed;
                    self.logs.append(
                        &self.name,
                        LogLevel::Error,
                        format!("restart failed: {e}"),
                    );
                    return;
                }
            }
        }
    }
}

/// Spawns the child with the app environment overlaid on the host
/// environment, in its own process group so signals reach descendants.
fn spawn_child(spec: &AppSpec) -> io::Result<Child> {
    let mut cmd = Command::new(&spec.command);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(false);
    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    #[cfg(unix)]
    unsafe {
        cmd.pre_exec(|| {
            nix::unistd::setsid()
                .map(|_| ())
                .map_err(|e| io::Error::from_raw_os_error(e as i32))
        });
    }

    #[cfg(windows)]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    cmd.spawn()
}

/// Polls liveness until the process disappears or the deadline passes.
async fn wait_for_exit(pid: u32, deadline: Duration) -> bool {
    let begun = Instant::now();
    while begun.elapsed() < deadline {
        if !process_is_alive(pid) {
            return true;
        }
        tokio::time::sleep(EXIT_POLL).await;
    }
    !process_is_alive(pid)
}

/// Returns whether a process responds to signal 0.
#[cfg(unix)]
pub(crate) fn process_is_alive(pid: u32) -> bool {
    nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None).is_ok()
}

/// Returns whether a process responds to signal 0.
#[cfg(windows)]
pub(crate) fn process_is_alive(pid: u32) -> bool {
    let output = std::process::Command::new("cmd")
        .args(["/C", "tasklist", "/FI", &format!("PID eq {pid}")])
        .output();
    match output {
        Ok(out) if out.status.success() => {
            String::from_utf8_lossy(&out.stdout).contains(&pid.to_string())
        }
        _ => false,
    }
}

/// Sends the graceful terminate signal to the child's process group.
///
/// Adopted pids are not necessarily group leaders, so a missing group
/// falls back to signalling the pid itself.
#[cfg(unix)]
fn terminate_group(pid: u32) -> Result<(), RuntimeError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid as i32);
    match killpg(target, Signal::SIGTERM) {
        Ok(()) => Ok(()),
        Err(Errno::ESRCH) => match kill(target, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(RuntimeError::Signal {
                pid,
                message: e.to_string(),
            }),
        },
        Err(e) => Err(RuntimeError::Signal {
            pid,
            message: e.to_string(),
        }),
    }
}

/// Sends the graceful terminate signal to the child's process group.
#[cfg(windows)]
fn terminate_group(pid: u32) -> Result<(), RuntimeError> {
    let status = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T"])
        .status()
        .map_err(|e| RuntimeError::Signal {
            pid,
            message: e.to_string(),
        })?;
    if status.success() {
        Ok(())
    } else {
        Err(RuntimeError::Signal {
            pid,
            message: format!("taskkill exited with {status}"),
        })
    }
}

/// Forcefully kills the child's process group.
#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid as i32);
    if let Err(Errno::ESRCH) = killpg(target, Signal::SIGKILL) {
        let _ = kill(target, Signal::SIGKILL);
    }
}

/// Forcefully kills the child's process group.
#[cfg(windows)]
fn kill_group(pid: u32) {
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/T", "/F"])
        .status();
}
