// SPDX-License-Identifier: Apache-2.0

//! Process supervision runtime for Guvnor.
//!
//! Owns the managed children (spawn, observe, stop, PID files), the
//! bounded in-memory log ring they report into, and the health prober
//! that drives restarts on sustained probe failure.

pub mod health;
pub mod logring;
pub mod process;
pub mod supervisor;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use health::{HealthProber, HealthState, HealthStatus, STARTUP_GRACE};
pub use logring::{LogLevel, LogRecord, LogRing, SharedLogSink};
pub use process::{Process, ProcessInfo, ProcessState, StopResult, StopStatus};
pub use supervisor::Supervisor;

/// Errors produced by process and supervisor operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("process {name} is already running")]
    AlreadyRunning { name: String },

    #[error("no process named {name}")]
    NotFound { name: String },

    #[error("process {name} was recovered without a spec and is externally owned")]
    ExternallyOwned { name: String },

    #[error("failed to spawn {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to signal pid {pid}: {message}")]
    Signal { pid: u32, message: String },

    #[error("failed to write pid file {path}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}
