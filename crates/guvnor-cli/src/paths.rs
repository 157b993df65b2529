//! Path helpers for the Guvnor home, PID, and certificate directories.

use std::path::PathBuf;

/// Returns the Guvnor home directory (`$GUVNOR_HOME` override or `~/.guvnor`).
pub fn guvnor_home() -> Option<PathBuf> {
    // Allow override via GUVNOR_HOME for testing
    if let Ok(home) = std::env::var("GUVNOR_HOME") {
        return Some(PathBuf::from(home));
    }
    dirs::home_dir().map(|h| h.join(".guvnor"))
}

/// Returns the PID file directory (`~/.guvnor/pids`).
pub fn pid_dir() -> Option<PathBuf> {
    guvnor_home().map(|h| h.join("pids"))
}

/// Returns the certificate cache directory (`~/.guvnor/certs`).
pub fn cert_dir() -> Option<PathBuf> {
    guvnor_home().map(|h| h.join("certs"))
}
