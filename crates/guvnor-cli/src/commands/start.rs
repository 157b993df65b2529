// SPDX-License-Identifier: Apache-2.0

//! Command handler for `guvnor start`.

use colored::Colorize;
use std::path::Path;
use std::process::{self, Command, Stdio};

use guvnor_config::GlobalConfig;
use guvnor_proxy::ServerPaths;

use crate::paths;

/// Executes the `guvnor start` command: load, validate, then either
/// run in the foreground or spawn a detached supervisor.
pub fn execute(config_path: &str, foreground: bool) {
    let mut config = match load_config(config_path) {
        Ok(config) => config,
        Err(msg) => {
            eprintln!("{} {}", "✗".red().bold(), msg);
            process::exit(1);
        }
    };

    if let Err(e) = guvnor_config::validate(&mut config) {
        eprintln!("{} Configuration is invalid:", "✗".red().bold());
        for issue in e.issues() {
            eprintln!("  - {issue}");
        }
        if e.issues().is_empty() {
            eprintln!("  - {e}");
        }
        process::exit(1);
    }

    if !foreground {
        match spawn_detached(config_path) {
            Ok(pid) => {
                println!(
                    "{} Supervisor started in the background (pid {pid})",
                    "✓".green().bold()
                );
                println!(
                    "  Run {} to inspect it, {} to stop it.",
                    "guvnor status".bold(),
                    "guvnor stop".bold()
                );
            }
            Err(msg) => {
                eprintln!("{} {}", "✗".red().bold(), msg);
                process::exit(1);
            }
        }
        return;
    }

    init_tracing(&config.server.log_level);

    let (Some(pid_dir), Some(cert_dir)) = (paths::pid_dir(), paths::cert_dir()) else {
        eprintln!("{} Could not determine home directory.", "✗".red().bold());
        process::exit(1);
    };
    let server_paths = ServerPaths { pid_dir, cert_dir };

    println!(
        "{} Starting guvnor with {} app(s) (http port {})",
        "✓".green().bold(),
        config.apps.len(),
        config.server.http_port
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} Failed to build runtime: {}", "✗".red().bold(), e);
            process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(guvnor_proxy::run(config, server_paths)) {
        eprintln!("{} Supervisor exited with error: {:#}", "✗".red().bold(), e);
        process::exit(1);
    }
}

/// Spawns a detached copy of this binary running in the foreground.
fn spawn_detached(config_path: &str) -> Result<u32, String> {
    let exe = std::env::current_exe().map_err(|e| format!("failed to locate current exe: {e}"))?;

    let child = Command::new(exe)
        .args(["start", "--config", config_path, "--foreground"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| format!("failed to spawn supervisor: {e}"))?;
    Ok(child.id())
}

/// Loads apps from the config file, falling back to a Procfile when
/// the configuration defines none.
fn load_config(config_path: &str) -> Result<GlobalConfig, String> {
    let path = Path::new(config_path);
    let mut config = if path.exists() {
        guvnor_config::load(path).map_err(|e| e.to_string())?
    } else {
        GlobalConfig::default()
    };

    if config.apps.is_empty() {
        let procfile = Path::new("Procfile");
        if procfile.exists() {
            let content = std::fs::read_to_string(procfile)
                .map_err(|e| format!("failed to read Procfile: {e}"))?;
            config.apps =
                guvnor_config::procfile::parse(&content).map_err(|e| e.to_string())?;
        }
    }

    if config.apps.is_empty() {
        return Err(format!(
            "no apps configured; create {config_path} or a Procfile"
        ));
    }
    Ok(config)
}

/// Initializes tracing with RUST_LOG override or the configured level.
fn init_tracing(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
