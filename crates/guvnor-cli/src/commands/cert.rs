// SPDX-License-Identifier: Apache-2.0

//! Command handlers for `guvnor cert info|renew|cleanup`.

use colored::Colorize;
use std::path::Path;
use std::process;

use guvnor_proxy::{cert_config_from, CertManager, ServerPaths};

use crate::commands::client_runtime;
use crate::paths;

/// Builds the certificate manager from the configuration on disk.
fn manager(config_path: &str) -> CertManager {
    let mut config = if Path::new(config_path).exists() {
        match guvnor_config::load(Path::new(config_path)) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("{} {}", "✗".red().bold(), e);
                process::exit(1);
            }
        }
    } else {
        guvnor_config::GlobalConfig::default()
    };
    let _ = guvnor_config::validate(&mut config);

    let (Some(pid_dir), Some(cert_dir)) = (paths::pid_dir(), paths::cert_dir()) else {
        eprintln!("{} Could not determine home directory.", "✗".red().bold());
        process::exit(1);
    };
    let server_paths = ServerPaths { pid_dir, cert_dir };

    match CertManager::new(cert_config_from(&config, &server_paths)) {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!(
                "{} Failed to open certificate cache: {}",
                "✗".red().bold(),
                e
            );
            process::exit(1);
        }
    }
}

/// Executes `guvnor cert info`.
pub fn info(config_path: &str) {
    let manager = manager(config_path);
    let infos = match manager.certificates() {
        Ok(infos) => infos,
        Err(e) => {
            eprintln!("{} Certificate scan failed: {}", "✗".red().bold(), e);
            process::exit(1);
        }
    };

    if infos.is_empty() {
        println!("{} No cached certificates.", "!".yellow().bold());
        return;
    }

    println!("{} Cached certificates:\n", "✓".green().bold());
    println!(
        "  {:<28} {:<22} {:<22} {:<8}",
        "HOST".bold(),
        "NOT BEFORE".bold(),
        "NOT AFTER".bold(),
        "STATUS".bold(),
    );
    println!("  {}", "─".repeat(82));
    for info in infos {
        let status = if info.expired {
            "expired".red().to_string()
        } else {
            "valid".green().to_string()
        };
        println!(
            "  {:<28} {:<22} {:<22} {:<8}",
            info.host.cyan(),
            info.not_before.format("%Y-%m-%d %H:%M UTC"),
            info.not_after.format("%Y-%m-%d %H:%M UTC"),
            status,
        );
    }
    println!();
}

/// Executes `guvnor cert renew`.
pub fn renew(config_path: &str) {
    let manager = manager(config_path);
    let runtime = match client_runtime() {
        Ok(runtime) => runtime,
        Err(msg) => {
            eprintln!("{} {}", "✗".red().bold(), msg);
            process::exit(1);
        }
    };

    let renewed = runtime.block_on(manager.renew_all());
    if renewed == 0 {
        println!("{} No certificates needed renewal.", "!".yellow().bold());
    } else {
        println!(
            "{} Renewed {} certificate(s).",
            "✓".green().bold(),
            renewed
        );
    }
}

/// Executes `guvnor cert cleanup`.
pub fn cleanup(config_path: &str) {
    let manager = manager(config_path);
    match manager.cleanup() {
        Ok(removed) if removed.is_empty() => {
            println!("{} No expired certificates.", "!".yellow().bold());
        }
        Ok(removed) => {
            for host in removed {
                println!("{} Removed expired pair for {}", "✓".green().bold(), host.cyan());
            }
        }
        Err(e) => {
            eprintln!("{} Cleanup failed: {}", "✗".red().bold(), e);
            process::exit(1);
        }
    }
}
