// SPDX-License-Identifier: Apache-2.0

//! Command handler for `guvnor status`.

use colored::Colorize;
use std::process;

use guvnor_runtime::{ProcessInfo, ProcessState};

use crate::client::ApiClient;
use crate::commands::client_runtime;

/// Executes the `guvnor status` command.
pub fn execute(config: Option<&str>) {
    let runtime = match client_runtime() {
        Ok(runtime) => runtime,
        Err(msg) => {
            eprintln!("{} {}", "✗".red().bold(), msg);
            process::exit(1);
        }
    };

    runtime.block_on(async {
        let Some(client) = ApiClient::discover(config).await else {
            eprintln!("{} No running supervisor found.", "✗".red().bold());
            process::exit(1);
        };

        let body = match client.get_json("/api/status").await {
            Ok(body) => body,
            Err(msg) => {
                eprintln!("{} Status request failed: {}", "✗".red().bold(), msg);
                process::exit(1);
            }
        };

        let processes: Vec<ProcessInfo> =
            match serde_json::from_value(body["processes"].clone()) {
                Ok(processes) => processes,
                Err(e) => {
                    eprintln!("{} Unexpected status payload: {}", "✗".red().bold(), e);
                    process::exit(1);
                }
            };

        if processes.is_empty() {
            println!("{} No processes managed.", "!".yellow().bold());
            return;
        }

        println!("{} Supervisor at {}:\n", "✓".green().bold(), client.base());
        println!(
            "  {:<16} {:<10} {:<8} {:<9} {:<6}",
            "NAME".bold(),
            "STATE".bold(),
            "PID".bold(),
            "RESTARTS".bold(),
            "PORT".bold(),
        );
        println!("  {}", "─".repeat(56));

        for info in &processes {
            let state_display = match info.state {
                ProcessState::Running => info.state.to_string().green().to_string(),
                ProcessState::Failed => info.state.to_string().red().to_string(),
                ProcessState::Starting | ProcessState::Stopping => {
                    info.state.to_string().yellow().to_string()
                }
                ProcessState::Stopped => info.state.to_string().dimmed().to_string(),
            };
            let pid_display = if info.pid == 0 {
                "-".to_string()
            } else {
                info.pid.to_string()
            };
            let port_display = if info.port == 0 {
                "-".to_string()
            } else {
                info.port.to_string()
            };

            print!(
                "  {:<16} {:<10} {:<8} {:<9} {:<6}",
                info.name.cyan(),
                state_display,
                pid_display,
                info.restarts,
                port_display,
            );
            if info.external {
                print!(" {}", "(external)".dimmed());
            }
            println!();
        }
        println!();
    });
}
