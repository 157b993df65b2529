// SPDX-License-Identifier: Apache-2.0

//! Command handler for `guvnor stop`.

use colored::Colorize;
use std::process;

use guvnor_runtime::{StopResult, StopStatus};

use crate::client::ApiClient;
use crate::commands::client_runtime;

/// Executes the `guvnor stop` command against a running supervisor.
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

        let body = match client.post_json("/api/stop").await {
            Ok(body) => body,
            Err(msg) => {
                eprintln!("{} Stop request failed: {}", "✗".red().bold(), msg);
                process::exit(1);
            }
        };

        let results: Vec<StopResult> = match serde_json::from_value(body["results"].clone()) {
            Ok(results) => results,
            Err(e) => {
                eprintln!("{} Unexpected stop payload: {}", "✗".red().bold(), e);
                process::exit(1);
            }
        };

        if results.is_empty() {
            println!("{} No processes were running.", "!".yellow().bold());
            return;
        }

        let mut had_error = false;
        for result in &results {
            let name = result.name.cyan();
            match result.status {
                StopStatus::Stopped => println!(
                    "{} Stopped {} ({}ms)",
                    "✓".green().bold(),
                    name,
                    result.duration_ms
                ),
                StopStatus::Killed => println!(
                    "{} Force-killed {} after {}ms",
                    "!".yellow().bold(),
                    name,
                    result.duration_ms
                ),
                StopStatus::NotRunning => {
                    println!("{} {} was not running", "!".yellow().bold(), name)
                }
                StopStatus::Error => {
                    had_error = true;
                    let message = result.error.as_deref().unwrap_or("unknown error");
                    eprintln!("{} Failed to stop {}: {}", "✗".red().bold(), name, message);
                }
            }
        }
        if had_error {
            process::exit(1);
        }
    });
}
