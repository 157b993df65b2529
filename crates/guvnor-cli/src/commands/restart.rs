// SPDX-License-Identifier: Apache-2.0

//! Command handler for `guvnor restart`.

use colored::Colorize;
use std::process;

use crate::client::ApiClient;
use crate::commands::client_runtime;

/// Executes the `guvnor restart` command for one process.
pub fn execute(process_name: &str, config: Option<&str>) {
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

        match client
            .post_json(&format!("/api/restart/{process_name}"))
            .await
        {
            Ok(_) => println!(
                "{} Restarted {}",
                "✓".green().bold(),
                process_name.cyan()
            ),
            Err(msg) => {
                eprintln!(
                    "{} Failed to restart {}: {}",
                    "✗".red().bold(),
                    process_name.cyan(),
                    msg
                );
                process::exit(1);
            }
        }
    });
}
