// SPDX-License-Identifier: Apache-2.0

//! Command handler for `guvnor validate`.

use colored::Colorize;
use std::path::Path;
use std::process;

/// Executes the `guvnor validate` command.
pub fn execute(config_path: &str) {
    let path = Path::new(config_path);
    if !path.exists() {
        eprintln!(
            "{} Configuration file {} not found.",
            "✗".red().bold(),
            config_path.cyan()
        );
        process::exit(1);
    }

    let mut config = match guvnor_config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), e);
            process::exit(1);
        }
    };

    match guvnor_config::validate(&mut config) {
        Ok(()) => {
            println!(
                "{} {} is valid ({} app(s))",
                "✓".green().bold(),
                config_path.cyan(),
                config.apps.len()
            );
            for app in &config.apps {
                println!(
                    "  {:<16} {} -> 127.0.0.1:{}",
                    app.name.cyan(),
                    app.hostname,
                    app.port
                );
            }
        }
        Err(e) => {
            eprintln!("{} {} is invalid:", "✗".red().bold(), config_path.cyan());
            for issue in e.issues() {
                eprintln!("  - {issue}");
            }
            process::exit(1);
        }
    }
}
