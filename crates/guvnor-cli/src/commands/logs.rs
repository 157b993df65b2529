use colored::Colorize;
use serde_json::Value;
use std::process;

use crate::client::ApiClient;
use crate::commands::client_runtime;

/// Executes the `guvnor logs` command, optionally following the stream.
pub fn execute(process_name: Option<&str>, lines: u32, follow: bool, config: Option<&str>) {
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

        let path = match process_name {
            Some(name) => format!("/api/logs/{name}?lines={lines}"),
            None => format!("/api/logs?lines={lines}"),
        };
        let body = match client.get_json(&path).await {
            Ok(body) => body,
            Err(msg) => {
                eprintln!("{} Log request failed: {}", "✗".red().bold(), msg);
                process::exit(1);
            }
        };

        let records = body["logs"].as_array().cloned().unwrap_or_default();
        if records.is_empty() && !follow {
            println!("{} No log records yet.", "!".yellow().bold());
            return;
        }
        for record in &records {
            print_record(record);
        }

        if follow {
            let result = client
                .stream_logs(process_name, |event| {
                    for record in event["logs"].as_array().cloned().unwrap_or_default() {
                        print_record(&record);
                    }
                })
                .await;
            if let Err(msg) = result {
                eprintln!("{} Log stream ended: {}", "✗".red().bold(), msg);
                process::exit(1);
            }
        }
    });
}

fn print_record(record: &Value) {
    let timestamp = record["timestamp"].as_str().unwrap_or("-");
    let tag = record["tag"].as_str().unwrap_or("-");
    let message = record["message"].as_str().unwrap_or("");
    let level = record["level"].as_str().unwrap_or("info");
    let message_display = match level {
        "error" => message.red().to_string(),
        "warn" => message.yellow().to_string(),
        _ => message.to_string(),
    };
    println!(
        "{} {} {}",
        timestamp.dimmed(),
        format!("[{tag}]").cyan(),
        message_display
    );
}
