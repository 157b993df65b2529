// SPDX-License-Identifier: Apache-2.0

//! Guvnor CLI binary entrypoint.

mod client;
mod commands;
pub mod paths;

use clap::Parser;
use commands::Commands;

/// Guvnor — process supervisor with a host-routing HTTPS reverse proxy
#[derive(Parser)]
#[command(name = "guvnor", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Parses CLI arguments and dispatches to command handlers.
fn main() {
    let cli = Cli::parse();
    commands::execute(cli.command);
}
