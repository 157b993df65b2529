// SPDX-License-Identifier: Apache-2.0

//! CLI subcommand declarations and dispatch.

pub mod cert;
pub mod logs;
pub mod restart;
pub mod start;
pub mod status;
pub mod stop;
pub mod validate;

use clap::Subcommand;

/// Top-level CLI subcommands supported by `guvnor`.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the supervisor and proxy
    Start {
        /// Configuration file
        #[arg(long, short, default_value = "guvnor.toml")]
        config: String,

        /// Run in the foreground instead of detaching
        #[arg(long)]
        foreground: bool,
    },

    /// Stop all processes through a running supervisor
    Stop {
        /// Configuration file used to locate the supervisor
        #[arg(long, short)]
        config: Option<String>,
    },

    /// Restart one process through a running supervisor
    Restart {
        /// Process name
        process: String,

        /// Configuration file used to locate the supervisor
        #[arg(long, short)]
        config: Option<String>,
    },

    /// Show process status from a running supervisor
    Status {
        /// Configuration file used to locate the supervisor
        #[arg(long, short)]
        config: Option<String>,
    },

    /// Show recent logs from a running supervisor
    Logs {
        /// Process name (omit for all processes)
        process: Option<String>,

        /// Number of lines to show
        #[arg(long, default_value = "50")]
        lines: u32,

        /// Follow the log stream
        #[arg(long, short = 'f')]
        follow: bool,

        /// Configuration file used to locate the supervisor
        #[arg(long, short)]
        config: Option<String>,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file
        #[arg(long, short, default_value = "guvnor.toml")]
        config: String,
    },

    /// Inspect and maintain cached certificates
    Cert {
        #[command(subcommand)]
        action: CertAction,
    },
}

/// Certificate maintenance subcommands.
#[derive(Subcommand)]
pub enum CertAction {
    /// List cached certificates with their validity windows
    Info {
        /// Configuration file
        #[arg(long, short, default_value = "guvnor.toml")]
        config: String,
    },

    /// Re-acquire certificates close to expiry
    Renew {
        /// Configuration file
        #[arg(long, short, default_value = "guvnor.toml")]
        config: String,
    },

    /// Remove certificates past their expiry
    Cleanup {
        /// Configuration file
        #[arg(long, short, default_value = "guvnor.toml")]
        config: String,
    },
}

/// Dispatches a parsed CLI command to its command module.
pub fn execute(command: Commands) {
    match command {
        Commands::Start { config, foreground } => start::execute(&config, foreground),
        Commands::Stop { config } => stop::execute(config.as_deref()),
        Commands::Restart { process, config } => restart::execute(&process, config.as_deref()),
        Commands::Status { config } => status::execute(config.as_deref()),
        Commands::Logs {
            process,
            lines,
            follow,
            config,
        } => logs::execute(process.as_deref(), lines, follow, config.as_deref()),
        Commands::Validate { config } => validate::execute(&config),
        Commands::Cert { action } => match action {
            CertAction::Info { config } => cert::info(&config),
            CertAction::Renew { config } => cert::renew(&config),
            CertAction::Cleanup { config } => cert::cleanup(&config),
        },
    }
}

/// Builds the current-thread runtime used by client-side commands.
pub(crate) fn client_runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("failed to build tokio runtime: {e}"))
}
