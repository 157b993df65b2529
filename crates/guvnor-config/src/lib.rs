// SPDX-License-Identifier: Apache-2.0

//! Configuration model, validation, and loading for Guvnor.

pub mod procfile;
pub mod types;
pub mod validate;

use std::path::{Path, PathBuf};

use thiserror::Error;

pub use types::{
    AppSpec, AppTlsConfig, GlobalConfig, HealthCheckConfig, RestartPolicy, ServerConfig, TlsConfig,
};
pub use validate::validate;

/// Errors produced while loading or validating a configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {}", issues.join("; "))]
    Invalid { issues: Vec<String> },

    #[error("invalid Procfile line {line}: {reason}")]
    Procfile { line: usize, reason: String },
}

impl ConfigError {
    /// Individual validation messages, one per problem found.
    pub fn issues(&self) -> &[String] {
        match self {
            ConfigError::Invalid { issues } => issues,
            _ => &[],
        }
    }
}

/// Reads and parses a TOML configuration file without validating it.
pub fn load(path: &Path) -> Result<GlobalConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Loads a configuration file and validates/materializes it.
pub fn load_validated(path: &Path) -> Result<GlobalConfig, ConfigError> {
    let mut config = load(path)?;
    validate(&mut config)?;
    Ok(config)
}
