//! Error handling for the LanLink CLI

use thiserror::Error;

use crate::config::ConfigError;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    #[error("LanLink error: {0}")]
    Lan(#[from] lanlink_core::LanError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Summary file error: {0}")]
    SummaryFile(String),

    #[error("No acknowledgement from {0}")]
    Unacknowledged(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::SummaryFile(format!("{:#}", err))
    }
}
