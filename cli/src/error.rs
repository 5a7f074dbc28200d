//! Unified error handling for the command-line tool.

use crate::config::ConfigError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("Engine error: {0}")]
    Engine(#[from] keyshelf_engine::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    BadArgument(String),
}

/// Result type alias for commands.
pub type Result<T> = std::result::Result<T, CliError>;
