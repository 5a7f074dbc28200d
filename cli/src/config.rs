//! Configuration management for the command-line tool.

use std::env;
use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "./keyshelf-data";
const DEFAULT_DATABASE: &str = "keyshelf";

/// CLI configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Directory holding one snapshot file per database
    pub data_dir: PathBuf,
    /// Database the commands operate on
    pub database: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(
            env::var("KEYSHELF_DATA_DIR").ok(),
            env::var("KEYSHELF_DATABASE").ok(),
        )
    }

    fn from_vars(data_dir: Option<String>, database: Option<String>) -> Result<Self, ConfigError> {
        let data_dir = data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        if data_dir.trim().is_empty() {
            return Err(ConfigError::EmptyDataDir);
        }

        let database = database.unwrap_or_else(|| DEFAULT_DATABASE.to_string());
        if database.trim().is_empty() {
            return Err(ConfigError::EmptyDatabase);
        }

        Ok(Self {
            data_dir: PathBuf::from(data_dir),
            database,
        })
    }

    /// Apply command-line overrides on top of the environment.
    pub fn with_overrides(mut self, data_dir: Option<PathBuf>, database: Option<String>) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        if let Some(name) = database {
            self.database = name;
        }
        self
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("KEYSHELF_DATA_DIR must not be empty")]
    EmptyDataDir,

    #[error("KEYSHELF_DATABASE must not be empty")]
    EmptyDatabase,
}
