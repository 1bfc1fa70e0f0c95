use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        source: toml::de::Error,
        path: PathBuf,
    },
    #[error("failed to read env file {path}: {source}")]
    Env {
        source: dotenvy::Error,
        path: PathBuf,
    },
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("could not determine the user config directory")]
    NoConfigDir,
    #[error("{tool} is not installed")]
    ToolMissing { tool: String },
}

pub type Result<T> = std::result::Result<T, ConfigError>;
