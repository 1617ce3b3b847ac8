//! Error types for contest management operations

use contest_netfilter::{NetfilterError, ValidationError};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ManagerError>;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Netfilter(#[from] NetfilterError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to read config file {path}: {source}")]
    ConfigLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid config: {0} must be greater than zero")]
    ZeroSetting(&'static str),

    #[error("Failed to access whitelist {path}: {source}")]
    Whitelist {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to access dependency cache {path}: {source}")]
    Cache {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Dependency cache {path} is corrupt: {source}")]
    CacheFormat {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("User '{0}' does not exist")]
    AccountMissing(String),

    #[error("Failed to create user '{user}': {reason}")]
    AccountCreation { user: String, reason: String },

    #[error("Backup {0} does not exist, run setup first")]
    BackupMissing(PathBuf),

    #[error("User '{0}' has running processes, log them out first")]
    UserBusy(String),

    #[error("Failed to restore home directory: {0}")]
    Restore(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
