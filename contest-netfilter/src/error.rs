//! Error types for netfilter operations

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NetfilterError>;

#[derive(Debug, Error)]
pub enum NetfilterError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Failed to execute {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },

    #[error("Command `{command}` failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("User '{user}' does not exist")]
    UnknownUser { user: String },

    #[error("Failed to load page {url}: {reason}")]
    PageLoad { url: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid domain format: {input:?}")]
    InvalidDomain { input: String },

    #[error("Invalid username {name:?}: {reason}")]
    InvalidUsername { name: String, reason: &'static str },

    #[error("Invalid CIDR notation: {cidr}")]
    InvalidCidr { cidr: String },

    #[error("Invalid chain prefix: {prefix}")]
    InvalidChainPrefix { prefix: String },

    #[error("Keyword list '{list}' contains an empty entry")]
    EmptyKeyword { list: &'static str },
}
