//! Common error types for healthmon components.

use std::fmt;

/// A specialized Result type for healthmon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for healthmon operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("DNS error: {0}")]
    Dns(String),

    #[error("Check error: {0}")]
    Check(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown error: {0}")]
    Other(String),
}

impl Error {
    /// Create a new configuration error.
    pub fn config(msg: impl fmt::Display) -> Self {
        Error::Config(msg.to_string())
    }

    /// Create a new storage backend error.
    pub fn storage(msg: impl fmt::Display) -> Self {
        Error::Storage(msg.to_string())
    }

    /// Create a new DNS resolution error.
    pub fn dns(msg: impl fmt::Display) -> Self {
        Error::Dns(msg.to_string())
    }

    /// Create a new check plugin error.
    pub fn check(msg: impl fmt::Display) -> Self {
        Error::Check(msg.to_string())
    }

    /// Create a new other error.
    pub fn other(msg: impl fmt::Display) -> Self {
        Error::Other(msg.to_string())
    }
}
