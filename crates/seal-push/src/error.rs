//! Bridge error types

use nostr_client::ClientError;
use thiserror::Error;

/// Bridge error type
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Recipient key is neither an npub nor 64 hex characters
    #[error("Invalid recipient key: {0}")]
    InvalidRecipientKey(String),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored data could not be decoded
    #[error("Storage error: {0}")]
    Storage(String),

    /// Notifier rejected or failed the push
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// Per-topic delivery budget exhausted
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Relay client error
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Background task panicked or was cancelled
    #[error("Task error: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Bridge result type
pub type Result<T> = std::result::Result<T, BridgeError>;
