//! Client error types

use crate::message::MessageError;
use thiserror::Error;

/// Client error type
#[derive(Error, Debug)]
pub enum ClientError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Malformed protocol frame
    #[error("Protocol error: {0}")]
    Protocol(#[from] MessageError),

    /// Timeout error
    #[error("Timeout error: {0}")]
    Timeout(String),

    /// Relay closed the transport
    #[error("Connection closed by relay")]
    Closed,

    /// The link task is gone
    #[error("Relay link is shut down")]
    Shutdown,
}

/// Client result type
pub type Result<T> = std::result::Result<T, ClientError>;
