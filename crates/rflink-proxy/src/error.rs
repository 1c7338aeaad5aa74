//! Error types for the relay.

use std::io;

use rflink_client::ClientError;
use thiserror::Error;

/// Errors that can occur while running the relay.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Listener or client socket failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Upstream gateway connection failure.
    #[error("upstream error: {0}")]
    Client(#[from] ClientError),

    /// The configuration file could not be read or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for relay operations.
pub type ProxyResult<T> = Result<T, ProxyError>;
