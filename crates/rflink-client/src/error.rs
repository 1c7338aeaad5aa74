//! Error types for gateway connections.

use std::io;
use std::time::Duration;

use rflink_protocol::PacketError;
use thiserror::Error;

/// Errors that can occur when talking to a gateway.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport read, write or connect failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The serial port could not be opened or configured.
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A device id or packet could not be handled.
    #[error(transparent)]
    Packet(#[from] PacketError),

    /// No connection was established within the allowed time.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The connection is closed.
    #[error("connection closed")]
    Disconnected,
}

/// Result type alias for connection operations.
pub type ClientResult<T> = Result<T, ClientError>;
