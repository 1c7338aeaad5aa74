//! Error types for the RFLink wire protocol.

use thiserror::Error;

/// Errors that can occur when validating, decoding or addressing packets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// The line does not match any known packet family.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// The leading node id is not one of `10`, `11` or `20`.
    #[error("unknown node id: {0}")]
    UnknownNode(String),

    /// A positional field required by the packet family is absent.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// An attribute value could not be converted to its expected type.
    #[error("could not convert attribute '{key}' value '{value}' ({conversion})")]
    InvalidValue {
        key: String,
        value: String,
        conversion: &'static str,
    },

    /// A serialized device id could not be split into its parts.
    #[error("invalid device id: {0:?}")]
    InvalidDeviceId(String),
}

/// Result type alias for packet operations.
pub type PacketResult<T> = Result<T, PacketError>;
