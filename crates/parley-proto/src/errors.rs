//! Protocol error types.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding, decoding, or validating protocol data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// CBOR serialization failed.
    #[error("CBOR encode error: {0}")]
    CborEncode(String),

    /// CBOR deserialization failed.
    #[error("CBOR decode error: {0}")]
    CborDecode(String),

    /// Payload exceeds the maximum frame payload size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge {
        /// Actual payload size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Event name is not part of the protocol.
    #[error("unknown event: {0:?}")]
    UnknownEvent(String),

    /// Event exists but cannot travel in this direction.
    #[error("event {event} is not valid {direction}")]
    WrongDirection {
        /// Wire name of the event.
        event: &'static str,
        /// Direction the event was seen in.
        direction: &'static str,
    },

    /// A required field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
