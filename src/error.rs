//! Error types for the pinlink library.

use std::collections::BTreeMap;

use thiserror::Error;

/// The main error type for pinlink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// No reply with the awaited id arrived before the deadline.
    #[error("no reply for message {id} within {elapsed_ms}ms")]
    Timeout { id: u64, elapsed_ms: u64 },

    /// The device answered the message with a `ko` reply.
    #[error("device reported error for message {id}")]
    DeviceError {
        id: u64,
        params: BTreeMap<String, String>,
    },

    /// The command cannot be encoded as a single frame.
    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    /// A request is already waiting for its reply on this link.
    #[error("link busy: still awaiting reply for message {awaiting}")]
    Busy { awaiting: u64 },

    /// The link has been closed.
    #[error("link closed")]
    Closed,

    /// A cached link was released more often than it was acquired.
    #[error("no cached link for {key}: released more often than acquired")]
    NotCached { key: String },

    /// Malformed link URI.
    #[error("invalid link URI {uri:?}: {reason}")]
    InvalidUri { uri: String, reason: String },

    /// No factory knows the requested transport.
    #[error("unknown transport: {name}")]
    UnknownTransport { name: String },

    /// A required configuration attribute is missing.
    #[error("missing attribute: {name}")]
    MissingAttribute { name: String },

    /// A configuration attribute has an unusable value.
    #[error("invalid value {value:?} for attribute {name}")]
    InvalidAttribute { name: String, value: String },
}

/// Errors produced while turning a frame into a message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Frame is not valid UTF-8 text.
    #[error("frame is not valid UTF-8")]
    NotText,

    /// Frame does not start with the protocol scheme.
    #[error("missing alp:// prefix")]
    MissingPrefix,

    /// Message key is not known.
    #[error("unknown message key: {0}")]
    UnknownKey(String),

    /// A positional field is missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A numeric field could not be parsed.
    #[error("invalid number in {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// A field has a value outside its allowed set.
    #[error("invalid value in {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    /// Reply without a message id.
    #[error("reply without id")]
    MissingReplyId,

    /// Buffered bytes exceed the maximum frame size without a divider.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },
}

/// Result type alias for pinlink operations.
pub type Result<T> = std::result::Result<T, Error>;
