//! Error types for insteon-gateway.

use thiserror::Error;

/// Main error type for all gateway operations.
///
/// Every transaction failure is an inspectable variant; nothing in the public
/// surface panics for expected failure modes.
#[derive(Debug, Error)]
pub enum InsteonError {
    /// The serial channel (or the reader task owning it) is gone.
    #[error("Channel unavailable: {0}")]
    ChannelUnavailable(String),

    /// I/O error during serial or socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The gateway echoed something other than what was sent.
    #[error("Invalid echo: sent {sent}, got {received}")]
    EchoMismatch { sent: String, received: String },

    /// The echo had the right prefix but the wrong length.
    #[error("Invalid message length: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    /// The gateway refused the command.
    #[error("NACK")]
    Nack,

    /// The echo ended with neither ACK nor NACK.
    #[error("No ACK received (got 0x{0:02X})")]
    InvalidAck(u8),

    /// No echo arrived within the echo timeout.
    #[error("Timeout waiting for echo")]
    AckTimeout,

    /// No deferred response arrived within the response timeout.
    #[error("Timeout waiting for response")]
    ResponseTimeout,

    /// An address could not be parsed or resolved.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// A caller-supplied value is out of range or malformed.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// A device reported a category this crate does not know how to link.
    #[error("Unknown device type: {0}")]
    UnknownDeviceType(String),

    /// A well-formed reply that does not answer the question asked.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Configuration file or value error.
    #[error("Config error: {0}")]
    Config(String),
}

impl InsteonError {
    /// True for failures that indicate protocol desynchronization.
    ///
    /// The engine has already reset the channel when one of these is returned.
    pub fn is_desync(&self) -> bool {
        matches!(
            self,
            InsteonError::EchoMismatch { .. }
                | InsteonError::LengthMismatch { .. }
                | InsteonError::InvalidAck(_)
                | InsteonError::AckTimeout
                | InsteonError::ResponseTimeout
        )
    }

    /// True for either timeout variant.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            InsteonError::AckTimeout | InsteonError::ResponseTimeout
        )
    }
}

/// Result type alias using InsteonError.
pub type Result<T> = std::result::Result<T, InsteonError>;
