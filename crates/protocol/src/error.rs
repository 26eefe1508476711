//! Error types for the protocol crate.

use thiserror::Error;

/// Protocol error type covering every way a wire record can be rejected.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The line is not a JSON document.
    #[error("malformed command: {0}")]
    Malformed(String),

    /// The document is not an object with a string `type` field.
    #[error("command has no `type` discriminant")]
    MissingType,

    /// The `type` field names no known command.
    #[error("unknown command type '{0}'")]
    UnknownCommand(String),

    /// The fields do not match the shape registered for the discriminant.
    #[error("invalid `{kind}` command: {reason}")]
    InvalidFields {
        /// The command discriminant being decoded.
        kind: String,
        /// What serde rejected.
        reason: String,
    },

    /// A reply could not be encoded.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Result type alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_eof() || err.is_syntax() {
            ProtocolError::Malformed(err.to_string())
        } else {
            ProtocolError::Serialization(err.to_string())
        }
    }
}
