//! Error types for the AT protocol.

use thiserror::Error;

/// Errors that can occur when parsing commands or framing the byte stream.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The message index argument is not a non-negative integer.
    #[error("invalid message index: {0:?}")]
    InvalidIndex(String),

    /// The message index does not refer to a pending message.
    #[error("message index {index} out of range ({len} pending)")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Number of pending messages.
        len: usize,
    },

    /// A line from the modem that is not one of its known responses.
    #[error("unexpected response: {0:?}")]
    UnexpectedResponse(String),

    /// The byte stream ended; the peer is gone.
    #[error("connection lost: end of stream")]
    ConnectionLost,

    /// A line exceeded the maximum length without a terminator.
    #[error("line too long: max {max} bytes")]
    LineTooLong {
        /// Maximum accepted line length.
        max: usize,
    },

    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Whether this error ends the connection.
    ///
    /// Command errors are answered with `ERROR` and the session continues;
    /// framing errors mean the stream can no longer be trusted.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ProtocolError::ConnectionLost | ProtocolError::LineTooLong { .. } | ProtocolError::Io(_)
        )
    }
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
