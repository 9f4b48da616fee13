//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur encoding or decoding protocol messages.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// Wire primitive encoding failed.
    #[error("codec error: {0}")]
    Codec(#[from] replidb_codec::CodecError),

    /// A message carried a tag this version does not know.
    #[error("unknown message tag {tag}")]
    UnknownTag {
        /// The offending tag byte.
        tag: u8,
    },

    /// A frame declared a length beyond the allowed maximum.
    #[error("frame of {declared} bytes exceeds the {max}-byte limit")]
    FrameTooLarge {
        /// Length the frame header declared.
        declared: usize,
        /// Maximum allowed payload length.
        max: usize,
    },

    /// A message failed a structural sanity check.
    #[error("malformed message: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },
}

impl ProtocolError {
    /// Creates a malformed message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}
