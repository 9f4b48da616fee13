//! Error types for wire encoding and decoding.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while decoding wire data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The input ended before a complete value was read.
    #[error("unexpected end of input: needed {needed} more bytes, {remaining} remaining")]
    UnexpectedEnd {
        /// Bytes required to complete the read.
        needed: usize,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// A varint used more than 10 bytes or overflowed 64 bits.
    #[error("varint overflow")]
    VarintOverflow,

    /// A length-prefixed string was not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,

    /// A declared length exceeds the remaining input.
    #[error("declared length {declared} exceeds remaining input {remaining}")]
    LengthOutOfBounds {
        /// Length declared by the prefix.
        declared: u64,
        /// Bytes left in the input.
        remaining: usize,
    },

    /// Input had bytes left over after the final field.
    #[error("trailing bytes after message: {count}")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },

    /// The decoded structure was malformed.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the problem.
        message: String,
    },
}

impl CodecError {
    /// Creates an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CodecError::UnexpectedEnd {
            needed: 4,
            remaining: 1,
        };
        assert!(err.to_string().contains("4"));
        assert!(err.to_string().contains("1"));

        let err = CodecError::invalid_structure("bad tag");
        assert_eq!(err.to_string(), "invalid structure: bad tag");
    }
}
