//! Error types for identity handling.

use thiserror::Error;

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

/// Errors that can occur verifying identities and tokens.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A signature did not verify against the claimed key.
    #[error("signature verification failed")]
    InvalidSignature,

    /// A key was not a valid Ed25519 point.
    #[error("invalid public key")]
    InvalidKey,

    /// A token string was structurally malformed.
    #[error("malformed token: {message}")]
    MalformedToken {
        /// Description of the problem.
        message: String,
    },

    /// A token was issued by a different key than required.
    #[error("token issued by an unexpected key")]
    WrongIssuer,

    /// A token's subject did not match the expected value.
    #[error("token subject mismatch")]
    SubjectMismatch,

    /// Claim bytes failed to decode.
    #[error("codec error: {0}")]
    Codec(#[from] replidb_codec::CodecError),
}

impl IdentityError {
    /// Creates a malformed token error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }
}
