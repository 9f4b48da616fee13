//! Error types for the store boundary.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by a key-value store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing engine failed.
    #[error("backend error: {message}")]
    Backend {
        /// Description from the engine.
        message: String,
    },

    /// The transaction was already committed or rolled back.
    #[error("transaction is no longer usable")]
    TransactionClosed,

    /// An I/O error from a persistent engine.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Creates a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
        }
    }
}
