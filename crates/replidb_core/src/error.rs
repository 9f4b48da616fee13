//! Error types for RepliDB core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] replidb_store::StoreError),

    /// Wire codec error.
    #[error("codec error: {0}")]
    Codec(#[from] replidb_codec::CodecError),

    /// A remote batch's declared start did not match the confirmed
    /// receive point. Fatal to the connection, never patched silently.
    #[error("causality gap: expected start clock {expected}, batch declared {declared}")]
    CausalityGap {
        /// Next clock the receiver expected.
        expected: u64,
        /// Start clock the batch declared.
        declared: u64,
    },

    /// Merge was invoked over an empty record set.
    #[error("merge requires at least one record")]
    EmptyMerge,

    /// Merge was invoked over records of differing kinds.
    #[error("merge over mixed kinds: {left} and {right}")]
    MixedKindMerge {
        /// First kind observed.
        left: &'static str,
        /// Conflicting kind observed.
        right: &'static str,
    },

    /// A stored record was malformed.
    #[error("corrupt log record at local clock {local_clock}: {message}")]
    CorruptRecord {
        /// Local clock of the bad record.
        local_clock: u64,
        /// Description of the problem.
        message: String,
    },

    /// An operation was rejected as invalid.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A tree walk exceeded the depth bound or revisited a doc.
    #[error("tree cycle or depth limit exceeded at doc {doc}")]
    TreeCycle {
        /// Doc where the walk stopped.
        doc: String,
    },
}

impl CoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(local_clock: u64, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            local_clock,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }
}
