//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur on a sync connection.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport failure.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether reconnecting makes sense.
        retryable: bool,
    },

    /// The peer violated the protocol. Fatal; the connection is
    /// destroyed rather than resynchronized.
    #[error("protocol violation: {0}")]
    Protocol(#[from] replidb_sync_protocol::ProtocolError),

    /// The peer sent a message that is illegal in the current
    /// handshake state (op traffic before authentication, a second
    /// `Info`, an answer before an introduction).
    #[error("message {message} not allowed in state {state}")]
    OutOfOrderMessage {
        /// The offending message name.
        message: &'static str,
        /// The handshake state it arrived in.
        state: &'static str,
    },

    /// Identity or signature verification failed.
    #[error("authentication failed: {0}")]
    Authentication(#[from] replidb_identity::IdentityError),

    /// The peer's user is not known here and auto-registration is off.
    #[error("unknown user; auto-registration disabled")]
    UnknownUser,

    /// The apply engine rejected a batch (causality gap, storage
    /// failure, corrupt record).
    #[error("apply error: {0}")]
    Apply(#[from] replidb_core::CoreError),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The local event buffer dropped this connection's subscription
    /// (the live tail lagged too far behind).
    #[error("event subscription lagged and was dropped")]
    EventLag,

    /// The connection was cancelled locally.
    #[error("cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// True if a reconnect attempt makes sense after this error.
    ///
    /// Protocol violations, authentication failures, and causality
    /// gaps are deliberate dead ends: retrying would replay the same
    /// failure against the same peer.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::ConnectionClosed | SyncError::EventLag => true,
            SyncError::Apply(error) => !matches!(
                error,
                replidb_core::CoreError::CausalityGap { .. }
            ),
            _ => false,
        }
    }
}
