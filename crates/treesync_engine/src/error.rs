//! Error types for the sync engine.

use thiserror::Error;
use treesync_protocol::{ErrorCode, ProtocolError};

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can end a sync cycle.
///
/// Blocked updates and structural conflicts are not errors; they are
/// recorded in the session's conflict progress.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The request never got an answer. Always worth retrying.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// Malformed or invalid message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Server answered with a non-success code.
    #[error("server error {code:?}: {message}")]
    ServerError {
        /// Status code from the server.
        code: ErrorCode,
        /// Server-provided detail.
        message: String,
    },

    /// The server store is not the one this directory synced with.
    #[error("store birthday mismatch: local={local}, remote={remote}")]
    BirthdayMismatch {
        /// Birthday recorded locally.
        local: String,
        /// Birthday reported by the server.
        remote: String,
    },

    /// Local store error.
    #[error("store error: {0}")]
    Store(#[from] treesync_core::CoreError),

    /// Sync was cancelled between steps.
    #[error("sync cancelled")]
    Cancelled,

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The conflict loop hit its iteration bound without settling.
    #[error("conflict resolution did not converge after {iterations} iterations")]
    NonConvergence {
        /// Iterations performed.
        iterations: usize,
    },
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if a later cycle may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { .. } => true,
            SyncError::ServerError { code, .. } => code.is_transient(),
            SyncError::NonConvergence { .. } => true,
            _ => false,
        }
    }
}
