//! Error types for the treesync store.

use crate::id::Id;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// Persisted snapshot failed validation.
    #[error("snapshot corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Another process holds the directory lock.
    #[error("directory locked: another process has exclusive access")]
    DirectoryLocked,

    /// Invalid on-disk layout or format version.
    #[error("invalid directory format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Entry not found.
    #[error("entry not found: {id}")]
    EntryNotFound {
        /// The id that was looked up.
        id: Id,
    },

    /// An entry with this id already exists.
    #[error("entry already exists: {id}")]
    EntryExists {
        /// The duplicated id.
        id: Id,
    },

    /// Attempted to move an entry's base version backwards.
    #[error("version regression on {id}: current {current}, attempted {attempted}")]
    VersionRegression {
        /// Entry id.
        id: Id,
        /// Version currently stored.
        current: i64,
        /// Version that was rejected.
        attempted: i64,
    },

    /// Invalid operation.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an entry-not-found error.
    pub fn not_found(id: &Id) -> Self {
        Self::EntryNotFound { id: id.clone() }
    }
}
