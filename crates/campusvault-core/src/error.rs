use std::path::PathBuf;

use thiserror::Error;

/// Canonical error type for backup, retention and restore operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The consistent copy could not be produced (missing source, SQLite
    /// backup error, destination not writable).
    #[error("backup failed: {message}")]
    BackupFailed {
        /// Human-readable cause.
        message: String,
    },

    /// Compressing a snapshot failed. The uncompressed snapshot is intact.
    #[error("compression failed: {message}")]
    CompressionFailed {
        /// Human-readable cause.
        message: String,
    },

    /// A snapshot could not be restored over the live database. The live
    /// database is left as it was.
    #[error("restore failed: {message}")]
    RestoreFailed {
        /// Human-readable cause.
        message: String,
    },

    /// One or more discarded snapshots could not be deleted during a
    /// retention pass.
    #[error("cleanup incomplete: {} snapshot(s) could not be deleted", .failed.len())]
    CleanupPartialFailure {
        /// Paths that are still on disk.
        failed: Vec<PathBuf>,
    },

    /// Entity was not found.
    #[error("{entity} `{id}` was not found")]
    NotFound {
        /// Entity type name (e.g. `"snapshot"`).
        entity: &'static str,
        /// Identifier of the missing entity.
        id: String,
    },

    /// Operation violates current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// I/O error occurred during file operations.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Validation error for input data.
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl CoreError {
    /// Creates a `BackupFailed` variant.
    #[must_use]
    pub fn backup_failed(message: impl Into<String>) -> Self {
        Self::BackupFailed {
            message: message.into(),
        }
    }

    /// Creates a `CompressionFailed` variant.
    #[must_use]
    pub fn compression_failed(message: impl Into<String>) -> Self {
        Self::CompressionFailed {
            message: message.into(),
        }
    }

    /// Creates a `RestoreFailed` variant.
    #[must_use]
    pub fn restore_failed(message: impl Into<String>) -> Self {
        Self::RestoreFailed {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` variant.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
