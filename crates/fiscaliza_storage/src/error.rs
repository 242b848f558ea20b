//! Error types for storage operations.

use crate::backend::BackendKind;
use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The log file is corrupted beyond the recoverable tail.
    #[error("storage corrupted: {0}")]
    Corrupted(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),

    /// A backend could not be opened during capability probing.
    #[error("{backend} backend unavailable: {reason}")]
    BackendUnavailable {
        /// The backend that failed to open.
        backend: BackendKind,
        /// Why it failed.
        reason: String,
    },
}

impl StorageError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Creates a backend-unavailable error.
    pub fn unavailable(backend: BackendKind, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display_names_backend() {
        let err = StorageError::unavailable(BackendKind::IndexedLog, "read-only filesystem");
        assert_eq!(
            err.to_string(),
            "indexed-log backend unavailable: read-only filesystem"
        );
    }
}
