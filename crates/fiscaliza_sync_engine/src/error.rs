//! Error types for the sync engine.

use fiscaliza_core::{Collection, CoreError};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while queueing or replaying writes.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store or record error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// A queued entry was rejected by the remote service. The entry is
    /// marked failed and its collection halted.
    #[error("sync failed for {collection} entry {entry_id}: {message}")]
    SyncFailure {
        /// Collection of the entry.
        collection: Collection,
        /// Queue entry id.
        entry_id: String,
        /// The remote error.
        message: String,
        /// Whether replaying again may succeed.
        retryable: bool,
    },

    /// The remote service failed outside any single entry.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// The remote service is not reachable.
    #[error("not connected to the remote service")]
    NotConnected,

    /// A payload references a locally minted id with no remote id yet.
    #[error("{collection} entry references unmapped local id {local_id}")]
    UnresolvedReference {
        /// Collection of the blocked entry.
        collection: Collection,
        /// The unmapped id.
        local_id: String,
    },

    /// Replay was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl From<fiscaliza_storage::StorageError> for SyncError {
    fn from(err: fiscaliza_storage::StorageError) -> Self {
        SyncError::Core(CoreError::Storage(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Core(CoreError::Serialization(err))
    }
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

    /// Classifies an error returned by the remote service.
    pub fn from_remote(err: CoreError) -> Self {
        match err {
            CoreError::Offline => SyncError::NotConnected,
            CoreError::Remote { message, retryable } => SyncError::Transport { message, retryable },
            other => SyncError::Core(other),
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::SyncFailure { retryable, .. } => *retryable,
            SyncError::NotConnected => true,
            SyncError::Core(err) => err.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("bad request").is_retryable());
        assert!(SyncError::NotConnected.is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::UnresolvedReference {
            collection: Collection::NonConformity,
            local_id: "local-1".into(),
        }
        .is_retryable());
    }

    #[test]
    fn remote_errors_are_classified() {
        assert!(matches!(
            SyncError::from_remote(CoreError::Offline),
            SyncError::NotConnected
        ));
        assert!(matches!(
            SyncError::from_remote(CoreError::remote("503", true)),
            SyncError::Transport { retryable: true, .. }
        ));
        assert!(matches!(
            SyncError::from_remote(CoreError::validation("bad")),
            SyncError::Core(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn error_display() {
        let err = SyncError::SyncFailure {
            collection: Collection::Determination,
            entry_id: "00000000000000000007".into(),
            message: "rejected".into(),
            retryable: false,
        };
        assert_eq!(
            err.to_string(),
            "sync failed for determinations entry 00000000000000000007: rejected"
        );
    }
}
