//! Error types for Fiscaliza core.

use crate::collection::Collection;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in engine operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Local persistence error.
    #[error("storage error: {0}")]
    Storage(#[from] fiscaliza_storage::StorageError),

    /// A row or record could not be converted.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Missing or invalid input to an operation. Never retried.
    #[error("validation failed: {message}")]
    Validation {
        /// What was wrong with the input.
        message: String,
    },

    /// Record not found.
    #[error("{collection} record not found: {id}")]
    NotFound {
        /// The collection searched.
        collection: Collection,
        /// The id that was not found.
        id: String,
    },

    /// An invariant violation was detected.
    #[error("integrity violation: {message}")]
    Integrity {
        /// Description of the violation.
        message: String,
    },

    /// A saga step failed after earlier steps had committed; those steps
    /// were compensated.
    #[error("saga {saga} failed at step {step}: {source}")]
    SagaFailure {
        /// Saga name.
        saga: &'static str,
        /// The step that failed.
        step: &'static str,
        /// The step's error.
        source: Box<CoreError>,
    },

    /// A saga step failed and compensating it failed too. The store holds
    /// partial results that only the consistency validator can detect.
    #[error(
        "saga {saga} left an inconsistency: step {step} failed ({original}) and \
         compensating step {compensating_step} failed ({compensation})"
    )]
    UnrecoverableInconsistency {
        /// Saga name.
        saga: &'static str,
        /// The step that failed.
        step: &'static str,
        /// The step whose compensation failed.
        compensating_step: &'static str,
        /// The step's error.
        #[source]
        original: Box<CoreError>,
        /// The compensation's error.
        compensation: Box<CoreError>,
    },

    /// The remote service rejected or failed a call.
    #[error("remote error: {message}")]
    Remote {
        /// Error message.
        message: String,
        /// Whether the call can be retried.
        retryable: bool,
    },

    /// The remote service is not reachable and the operation cannot be
    /// served locally.
    #[error("remote service unavailable")]
    Offline,
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(collection: Collection, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection,
            id: id.into(),
        }
    }

    /// Creates an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Creates a remote error.
    pub fn remote(message: impl Into<String>, retryable: bool) -> Self {
        Self::Remote {
            message: message.into(),
            retryable,
        }
    }

    /// Returns true if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    /// Returns true if the operation may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            CoreError::Remote { retryable, .. } => *retryable,
            CoreError::Offline => true,
            CoreError::SagaFailure { source, .. } => source.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(CoreError::remote("timeout", true).is_retryable());
        assert!(!CoreError::remote("bad request", false).is_retryable());
        assert!(CoreError::Offline.is_retryable());
        assert!(!CoreError::validation("missing unit").is_retryable());

        let saga = CoreError::SagaFailure {
            saga: "finding_chain",
            step: "create_determination",
            source: Box::new(CoreError::remote("timeout", true)),
        };
        assert!(saga.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = CoreError::not_found(Collection::Unit, "u-1");
        assert_eq!(err.to_string(), "units record not found: u-1");
        assert!(err.is_not_found());

        let err = CoreError::UnrecoverableInconsistency {
            saga: "finding_chain",
            step: "create_determination",
            compensating_step: "create_non_conformity",
            original: Box::new(CoreError::remote("boom", false)),
            compensation: Box::new(CoreError::Offline),
        };
        let text = err.to_string();
        assert!(text.contains("boom"));
        assert!(text.contains("remote service unavailable"));
    }
}
