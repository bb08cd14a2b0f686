//! Error types for the entity resolver.
//!
//! All errors are strongly typed using thiserror so callers can pattern match
//! on the failure class: a malformed candidate, an unreachable store, or a
//! saturated batch runtime.

use thiserror::Error;

use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// A required candidate field is absent.
    #[error("Required field '{field}' is missing")]
    MissingField {
        /// Field name as it appears in the input.
        field: String,
    },

    /// The name is blank after trimming.
    #[error("Entity name cannot be empty")]
    EmptyEntityName,

    /// A confidence outside `[0.0, 1.0]`, or not a number.
    #[error("Confidence value {value} is out of range [0.0, 1.0]")]
    ConfidenceOutOfRange {
        /// The rejected value.
        value: f64,
    },

    /// A name change whose two sides are the same name.
    #[error("Name change must change the name (both sides are '{name}')")]
    IdenticalNames {
        /// The repeated name.
        name: String,
    },

    /// A configuration value outside its allowed range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Which value is wrong and why.
        reason: String,
    },
}

/// Execution errors raised by the batch runtime.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The job queue is at capacity; the job was not accepted.
    #[error("Resolution queue is full (capacity: {capacity})")]
    QueueFull {
        /// Configured queue capacity.
        capacity: usize,
    },

    /// The runtime shut down before the job completed.
    #[error("Resolution worker disconnected")]
    Disconnected,

    /// No result arrived within the wait limit. The job may still finish.
    #[error("Resolution timed out after {duration_ms}ms")]
    Timeout {
        /// How long the caller waited.
        duration_ms: u64,
    },
}

/// Top-level error type for the resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// Malformed input or configuration.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// The batch runtime could not run the job.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// The persistence collaborator cannot be reached.
    #[error("Entity store unavailable: {message}")]
    StoreUnavailable {
        /// Backend detail.
        message: String,
    },

    /// Any other store failure.
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// A broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// What went wrong.
        message: String,
    },
}

impl From<StorageError> for ResolveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Unavailable(message) => Self::StoreUnavailable { message },
            other => Self::Storage(other),
        }
    }
}

impl ResolveError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if the store could not be reached.
    #[must_use]
    pub const fn is_store_unavailable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Returns true if a caller may reasonably retry the same request.
    ///
    /// The resolver itself never retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Storage(_) | Self::Internal { .. } => false,
            Self::StoreUnavailable { .. } => true,
            Self::Execution(e) => matches!(
                e,
                ExecutionError::QueueFull { .. } | ExecutionError::Timeout { .. }
            ),
        }
    }
}

/// Result type alias for resolver operations.
pub type ResolveResult<T> = Result<T, ResolveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_missing_field() {
        let err = ValidationError::MissingField {
            field: "type".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("'type'"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn test_validation_error_confidence() {
        let err = ValidationError::ConfidenceOutOfRange { value: 1.5 };
        let msg = format!("{err}");
        assert!(msg.contains("1.5"));
        assert!(msg.contains("out of range"));
    }

    #[test]
    fn test_resolve_error_from_validation() {
        let err: ResolveError = ValidationError::EmptyEntityName.into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_unavailable_storage_maps_to_store_unavailable() {
        let err: ResolveError = StorageError::Unavailable("wal offline".to_string()).into();
        assert!(err.is_store_unavailable());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("wal offline"));
    }

    #[test]
    fn test_other_storage_errors_are_not_retryable() {
        let err: ResolveError = StorageError::DuplicateKey("E1".to_string()).into();
        assert!(matches!(err, ResolveError::Storage(StorageError::DuplicateKey(_))));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_execution_errors_retryability() {
        let full: ResolveError = ExecutionError::QueueFull { capacity: 4 }.into();
        assert!(full.is_retryable());

        let gone: ResolveError = ExecutionError::Disconnected.into();
        assert!(!gone.is_retryable());

        let timeout: ResolveError = ExecutionError::Timeout { duration_ms: 10 }.into();
        assert!(timeout.to_string().contains("10ms"));
    }

    #[test]
    fn test_internal_error() {
        let err = ResolveError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("unexpected state"));
    }
}
