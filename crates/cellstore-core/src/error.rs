//! Error types for cellstore

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CellstoreError {
    // Caller input errors
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Feature {primary} not found in dataset {dataset}")]
    NotFound { dataset: String, primary: String },

    // Optimistic concurrency
    #[error("Concurrent modification of {primary} in dataset {dataset}: {reason}")]
    ConcurrencyConflict {
        dataset: String,
        primary: String,
        reason: String,
    },

    /// A write guard rejected the write. The index manager translates this
    /// into `ConcurrencyConflict` or an idempotent success.
    #[error("Condition failed for {key}")]
    ConditionFailed { key: String },

    // Backend capacity / connectivity
    #[error("Backend throttled: {0}")]
    Throttled(String),

    #[error("Transient backend error: {0}")]
    Transient(String),

    // Geometry payloads
    #[error("Blob not found: {key}")]
    BlobNotFound { key: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Configuration errors
    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CellstoreError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(dataset: impl Into<String>, primary: impl Into<String>) -> Self {
        Self::NotFound {
            dataset: dataset.into(),
            primary: primary.into(),
        }
    }

    pub fn conflict(
        dataset: impl Into<String>,
        primary: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::ConcurrencyConflict {
            dataset: dataset.into(),
            primary: primary.into(),
            reason: reason.into(),
        }
    }

    /// Whether retrying the failed call can succeed without corrupting state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Throttled(_) | Self::Transient(_) | Self::Io(_))
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }
}

pub type Result<T> = std::result::Result<T, CellstoreError>;

/// Error surfaced by every public feature store call.
///
/// Carries the retry advice explicitly so callers never have to infer it
/// from the error kind.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct OperationError {
    #[source]
    pub error: CellstoreError,
    pub retryable: bool,
}

impl From<CellstoreError> for OperationError {
    fn from(error: CellstoreError) -> Self {
        let retryable = error.is_retryable();
        Self { error, retryable }
    }
}

pub type OperationResult<T> = std::result::Result<T, OperationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CellstoreError::Throttled("rate exceeded".into()).is_retryable());
        assert!(CellstoreError::Transient("connection reset".into()).is_retryable());

        assert!(!CellstoreError::validation("dataset", "empty").is_retryable());
        assert!(!CellstoreError::not_found("ds", "a").is_retryable());
        assert!(!CellstoreError::conflict("ds", "a", "stale version").is_retryable());
        assert!(!CellstoreError::BlobNotFound { key: "k".into() }.is_retryable());
        assert!(!CellstoreError::Serialization("bad bytes".into()).is_retryable());
    }

    #[test]
    fn test_operation_error_carries_flag() {
        let op: OperationError = CellstoreError::Throttled("slow down".into()).into();
        assert!(op.retryable);
        assert!(op.to_string().contains("slow down"));

        let op: OperationError = CellstoreError::conflict("ds", "a", "stale").into();
        assert!(!op.retryable);
        assert!(matches!(op.error, CellstoreError::ConcurrencyConflict { .. }));
    }
}
