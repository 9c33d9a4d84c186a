//! Domain error types
//!
//! This module defines the error hierarchy for the PDR pipeline. Errors are
//! domain-specific and don't expose third-party types; HTTP and JSON failures
//! are converted to strings at the adapter boundary.

use thiserror::Error;

/// Main pipeline error type
///
/// Every stage of the pipeline returns this type. The variants mirror the
/// failure taxonomy of a submission: envelope defects, transform rejections,
/// unknown patients, failed data transactions and failed bookkeeping.
#[derive(Debug, Error)]
pub enum PdrError {
    /// Structural or semantic envelope defect (never retried)
    #[error("Unprocessable submission: {0}")]
    UnprocessableSubmission(String),

    /// A source-specific transformer rejected its payload
    #[error("Transform failure: {0}")]
    TransformFailure(String),

    /// The target patient does not exist in the resource store
    #[error("Patient not found: {0}")]
    PatientNotFound(String),

    /// The atomic data transaction failed
    #[error("Transaction failure: {0}")]
    TransactionFailure(String),

    /// Correlation or manifest bookkeeping failed after the data transaction committed
    #[error("Internal failure: {0}")]
    InternalFailure(String),

    /// The submission did not complete within the reply timeout
    #[error("Submission timed out after {0} ms")]
    Timeout(u64),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Resource store errors that were not attributed to a pipeline stage
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of a [`PdrError`], used for logging and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnprocessableSubmission,
    TransformFailure,
    PatientNotFound,
    TransactionFailure,
    InternalFailure,
    Timeout,
    Configuration,
    Store,
    Other,
}

impl ErrorKind {
    /// Whether resubmitting the same envelope may succeed
    ///
    /// Correlation-based matching makes a resubmission idempotent, so a failed
    /// data transaction or a timeout can be retried wholesale.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransactionFailure | Self::Timeout)
    }

    /// Stable label for structured logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnprocessableSubmission => "unprocessable_submission",
            Self::TransformFailure => "transform_failure",
            Self::PatientNotFound => "patient_not_found",
            Self::TransactionFailure => "transaction_failure",
            Self::InternalFailure => "internal_failure",
            Self::Timeout => "timeout",
            Self::Configuration => "configuration",
            Self::Store => "store",
            Self::Other => "other",
        }
    }
}

impl PdrError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnprocessableSubmission(_) => ErrorKind::UnprocessableSubmission,
            Self::TransformFailure(_) => ErrorKind::TransformFailure,
            Self::PatientNotFound(_) => ErrorKind::PatientNotFound,
            Self::TransactionFailure(_) => ErrorKind::TransactionFailure,
            Self::InternalFailure(_) => ErrorKind::InternalFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Store(_) => ErrorKind::Store,
            Self::Serialization(_) | Self::Io(_) | Self::Other(_) => ErrorKind::Other,
        }
    }

    /// Shorthand for building an unprocessable-submission error
    pub fn unprocessable(reason: impl Into<String>) -> Self {
        Self::UnprocessableSubmission(reason.into())
    }

    /// Shorthand for building a transform failure
    pub fn transform(reason: impl Into<String>) -> Self {
        Self::TransformFailure(reason.into())
    }
}

/// Resource store errors
///
/// Errors raised by a [`ResourceStore`](crate::adapters::store::ResourceStore)
/// implementation. These don't expose the HTTP client's types.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The requested resource does not exist
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency check failed
    #[error("Version conflict on {reference}: expected {expected}, found {actual}")]
    VersionConflict {
        reference: String,
        expected: String,
        actual: String,
    },

    /// The store refused the request (validation, business rule, 4xx)
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Failed to reach the store
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The store answered with something we could not interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    /// Whether a retry of the same request could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

// Conversion from std::io::Error
impl From<std::io::Error> for PdrError {
    fn from(err: std::io::Error) -> Self {
        PdrError::Io(err.to_string())
    }
}

// Conversion from serde_json::Error
impl From<serde_json::Error> for PdrError {
    fn from(err: serde_json::Error) -> Self {
        PdrError::Serialization(err.to_string())
    }
}

// Conversion from toml parse errors
impl From<toml::de::Error> for PdrError {
    fn from(err: toml::de::Error) -> Self {
        PdrError::Configuration(format!("TOML parse error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pdr_error_display() {
        let err = PdrError::unprocessable("bundle must have type 'message'");
        assert_eq!(
            err.to_string(),
            "Unprocessable submission: bundle must have type 'message'"
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let store_err = StoreError::Connection("refused".to_string());
        let err: PdrError = store_err.into();
        assert!(matches!(err, PdrError::Store(_)));
        assert_eq!(err.kind(), ErrorKind::Store);
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(PdrError::TransactionFailure("conflict".into())
            .kind()
            .is_retryable());
        assert!(PdrError::Timeout(1000).kind().is_retryable());
        assert!(!PdrError::PatientNotFound("Patient/1".into())
            .kind()
            .is_retryable());
        assert!(!PdrError::transform("bad payload").kind().is_retryable());
        assert!(!PdrError::InternalFailure("manifest".into())
            .kind()
            .is_retryable());
    }

    #[test]
    fn test_version_conflict_display() {
        let err = StoreError::VersionConflict {
            reference: "List/7".to_string(),
            expected: "2".to_string(),
            actual: "3".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Version conflict on List/7: expected 2, found 3"
        );
        assert!(!err.is_transient());
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: PdrError = json_err.into();
        assert!(matches!(err, PdrError::Serialization(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let toml_err = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let err: PdrError = toml_err.into();
        assert!(matches!(err, PdrError::Configuration(_)));
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_kind_labels() {
        assert_eq!(ErrorKind::PatientNotFound.as_str(), "patient_not_found");
        assert_eq!(PdrError::Timeout(5).kind().as_str(), "timeout");
    }
}
