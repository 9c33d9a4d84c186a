//! Logging and observability
//!
//! Structured logging through `tracing`, with:
//! - Configurable log levels (`RUST_LOG` overrides the configured level)
//! - Console output
//! - JSON file logging with daily or hourly rotation
//!
//! # Example
//!
//! ```no_run
//! use pdr_ingest::logging::init_logging;
//! use pdr_ingest::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(patient = "42", "Submission received");
//! ```

pub mod structured;

// Re-export commonly used items
pub use structured::{init_logging, LoggingGuard};

/// Log the start of a submission
///
/// # Example
///
/// ```no_run
/// use pdr_ingest::log_submission_start;
/// use pdr_ingest::domain::PatientId;
///
/// let patient = PatientId::new("42").unwrap();
/// log_submission_start!(&patient, "urn:apple:health-kit", 3);
/// ```
#[macro_export]
macro_rules! log_submission_start {
    ($patient:expr, $source:expr, $entries:expr) => {
        tracing::info!(
            patient = %$patient,
            source = %$source,
            entries = $entries,
            "Processing submission"
        );
    };
}

/// Log the successful completion of a submission
///
/// # Example
///
/// ```no_run
/// use pdr_ingest::log_submission_complete;
/// use std::time::Duration;
///
/// log_submission_complete!("42", 2, 1, Duration::from_millis(120));
/// ```
#[macro_export]
macro_rules! log_submission_complete {
    ($patient:expr, $created:expr, $updated:expr, $duration:expr) => {
        tracing::info!(
            patient = %$patient,
            created = $created,
            updated = $updated,
            duration_ms = $duration.as_millis() as u64,
            "Submission processed"
        );
    };
}

/// Log a rejected or failed submission
///
/// # Example
///
/// ```no_run
/// use pdr_ingest::log_submission_failed;
/// use pdr_ingest::domain::PdrError;
///
/// let error = PdrError::PatientNotFound("Patient/42".to_string());
/// log_submission_failed!(&error, Some("msg-1"));
/// ```
#[macro_export]
macro_rules! log_submission_failed {
    ($error:expr, $message_id:expr) => {
        tracing::warn!(
            error = %$error,
            kind = $error.kind().as_str(),
            retryable = $error.kind().is_retryable(),
            message_id = ?$message_id,
            "Submission failed"
        );
    };
}
