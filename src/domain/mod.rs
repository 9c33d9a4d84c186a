//! Domain models and types for the PDR pipeline.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`PatientId`], [`Locator`], [`TargetRef`])
//! - **Submission models** ([`Submission`], [`MessageHeader`], [`Entry`], [`ClinicalRecord`])
//! - **Bookkeeping models** ([`CorrelationRecord`], [`Manifest`])
//! - **Error types** ([`PdrError`], [`StoreError`], [`ErrorKind`])
//! - **Result type alias** ([`Result`])
//!
//! # Type Safety
//!
//! A source-side [`Locator`] and a store-side [`TargetRef`] are distinct types,
//! so a correlation key can never be written where a store reference belongs:
//!
//! ```rust
//! use pdr_ingest::domain::{Locator, TargetRef};
//!
//! let locator = Locator::from_parts("urn:src", "Observation", "abc", None);
//! let target = TargetRef::parse("Observation/17").unwrap();
//!
//! // let wrong: TargetRef = locator;  // Compile error!
//! # let _ = (locator, target);
//! ```

pub mod envelope;
pub mod errors;
pub mod ids;
pub mod manifest;
pub mod provenance;
pub mod record;
pub mod result;

// Re-export commonly used types for convenience
pub use envelope::{MessageHeader, Submission, SubmissionIdentifier};
pub use errors::{ErrorKind, PdrError, StoreError};
pub use ids::{Locator, PatientId, TargetRef};
pub use manifest::{Manifest, ManifestEntry};
pub use provenance::{CorrelationRecord, CorrelationSource};
pub use record::{ClinicalRecord, Entry, Verb};
pub use result::Result;
