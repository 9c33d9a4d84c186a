//! Core business logic for the PDR pipeline.
//!
//! # Modules
//!
//! - [`validate`] - Envelope validation and parsing
//! - [`archive`] - Raw submission archive
//! - [`transform`] - Source-specific transformers and the registry routing to them
//! - [`matcher`] - Create-vs-update correlation
//! - [`write`] - Atomic data write, correlation records and manifest
//! - [`response`] - Response envelopes
//! - [`pipeline`] - Orchestration and error boundary
//!
//! # Example
//!
//! ```rust,no_run
//! use pdr_ingest::adapters::store::create_store;
//! use pdr_ingest::config::load_config;
//! use pdr_ingest::core::PdrPipeline;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("pdr.toml")?;
//! let store = create_store(&config.store)?;
//! let pipeline = PdrPipeline::new(&config, store);
//!
//! let bundle = std::fs::read_to_string("submission.json")?;
//! let response = pipeline
//!     .process_submission(&bundle, "https://healthmanager.example.org/fhir")
//!     .await;
//! println!("{response:#}");
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod matcher;
pub mod pipeline;
pub mod response;
pub mod transform;
pub mod validate;
pub mod write;

pub use pipeline::{IngestOutcome, PdrPipeline};
pub use response::{response_code, ResponseBuilder, ResponseCode};
pub use validate::EnvelopeValidator;
