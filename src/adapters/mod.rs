//! External system integrations for the PDR pipeline.
//!
//! - [`store`] - Clinical resource store abstraction and its backends
//!
//! # Design Pattern
//!
//! Adapters isolate external dependencies behind traits so the pipeline can be
//! exercised against an in-memory store and deployed against a FHIR server:
//!
//! ```rust,no_run
//! use pdr_ingest::adapters::store::{FhirRestStore, ResourceStore};
//! use pdr_ingest::config::{secret_string, FhirStoreConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FhirStoreConfig {
//!     base_url: "https://fhir.example.org/r4".to_string(),
//!     auth_token: Some(secret_string("token".to_string())),
//!     ..FhirStoreConfig::default()
//! };
//!
//! let store = FhirRestStore::new(config)?;
//! let patient = store.read("Patient", "123").await?;
//! println!("{}", patient.reference());
//! # Ok(())
//! # }
//! ```

pub mod store;
