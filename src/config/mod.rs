//! Configuration management for the PDR pipeline.
//!
//! # Overview
//!
//! Configuration is a TOML file with support for:
//! - Environment variable substitution (`${VAR_NAME}`)
//! - `PDR_<SECTION>_<KEY>` environment overrides
//! - Default values for every setting
//! - Validation on load
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use pdr_ingest::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("pdr.toml")?;
//! println!("Store backend: {}", config.store.backend);
//! println!("Workers: {}", config.pipeline.worker_concurrency);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - Log level and public server address
//! - [`PipelineConfig`] - Event URI, concurrency, reply timeout, manifest retries
//! - [`StoreConfig`] - Store backend and FHIR REST connection
//! - [`TransformersConfig`] - Source-specific transformer registration
//! - [`LoggingConfig`] - Local file logging
//!
//! # Example Configuration
//!
//! ```toml
//! [application]
//! log_level = "info"
//! server_address = "https://healthmanager.example.org/fhir"
//!
//! [pipeline]
//! worker_concurrency = 8
//! reply_timeout_ms = 30000
//!
//! [store]
//! backend = "fhir"
//!
//! [store.fhir]
//! base_url = "https://fhir.example.org/r4"
//! auth_token = "${PDR_FHIR_TOKEN}"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, load_config_from_str};
pub use schema::{
    ApplicationConfig, FhirStoreConfig, LoggingConfig, PdrConfig, PipelineConfig, RetryConfig,
    StoreBackend, StoreConfig, TransformersConfig, DEFAULT_HEALTHKIT_ENDPOINT, DEFAULT_PDR_EVENT,
};
pub use secret::{secret_string, SecretString, SecretValue};
