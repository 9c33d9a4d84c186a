// PDR Ingest - Patient Data Receipt ingestion pipeline
// Copyright (c) 2025 Open Health Manager Contributors
// Licensed under the Apache License 2.0

//! # PDR Ingest - Patient Data Receipt ingestion
//!
//! Accepts FHIR message Bundles pushed by external sources (wearable exports,
//! patient apps) on behalf of a patient, and files their records against that
//! patient without duplicating what a previous submission already delivered.
//!
//! ## Overview
//!
//! For each submission the pipeline:
//! - **Validates** the message envelope and its target patient
//! - **Archives** the submission verbatim as an audit record
//! - **Transforms** source-specific payloads (e.g. Apple HealthKit samples)
//!   into records scoped to the patient
//! - **Correlates** every record with what earlier submissions from the same
//!   source produced, turning resubmissions into updates
//! - **Commits** all records in one atomic transaction, then files a
//!   correlation record per record and appends to the patient's manifest
//!
//! ## Architecture
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Pipeline stages and orchestration
//! - [`adapters`] - Clinical resource store backends
//! - [`domain`] - Core domain types and models
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging and observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdr_ingest::adapters::store::create_store;
//! use pdr_ingest::config::load_config;
//! use pdr_ingest::core::PdrPipeline;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("pdr.toml")?;
//!     let pipeline = PdrPipeline::new(&config, create_store(&config.store)?);
//!
//!     let bundle = std::fs::read_to_string("submission.json")?;
//!     let response = pipeline.process_submission(&bundle, "http://localhost:8080/fhir").await;
//!     println!("{response:#}");
//!     Ok(())
//! }
//! ```
//!
//! ## Error Handling
//!
//! Library functions return [`domain::Result`], carrying a [`domain::PdrError`].
//! [`domain::PdrError::kind`] tells callers whether resubmitting can help:
//!
//! ```rust
//! use pdr_ingest::domain::PdrError;
//!
//! let error = PdrError::TransactionFailure("conflict".to_string());
//! assert!(error.kind().is_retryable());
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;
