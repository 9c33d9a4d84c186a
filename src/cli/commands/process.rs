//! Process command implementation
//!
//! Runs one submission through the full pipeline against the configured
//! store and prints the response envelope to stdout.

use crate::adapters::store::{create_store, ResourceStore};
use crate::cli::commands::{read_input, read_json};
use crate::config::load_config;
use crate::core::{response_code, PdrPipeline, ResponseCode};
use clap::Args;
use serde_json::Value;

/// Arguments for the process command
#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Message Bundle to ingest (`-` reads stdin)
    pub bundle: String,

    /// Base URL this server answers on, used when
    /// `application.server_address` is not configured
    #[arg(long, default_value = "http://localhost:8080/fhir")]
    pub server_base: String,

    /// Resources (or Bundles of resources) to store before processing,
    /// e.g. the target Patient when running against the memory store
    #[arg(long)]
    pub preload: Vec<String>,
}

impl ProcessArgs {
    /// Execute the process command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, bundle = %self.bundle, "Processing submission");

        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("❌ Failed to load configuration file");
                eprintln!("   Error: {e}");
                return Ok(2);
            }
        };

        let store = match create_store(&config.store) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to create resource store");
                eprintln!("   Error: {e}");
                return Ok(4);
            }
        };

        for path in &self.preload {
            match preload(store.as_ref(), path).await {
                Ok(count) => tracing::info!(path = %path, count, "Preloaded resources"),
                Err(e) => {
                    eprintln!("❌ Failed to preload {path}");
                    eprintln!("   Error: {e:#}");
                    return Ok(2);
                }
            }
        }

        let bundle = match read_input(&self.bundle) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("❌ {e:#}");
                return Ok(2);
            }
        };

        let pipeline = PdrPipeline::new(&config, store);
        let response = pipeline
            .process_submission(&bundle, &self.server_base)
            .await;

        println!("{}", serde_json::to_string_pretty(&response)?);

        match response_code(&response) {
            Some(code) if code == ResponseCode::Ok.as_str() => Ok(0),
            _ => Ok(1),
        }
    }
}

/// Store one resource, or every entry resource of a Bundle, at its own id
async fn preload(store: &dyn ResourceStore, path: &str) -> anyhow::Result<usize> {
    let document = read_json(path)?;
    let resources: Vec<Value> = match document["resourceType"].as_str() {
        Some("Bundle") => document["entry"]
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.get("resource").cloned())
                    .collect()
            })
            .unwrap_or_default(),
        Some(_) => vec![document],
        None => anyhow::bail!("{path} has no resourceType"),
    };

    let count = resources.len();
    for resource in resources {
        store.update(resource, None).await?;
    }
    Ok(count)
}
