//! Init command implementation
//!
//! This module implements the `init` command for generating a sample
//! configuration file.

use clap::Args;
use std::fs;
use std::path::Path;

/// Arguments for the init command
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Path where to create the configuration file
    #[arg(short, long, default_value = "pdr.toml")]
    pub output: String,

    /// Target a FHIR server instead of the in-memory store
    #[arg(long)]
    pub fhir: bool,

    /// Overwrite existing file
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    /// Execute the init command
    pub async fn execute(&self) -> anyhow::Result<i32> {
        tracing::info!(output = %self.output, "Initializing configuration file");

        println!("📝 Initializing PDR configuration");
        println!();

        if Path::new(&self.output).exists() && !self.force {
            println!("❌ Configuration file already exists: {}", self.output);
            println!("   Use --force to overwrite");
            return Ok(2);
        }

        match fs::write(&self.output, Self::generate_config(self.fhir)) {
            Ok(_) => {
                println!("✅ Configuration file created: {}", self.output);
                println!();
                println!("Next steps:");
                println!("  1. Edit {} with your settings", self.output);
                if self.fhir {
                    println!("  2. Set PDR_FHIR_TOKEN in your environment or .env file");
                } else {
                    println!("  2. Preload the target Patient with `pdr process --preload`");
                }
                println!("  3. Validate configuration: pdr validate-config");
                println!("  4. Ingest a submission: pdr process submission.json");
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Failed to write configuration file");
                println!("   Error: {e}");
                Ok(5)
            }
        }
    }

    fn generate_config(fhir: bool) -> String {
        let store = if fhir {
            r#"[store]
# memory | fhir
backend = "fhir"

[store.fhir]
base_url = "https://fhir.example.org/r4"
auth_token = "${PDR_FHIR_TOKEN}"
timeout_seconds = 30

[store.fhir.retry]
max_retries = 3
initial_delay_ms = 500
max_delay_ms = 5000
backoff_multiplier = 2.0
"#
        } else {
            r#"[store]
# memory | fhir
backend = "memory"
"#
        };

        format!(
            r#"# PDR Ingest Configuration File
# Patient Data Receipt ingestion pipeline

[application]
log_level = "info"
# Public base URL reported as the response source endpoint
# server_address = "https://healthmanager.example.org/fhir"

[pipeline]
pdr_event = "urn:mitre:healthmanager:pdr"
# Entries transformed and matched concurrently per submission (1-64)
worker_concurrency = 8
# Reply timeout for one submission
reply_timeout_ms = 30000
# Attempts at the manifest read-modify-write (1-10)
manifest_max_retries = 5

{store}
[transformers]
enable_healthkit = true
healthkit_endpoint = "urn:apple:health-kit"

[logging]
local_enabled = false
local_path = "/var/log/pdr"
# daily | hourly
local_rotation = "daily"
"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;

    #[test]
    fn test_generated_memory_config_loads() {
        let config = load_config_from_str(&InitArgs::generate_config(false)).unwrap();
        assert_eq!(config.store.backend.to_string(), "memory");
        assert_eq!(config.pipeline.worker_concurrency, 8);
    }

    #[test]
    fn test_generated_fhir_config_references_token() {
        let config = InitArgs::generate_config(true);
        assert!(config.contains("backend = \"fhir\""));
        assert!(config.contains("${PDR_FHIR_TOKEN}"));
    }

    #[tokio::test]
    async fn test_refuses_to_overwrite() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let args = InitArgs {
            output: file.path().to_string_lossy().into_owned(),
            fhir: false,
            force: false,
        };

        assert_eq!(args.execute().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_force_overwrites() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let args = InitArgs {
            output: file.path().to_string_lossy().into_owned(),
            fhir: false,
            force: true,
        };

        assert_eq!(args.execute().await.unwrap(), 0);
        let written = fs::read_to_string(file.path()).unwrap();
        assert!(written.contains("[pipeline]"));
    }
}
