//! Validate config command implementation
//!
//! This module implements the `validate-config` command for validating
//! the PDR configuration file.

use crate::config::load_config;
use crate::config::schema::StoreBackend;
use clap::Args;

/// Arguments for the validate-config command
#[derive(Args, Debug)]
pub struct ValidateArgs {}

impl ValidateArgs {
    /// Execute the validate-config command
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        tracing::info!(config_path = %config_path, "Validating configuration");

        println!("🔍 Validating configuration file: {config_path}");
        println!();

        // load_config validates as it loads
        let config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                println!("❌ Configuration is invalid");
                println!("   Error: {e}");
                println!();
                return Ok(2);
            }
        };

        println!("✅ Configuration is valid");
        println!();
        println!("Configuration Summary:");
        println!("  Log Level: {}", config.application.log_level);
        if let Some(address) = &config.application.server_address {
            println!("  Server Address: {address}");
        }
        println!("  PDR Event: {}", config.pipeline.pdr_event);
        println!("  Worker Concurrency: {}", config.pipeline.worker_concurrency);
        println!("  Reply Timeout: {}ms", config.pipeline.reply_timeout_ms);
        println!("  Manifest Retries: {}", config.pipeline.manifest_max_retries);
        println!("  Store Backend: {}", config.store.backend);
        if let (StoreBackend::Fhir, Some(fhir)) = (config.store.backend, &config.store.fhir) {
            println!("  FHIR Server: {}", fhir.base_url);
            println!(
                "  FHIR Auth: {}",
                if fhir.auth_token.is_some() { "bearer token" } else { "none" }
            );
        }
        if config.transformers.enable_healthkit {
            println!("  HealthKit Source: {}", config.transformers.healthkit_endpoint);
        }
        println!();
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_valid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[pipeline]\nworker_concurrency = 4\n").unwrap();

        let code = ValidateArgs {}
            .execute(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, 0);
    }

    #[tokio::test]
    async fn test_invalid_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[store]\nbackend = \"fhir\"\n").unwrap();

        let code = ValidateArgs {}
            .execute(file.path().to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(code, 2);
    }
}
