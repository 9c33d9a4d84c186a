//! Check command implementation
//!
//! Validates a message Bundle's envelope the way `process` would, without
//! touching any store.

use crate::cli::commands::read_json;
use crate::config::{load_config, DEFAULT_PDR_EVENT};
use crate::core::EnvelopeValidator;
use clap::Args;
use std::path::Path;

/// Arguments for the check command
#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Message Bundle to check (`-` reads stdin)
    pub bundle: String,
}

impl CheckArgs {
    /// Execute the check command
    ///
    /// The supported event comes from the configuration file when one exists.
    pub async fn execute(&self, config_path: &str) -> anyhow::Result<i32> {
        let event = if Path::new(config_path).exists() {
            match load_config(config_path) {
                Ok(config) => config.pipeline.pdr_event,
                Err(e) => {
                    println!("❌ Failed to load configuration file");
                    println!("   Error: {e}");
                    return Ok(2);
                }
            }
        } else {
            DEFAULT_PDR_EVENT.to_string()
        };

        let bundle = match read_json(&self.bundle) {
            Ok(value) => value,
            Err(e) => {
                println!("❌ {e:#}");
                return Ok(2);
            }
        };

        match EnvelopeValidator::new(event).validate(&bundle) {
            Ok(submission) => {
                println!("✅ Submission is valid");
                println!();
                println!("  Patient: {}", submission.patient.reference());
                println!("  Source: {}", submission.source_endpoint);
                if let Some(id) = &submission.source_message_id {
                    println!("  Message ID: {id}");
                }
                println!("  Entries: {}", submission.entries.len());
                println!();
                Ok(0)
            }
            Err(e) => {
                println!("❌ Submission rejected");
                println!("   Error: {e}");
                Ok(1)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn write_bundle(bundle: serde_json::Value) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{bundle}").unwrap();
        file
    }

    #[tokio::test]
    async fn test_valid_bundle() {
        let file = write_bundle(json!({
            "resourceType": "Bundle",
            "type": "message",
            "entry": [
                {"resource": {
                    "resourceType": "MessageHeader",
                    "eventUri": DEFAULT_PDR_EVENT,
                    "source": {"endpoint": "urn:test"},
                    "focus": [{"reference": "Patient/p1"}]
                }},
                {"resource": {"resourceType": "Observation", "status": "final"}}
            ]
        }));
        let args = CheckArgs {
            bundle: file.path().to_string_lossy().into_owned(),
        };

        assert_eq!(args.execute("/nonexistent/pdr.toml").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_bundle() {
        let file = write_bundle(json!({"resourceType": "Bundle", "type": "collection"}));
        let args = CheckArgs {
            bundle: file.path().to_string_lossy().into_owned(),
        };

        assert_eq!(args.execute("/nonexistent/pdr.toml").await.unwrap(), 1);
    }
}
