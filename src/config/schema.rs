//! Configuration schema types
//!
//! This module defines the configuration structure for the PDR pipeline.

use crate::config::SecretString;
use serde::{Deserialize, Serialize};

/// Supported PDR message event
pub const DEFAULT_PDR_EVENT: &str = "urn:mitre:healthmanager:pdr";

/// Source endpoint of Apple HealthKit exports
pub const DEFAULT_HEALTHKIT_ENDPOINT: &str = "urn:apple:health-kit";

/// Resource store backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local in-memory store
    #[default]
    Memory,
    /// FHIR R4 REST server
    Fhir,
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Fhir => write!(f, "fhir"),
        }
    }
}

/// Main PDR configuration
///
/// This is the root configuration structure that maps to the TOML file.
/// Every section is optional; missing sections take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdrConfig {
    /// Application-level settings
    #[serde(default)]
    pub application: ApplicationConfig,

    /// Pipeline tuning
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Resource store selection and connection
    #[serde(default)]
    pub store: StoreConfig,

    /// Source-specific transformers
    #[serde(default)]
    pub transformers: TransformersConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PdrConfig {
    /// Validates the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid
    pub fn validate(&self) -> Result<(), String> {
        self.application.validate()?;
        self.pipeline.validate()?;
        self.store.validate()?;
        self.transformers.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Public base URL of this server, used as the response source endpoint.
    /// When unset, the caller-supplied base is used.
    #[serde(default)]
    pub server_address: Option<String>,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            server_address: None,
        }
    }
}

impl ApplicationConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            ));
        }

        if let Some(address) = &self.server_address {
            url::Url::parse(address).map_err(|e| {
                format!("application.server_address '{address}' is not a valid URL: {e}")
            })?;
        }
        Ok(())
    }
}

/// Pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Supported message event URI
    #[serde(default = "default_pdr_event")]
    pub pdr_event: String,

    /// Entries transformed and matched concurrently per submission
    #[serde(default = "default_worker_concurrency")]
    pub worker_concurrency: usize,

    /// Reply timeout for one submission, in milliseconds
    #[serde(default = "default_reply_timeout_ms")]
    pub reply_timeout_ms: u64,

    /// Attempts at the manifest read-modify-write before giving up
    #[serde(default = "default_manifest_max_retries")]
    pub manifest_max_retries: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pdr_event: default_pdr_event(),
            worker_concurrency: default_worker_concurrency(),
            reply_timeout_ms: default_reply_timeout_ms(),
            manifest_max_retries: default_manifest_max_retries(),
        }
    }
}

impl PipelineConfig {
    fn validate(&self) -> Result<(), String> {
        if self.pdr_event.trim().is_empty() {
            return Err("pipeline.pdr_event cannot be empty".to_string());
        }

        if self.worker_concurrency == 0 || self.worker_concurrency > 64 {
            return Err("pipeline.worker_concurrency must be between 1 and 64".to_string());
        }

        if self.reply_timeout_ms == 0 {
            return Err("pipeline.reply_timeout_ms must be > 0".to_string());
        }

        if self.manifest_max_retries == 0 || self.manifest_max_retries > 10 {
            return Err("pipeline.manifest_max_retries must be between 1 and 10".to_string());
        }
        Ok(())
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Initial delay in milliseconds
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    /// Maximum delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    fn validate(&self) -> Result<(), String> {
        if self.max_retries == 0 || self.max_retries > 10 {
            return Err("store.fhir.retry.max_retries must be between 1 and 10".to_string());
        }
        if self.backoff_multiplier < 1.0 {
            return Err("store.fhir.retry.backoff_multiplier must be >= 1.0".to_string());
        }
        if self.initial_delay_ms > self.max_delay_ms {
            return Err(
                "store.fhir.retry.initial_delay_ms must not exceed max_delay_ms".to_string(),
            );
        }
        Ok(())
    }
}

/// Resource store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend (memory or fhir)
    #[serde(default)]
    pub backend: StoreBackend,

    /// FHIR REST server settings (required if backend = fhir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fhir: Option<FhirStoreConfig>,
}

impl StoreConfig {
    fn validate(&self) -> Result<(), String> {
        // Only the active backend is validated
        match (self.backend, &self.fhir) {
            (StoreBackend::Fhir, Some(fhir)) => fhir.validate(),
            (StoreBackend::Fhir, None) => Err(
                "store.fhir configuration is required when store.backend = 'fhir'".to_string(),
            ),
            (StoreBackend::Memory, _) => Ok(()),
        }
    }
}

/// FHIR REST server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FhirStoreConfig {
    /// Base URL of the FHIR server
    pub base_url: String,

    /// Bearer token (optional)
    /// Stored securely in memory and automatically zeroized on drop
    #[serde(default)]
    pub auth_token: Option<SecretString>,

    /// Request timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Retry configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for FhirStoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/fhir".to_string(),
            auth_token: None,
            timeout_seconds: default_timeout_seconds(),
            retry: RetryConfig::default(),
        }
    }
}

impl FhirStoreConfig {
    fn validate(&self) -> Result<(), String> {
        use secrecy::ExposeSecret;

        if self.base_url.is_empty() {
            return Err("store.fhir.base_url cannot be empty".to_string());
        }

        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err("store.fhir.base_url must start with http:// or https://".to_string());
        }

        if let Some(token) = &self.auth_token {
            if token.expose_secret().is_empty() {
                return Err("store.fhir.auth_token cannot be empty when set".to_string());
            }
        }

        if self.timeout_seconds == 0 {
            return Err("store.fhir.timeout_seconds must be > 0".to_string());
        }

        self.retry.validate()
    }
}

/// Transformer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformersConfig {
    /// Register the Apple HealthKit transformer
    #[serde(default = "default_true")]
    pub enable_healthkit: bool,

    /// Source endpoint routed to the HealthKit transformer
    #[serde(default = "default_healthkit_endpoint")]
    pub healthkit_endpoint: String,
}

impl Default for TransformersConfig {
    fn default() -> Self {
        Self {
            enable_healthkit: true,
            healthkit_endpoint: default_healthkit_endpoint(),
        }
    }
}

impl TransformersConfig {
    fn validate(&self) -> Result<(), String> {
        if self.enable_healthkit && self.healthkit_endpoint.trim().is_empty() {
            return Err("transformers.healthkit_endpoint cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Enable local file logging
    #[serde(default)]
    pub local_enabled: bool,

    /// Local log directory
    #[serde(default = "default_local_path")]
    pub local_path: String,

    /// Log rotation strategy
    #[serde(default = "default_local_rotation")]
    pub local_rotation: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            local_enabled: false,
            local_path: default_local_path(),
            local_rotation: default_local_rotation(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), String> {
        let valid_rotations = ["daily", "hourly"];
        if !valid_rotations.contains(&self.local_rotation.as_str()) {
            return Err(format!(
                "Invalid logging.local_rotation '{}'. Must be one of: {}",
                self.local_rotation,
                valid_rotations.join(", ")
            ));
        }

        if self.local_enabled && self.local_path.trim().is_empty() {
            return Err("logging.local_path cannot be empty when local logging is enabled".to_string());
        }
        Ok(())
    }
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_pdr_event() -> String {
    DEFAULT_PDR_EVENT.to_string()
}

fn default_worker_concurrency() -> usize {
    8
}

fn default_reply_timeout_ms() -> u64 {
    30_000
}

fn default_manifest_max_retries() -> usize {
    3
}

fn default_true() -> bool {
    true
}

fn default_timeout_seconds() -> u64 {
    60
}

fn default_max_retries() -> usize {
    3
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_healthkit_endpoint() -> String {
    DEFAULT_HEALTHKIT_ENDPOINT.to_string()
}

fn default_local_path() -> String {
    "/var/log/pdr".to_string()
}

fn default_local_rotation() -> String {
    "daily".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::secret_string;

    #[test]
    fn test_default_config_is_valid() {
        let config = PdrConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.pipeline.pdr_event, DEFAULT_PDR_EVENT);
    }

    #[test]
    fn test_application_config_validation() {
        let mut config = ApplicationConfig::default();
        assert!(config.validate().is_ok());

        config.log_level = "verbose".to_string();
        assert!(config.validate().is_err());

        config.log_level = "debug".to_string();
        config.server_address = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.server_address = Some("https://hm.example.org/fhir".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_pipeline_config_validation() {
        let mut config = PipelineConfig::default();
        assert!(config.validate().is_ok());

        config.worker_concurrency = 0;
        assert!(config.validate().is_err());

        config.worker_concurrency = 65;
        assert!(config.validate().is_err());

        config.worker_concurrency = 4;
        config.reply_timeout_ms = 0;
        assert!(config.validate().is_err());

        config.reply_timeout_ms = 1000;
        config.manifest_max_retries = 11;
        assert!(config.validate().is_err());

        config.manifest_max_retries = 1;
        config.pdr_event = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_store_config_validation() {
        let mut config = StoreConfig {
            backend: StoreBackend::Fhir,
            fhir: None,
        };
        assert!(config.validate().is_err());

        config.fhir = Some(FhirStoreConfig::default());
        assert!(config.validate().is_ok());

        config.fhir = Some(FhirStoreConfig {
            base_url: "ftp://fhir".to_string(),
            ..FhirStoreConfig::default()
        });
        assert!(config.validate().is_err());

        config.fhir = Some(FhirStoreConfig {
            auth_token: Some(secret_string(String::new())),
            ..FhirStoreConfig::default()
        });
        assert!(config.validate().is_err());

        // An invalid inactive section is ignored
        config.backend = StoreBackend::Memory;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_retry_config_validation() {
        let mut retry = RetryConfig::default();
        assert!(retry.validate().is_ok());

        retry.backoff_multiplier = 0.5;
        assert!(retry.validate().is_err());

        retry.backoff_multiplier = 2.0;
        retry.initial_delay_ms = 60_000;
        assert!(retry.validate().is_err());
    }

    #[test]
    fn test_logging_config_default() {
        let config = LoggingConfig::default();
        assert!(!config.local_enabled);
        assert_eq!(config.local_path, "/var/log/pdr");
        assert_eq!(config.local_rotation, "daily");
        assert!(config.validate().is_ok());

        let hourly = LoggingConfig {
            local_rotation: "hourly".to_string(),
            ..LoggingConfig::default()
        };
        assert!(hourly.validate().is_ok());

        let size = LoggingConfig {
            local_rotation: "size".to_string(),
            ..LoggingConfig::default()
        };
        assert!(size.validate().is_err());
    }

    #[test]
    fn test_deserialize_minimal_toml() {
        let config: PdrConfig = toml::from_str(
            r#"
            [store]
            backend = "fhir"

            [store.fhir]
            base_url = "https://fhir.example.org/r4"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.backend, StoreBackend::Fhir);
        let fhir = config.store.fhir.as_ref().unwrap();
        assert_eq!(fhir.timeout_seconds, 60);
        assert_eq!(fhir.retry.max_retries, 3);
        assert!(config.transformers.enable_healthkit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        assert_eq!(default_log_level(), "info");
        assert_eq!(default_worker_concurrency(), 8);
        assert_eq!(default_reply_timeout_ms(), 30_000);
        assert_eq!(default_manifest_max_retries(), 3);
        assert_eq!(default_healthkit_endpoint(), "urn:apple:health-kit");
    }
}
