//! Configuration loader with TOML parsing and environment variable overrides

use super::schema::{FhirStoreConfig, PdrConfig, StoreBackend};
use super::secret::secret_string;
use crate::domain::errors::PdrError;
use crate::domain::result::Result;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Loads configuration from a TOML file
///
/// This function:
/// 1. Reads the TOML file
/// 2. Performs environment variable substitution (${VAR} syntax)
/// 3. Parses the TOML into PdrConfig
/// 4. Applies environment variable overrides (PDR_* prefix)
/// 5. Validates the configuration
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// Returns an error if:
/// - File cannot be read
/// - TOML parsing fails
/// - A referenced environment variable is not set
/// - Configuration validation fails
///
/// # Examples
///
/// ```no_run
/// use pdr_ingest::config::loader::load_config;
///
/// let config = load_config("pdr.toml").expect("Failed to load config");
/// ```
pub fn load_config(path: impl AsRef<Path>) -> Result<PdrConfig> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(PdrError::Configuration(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }

    let contents = fs::read_to_string(path).map_err(|e| {
        PdrError::Configuration(format!(
            "Failed to read configuration file {}: {}",
            path.display(),
            e
        ))
    })?;

    load_config_from_str(&contents)
}

/// Same as [`load_config`], from TOML text already in memory
pub fn load_config_from_str(contents: &str) -> Result<PdrConfig> {
    let contents = substitute_env_vars(contents)?;

    let mut config: PdrConfig = toml::from_str(&contents)
        .map_err(|e| PdrError::Configuration(format!("Failed to parse TOML: {e}")))?;

    apply_env_overrides(&mut config)?;

    config
        .validate()
        .map_err(|e| PdrError::Configuration(format!("Configuration validation failed: {e}")))?;

    Ok(config)
}

/// Substitutes environment variables in the format ${VAR_NAME}
///
/// Comment lines are copied through untouched.
///
/// # Errors
///
/// Returns an error naming every referenced environment variable that is not set
fn substitute_env_vars(input: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}")
        .map_err(|e| PdrError::Configuration(format!("Invalid substitution pattern: {e}")))?;
    let mut result = String::with_capacity(input.len());
    let mut missing_vars: Vec<String> = Vec::new();

    for line in input.lines() {
        if line.trim_start().starts_with('#') {
            result.push_str(line);
            result.push('\n');
            continue;
        }

        let mut processed_line = line.to_string();
        for cap in re.captures_iter(line) {
            let var_name = &cap[1];
            match std::env::var(var_name) {
                Ok(value) => {
                    processed_line = processed_line.replace(&cap[0], &value);
                }
                Err(_) => {
                    if !missing_vars.iter().any(|v| v == var_name) {
                        missing_vars.push(var_name.to_string());
                    }
                }
            }
        }
        result.push_str(&processed_line);
        result.push('\n');
    }

    if !missing_vars.is_empty() {
        return Err(PdrError::Configuration(format!(
            "Missing required environment variables: {}",
            missing_vars.join(", ")
        )));
    }

    Ok(result)
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

/// Parses an override, rejecting values that don't parse
fn parsed_override<T: FromStr>(name: &str) -> Result<Option<T>> {
    match env_override(name) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|_| {
            PdrError::Configuration(format!("Environment override {name}='{raw}' is not valid"))
        }),
        None => Ok(None),
    }
}

/// Applies environment variable overrides using the PDR_* prefix
///
/// Environment variables follow the pattern: PDR_<SECTION>_<KEY>
/// For example: PDR_STORE_FHIR_BASE_URL, PDR_PIPELINE_WORKER_CONCURRENCY
fn apply_env_overrides(config: &mut PdrConfig) -> Result<()> {
    // Application overrides
    if let Some(val) = env_override("PDR_APPLICATION_LOG_LEVEL") {
        config.application.log_level = val;
    }
    if let Some(val) = env_override("PDR_APPLICATION_SERVER_ADDRESS") {
        config.application.server_address = Some(val);
    }

    // Pipeline overrides
    if let Some(val) = env_override("PDR_PIPELINE_PDR_EVENT") {
        config.pipeline.pdr_event = val;
    }
    if let Some(val) = parsed_override("PDR_PIPELINE_WORKER_CONCURRENCY")? {
        config.pipeline.worker_concurrency = val;
    }
    if let Some(val) = parsed_override("PDR_PIPELINE_REPLY_TIMEOUT_MS")? {
        config.pipeline.reply_timeout_ms = val;
    }
    if let Some(val) = parsed_override("PDR_PIPELINE_MANIFEST_MAX_RETRIES")? {
        config.pipeline.manifest_max_retries = val;
    }

    // Store overrides
    if let Some(val) = env_override("PDR_STORE_BACKEND") {
        config.store.backend = match val.to_lowercase().as_str() {
            "memory" => StoreBackend::Memory,
            "fhir" => StoreBackend::Fhir,
            other => {
                return Err(PdrError::Configuration(format!(
                    "Environment override PDR_STORE_BACKEND='{other}' must be 'memory' or 'fhir'"
                )))
            }
        };
    }
    if let Some(val) = env_override("PDR_STORE_FHIR_BASE_URL") {
        config
            .store
            .fhir
            .get_or_insert_with(FhirStoreConfig::default)
            .base_url = val;
    }
    if let Some(ref mut fhir) = config.store.fhir {
        if let Some(val) = env_override("PDR_STORE_FHIR_AUTH_TOKEN") {
            fhir.auth_token = Some(secret_string(val));
        }
        if let Some(val) = parsed_override("PDR_STORE_FHIR_TIMEOUT_SECONDS")? {
            fhir.timeout_seconds = val;
        }
        if let Some(val) = parsed_override("PDR_STORE_FHIR_RETRY_MAX_RETRIES")? {
            fhir.retry.max_retries = val;
        }
    }

    // Transformer overrides
    if let Some(val) = parsed_override("PDR_TRANSFORMERS_ENABLE_HEALTHKIT")? {
        config.transformers.enable_healthkit = val;
    }
    if let Some(val) = env_override("PDR_TRANSFORMERS_HEALTHKIT_ENDPOINT") {
        config.transformers.healthkit_endpoint = val;
    }

    // Logging overrides
    if let Some(val) = parsed_override("PDR_LOGGING_LOCAL_ENABLED")? {
        config.logging.local_enabled = val;
    }
    if let Some(val) = env_override("PDR_LOGGING_LOCAL_PATH") {
        config.logging.local_path = val;
    }
    if let Some(val) = env_override("PDR_LOGGING_LOCAL_ROTATION") {
        config.logging.local_rotation = val;
    }

    Ok(())
}
