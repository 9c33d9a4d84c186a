//! Integration tests for configuration loading and validation
//!
//! Tests that modify environment variables hold `ENV_MUTEX`.

use pdr_ingest::adapters::store::create_store;
use pdr_ingest::config::{load_config, StoreBackend};
use secrecy::ExposeSecret;
use std::io::Write;
use std::sync::Mutex;
use tempfile::NamedTempFile;

static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn cleanup_env_vars() {
    for name in [
        "PDR_APPLICATION_LOG_LEVEL",
        "PDR_PIPELINE_WORKER_CONCURRENCY",
        "PDR_PIPELINE_REPLY_TIMEOUT_MS",
        "PDR_STORE_BACKEND",
        "PDR_STORE_FHIR_BASE_URL",
        "PDR_STORE_FHIR_AUTH_TOKEN",
        "PDR_TRANSFORMERS_ENABLE_HEALTHKIT",
        "TEST_PDR_FHIR_TOKEN",
    ] {
        std::env::remove_var(name);
    }
}

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn test_load_complete_config() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();
    std::env::set_var("TEST_PDR_FHIR_TOKEN", "secret-token");

    let file = write_config(
        r#"
[application]
log_level = "debug"
server_address = "https://healthmanager.example.org/fhir"

[pipeline]
pdr_event = "urn:mitre:healthmanager:pdr"
worker_concurrency = 4
reply_timeout_ms = 10000
manifest_max_retries = 5

[store]
backend = "fhir"

[store.fhir]
base_url = "https://fhir.example.org/r4"
auth_token = "${TEST_PDR_FHIR_TOKEN}"
timeout_seconds = 15

[store.fhir.retry]
max_retries = 2
initial_delay_ms = 100
max_delay_ms = 1000

[transformers]
enable_healthkit = true
healthkit_endpoint = "urn:apple:health-kit"

[logging]
local_enabled = false
local_rotation = "hourly"
"#,
    );

    let config = load_config(file.path()).unwrap();

    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.pipeline.worker_concurrency, 4);
    assert_eq!(config.pipeline.reply_timeout_ms, 10000);
    assert_eq!(config.pipeline.manifest_max_retries, 5);
    assert_eq!(config.store.backend, StoreBackend::Fhir);

    let fhir = config.store.fhir.as_ref().unwrap();
    assert_eq!(fhir.base_url, "https://fhir.example.org/r4");
    assert_eq!(
        fhir.auth_token.as_ref().map(|t| t.expose_secret().to_string()),
        Some("secret-token".to_string())
    );
    assert_eq!(fhir.retry.max_retries, 2);
    assert_eq!(config.logging.local_rotation, "hourly");

    let store = create_store(&config.store).unwrap();
    assert_eq!(store.backend_name(), "fhir");

    cleanup_env_vars();
}

#[test]
fn test_empty_file_uses_defaults() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let file = write_config("");
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.application.log_level, "info");
    assert_eq!(config.pipeline.pdr_event, "urn:mitre:healthmanager:pdr");
    assert_eq!(config.store.backend, StoreBackend::Memory);
    assert!(config.transformers.enable_healthkit);
}

#[test]
fn test_env_overrides_win_over_file() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();
    std::env::set_var("PDR_APPLICATION_LOG_LEVEL", "warn");
    std::env::set_var("PDR_PIPELINE_WORKER_CONCURRENCY", "16");
    std::env::set_var("PDR_STORE_BACKEND", "fhir");
    std::env::set_var("PDR_STORE_FHIR_BASE_URL", "https://override.example.org/fhir");
    std::env::set_var("PDR_TRANSFORMERS_ENABLE_HEALTHKIT", "false");

    let file = write_config(
        r#"
[application]
log_level = "debug"

[pipeline]
worker_concurrency = 2
"#,
    );
    let config = load_config(file.path()).unwrap();

    assert_eq!(config.application.log_level, "warn");
    assert_eq!(config.pipeline.worker_concurrency, 16);
    assert_eq!(config.store.backend, StoreBackend::Fhir);
    assert_eq!(
        config.store.fhir.as_ref().unwrap().base_url,
        "https://override.example.org/fhir"
    );
    assert!(!config.transformers.enable_healthkit);

    cleanup_env_vars();
}

#[test]
fn test_unparseable_override_is_rejected() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();
    std::env::set_var("PDR_PIPELINE_REPLY_TIMEOUT_MS", "soon");

    let file = write_config("");
    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("PDR_PIPELINE_REPLY_TIMEOUT_MS"));

    cleanup_env_vars();
}

#[test]
fn test_missing_env_var_is_reported() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let file = write_config(
        r#"
[store]
backend = "fhir"

[store.fhir]
base_url = "https://fhir.example.org/r4"
auth_token = "${TEST_PDR_FHIR_TOKEN}"
"#,
    );
    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("TEST_PDR_FHIR_TOKEN"));
}

#[test]
fn test_fhir_backend_without_section_is_invalid() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    let file = write_config("[store]\nbackend = \"fhir\"\n");
    let err = load_config(file.path()).unwrap_err();
    assert!(err.to_string().contains("store.fhir"));
}

#[test]
fn test_out_of_range_values_are_invalid() {
    let _lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_env_vars();

    for contents in [
        "[pipeline]\nworker_concurrency = 0\n",
        "[pipeline]\nreply_timeout_ms = 0\n",
        "[pipeline]\nmanifest_max_retries = 50\n",
        "[application]\nlog_level = \"verbose\"\n",
        "[logging]\nlocal_rotation = \"weekly\"\n",
    ] {
        let file = write_config(contents);
        assert!(load_config(file.path()).is_err(), "accepted: {contents}");
    }
}

#[test]
fn test_missing_file() {
    let err = load_config("/nonexistent/pdr.toml").unwrap_err();
    assert!(err.to_string().contains("not found"));
}
