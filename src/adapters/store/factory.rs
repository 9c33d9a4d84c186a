//! Resource store factory
//!
//! Builds the configured [`ResourceStore`] implementation.

use crate::adapters::store::fhir::FhirRestStore;
use crate::adapters::store::memory::InMemoryStore;
use crate::adapters::store::traits::ResourceStore;
use crate::config::schema::{StoreBackend, StoreConfig};
use crate::domain::{PdrError, Result};
use std::sync::Arc;

/// Create a resource store based on the configuration
///
/// # Arguments
///
/// * `config` - The `[store]` configuration section
///
/// # Returns
///
/// Returns an Arc-wrapped trait object that implements ResourceStore
///
/// # Errors
///
/// Returns a configuration error if the FHIR backend is selected without a
/// `[store.fhir]` section, or a store error if its HTTP client cannot be built.
pub fn create_store(config: &StoreConfig) -> Result<Arc<dyn ResourceStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("Creating in-memory resource store");
            Ok(Arc::new(InMemoryStore::new()) as Arc<dyn ResourceStore>)
        }
        StoreBackend::Fhir => {
            let fhir_config = config.fhir.as_ref().ok_or_else(|| {
                PdrError::Configuration(
                    "store.fhir configuration is required when store.backend = 'fhir'".to_string(),
                )
            })?;

            tracing::info!(base_url = %fhir_config.base_url, "Creating FHIR REST resource store");
            let store = FhirRestStore::new(fhir_config.clone())?;

            Ok(Arc::new(store) as Arc<dyn ResourceStore>)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::FhirStoreConfig;

    #[test]
    fn test_memory_backend() {
        let store = create_store(&StoreConfig::default()).unwrap();
        assert_eq!(store.backend_name(), "memory");
    }

    #[test]
    fn test_fhir_backend_requires_section() {
        let config = StoreConfig {
            backend: StoreBackend::Fhir,
            fhir: None,
        };
        assert!(matches!(
            create_store(&config),
            Err(PdrError::Configuration(_))
        ));
    }

    #[test]
    fn test_fhir_backend() {
        let config = StoreConfig {
            backend: StoreBackend::Fhir,
            fhir: Some(FhirStoreConfig {
                base_url: "http://localhost:8080/fhir".to_string(),
                ..FhirStoreConfig::default()
            }),
        };
        let store = create_store(&config).unwrap();
        assert_eq!(store.backend_name(), "fhir");
    }
}
