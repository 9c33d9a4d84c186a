//! Source-specific record transformation
//!
//! Each entry of a submission is handed to the [`Transformer`] registered for
//! the submission's source endpoint, or to the default transformer when the
//! source has none. A transformer turns one entry into zero or more clinical
//! records scoped to the target patient.
//!
//! - [`DefaultTransformer`]: identity plus [`localise`]
//! - [`HealthKitTransformer`]: Apple HealthKit exports, including base64
//!   `Binary` samples

pub mod default;
pub mod healthkit;
pub mod portability;

pub use default::DefaultTransformer;
pub use healthkit::HealthKitTransformer;
pub use portability::localise;

use crate::config::TransformersConfig;
use crate::domain::ids::PatientId;
use crate::domain::record::{ClinicalRecord, Entry};
use crate::domain::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Normalises one submission entry into records for the target patient
pub trait Transformer: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Transform one entry
    ///
    /// # Errors
    ///
    /// Returns `TransformFailure` when the payload cannot be decoded.
    fn transform(&self, entry: &Entry, patient: &PatientId) -> Result<Vec<ClinicalRecord>>;
}

/// Source endpoint to transformer lookup
pub struct TransformerRegistry {
    by_source: HashMap<String, Arc<dyn Transformer>>,
    default: Arc<dyn Transformer>,
}

impl TransformerRegistry {
    /// A registry with only the default transformer
    pub fn new() -> Self {
        Self {
            by_source: HashMap::new(),
            default: Arc::new(DefaultTransformer),
        }
    }

    /// Registry with the transformers enabled in configuration
    pub fn from_config(config: &TransformersConfig) -> Self {
        let mut registry = Self::new();
        if config.enable_healthkit {
            registry.register(config.healthkit_endpoint.clone(), Arc::new(HealthKitTransformer));
        }
        registry
    }

    /// Route `source_endpoint` to `transformer`, replacing any earlier entry
    pub fn register(&mut self, source_endpoint: impl Into<String>, transformer: Arc<dyn Transformer>) {
        let source_endpoint = source_endpoint.into();
        tracing::debug!(
            source = %source_endpoint,
            transformer = transformer.name(),
            "Registered transformer"
        );
        self.by_source.insert(source_endpoint, transformer);
    }

    /// Transformer for a source endpoint
    pub fn resolve(&self, source_endpoint: &str) -> Arc<dyn Transformer> {
        self.by_source
            .get(source_endpoint)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }

    /// Number of source-specific registrations
    pub fn len(&self) -> usize {
        self.by_source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_source.is_empty()
    }
}

impl Default for TransformerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_HEALTHKIT_ENDPOINT;

    #[test]
    fn test_unregistered_source_uses_default() {
        let registry = TransformerRegistry::new();
        assert_eq!(registry.resolve("urn:unknown").name(), "default");
        assert!(registry.is_empty());
    }

    #[test]
    fn test_from_config_registers_healthkit() {
        let registry = TransformerRegistry::from_config(&TransformersConfig::default());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve(DEFAULT_HEALTHKIT_ENDPOINT).name(), "healthkit");
    }

    #[test]
    fn test_healthkit_can_be_disabled() {
        let config = TransformersConfig {
            enable_healthkit: false,
            ..TransformersConfig::default()
        };
        let registry = TransformerRegistry::from_config(&config);
        assert_eq!(registry.resolve(DEFAULT_HEALTHKIT_ENDPOINT).name(), "default");
    }
}
