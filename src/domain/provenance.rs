//! Correlation records
//!
//! A [`CorrelationRecord`] links a source [`Locator`] to the store target a
//! record was written to. It is persisted as a FHIR `Provenance`:
//!
//! - `target[0]`: the patient
//! - `target[1]`: the resolved record target (versioned)
//! - `entity[0].what.reference`: the unversioned Locator (the search key)
//! - `meta.source`: the full Locator, version included
//!
//! Records without a Locator embed the original payload as a contained
//! resource referenced as `#src`.

use crate::domain::ids::{Locator, PatientId, TargetRef};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Contained-resource id used for embedded payloads
pub const EMBEDDED_SOURCE_ID: &str = "src";

/// Where a correlated record came from
#[derive(Debug, Clone, PartialEq)]
pub enum CorrelationSource {
    /// Stable source identity
    Locator(Locator),
    /// The original payload, when no stable identity could be derived
    Embedded(Value),
}

/// Durable link from a source record to its store target
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationRecord {
    /// Store id, once persisted
    pub id: Option<String>,
    pub recorded: DateTime<Utc>,
    pub patient: PatientId,
    pub target: TargetRef,
    pub source: CorrelationSource,
}

impl CorrelationRecord {
    pub fn new(patient: PatientId, target: TargetRef, source: CorrelationSource) -> Self {
        Self {
            id: None,
            recorded: Utc::now(),
            patient,
            target,
            source,
        }
    }

    /// Serialises to a `Provenance` resource
    pub fn to_resource(&self) -> Value {
        let mut targets = vec![json!({"reference": self.patient.reference()})];
        if let Some(reference) = self.target.versioned_reference() {
            targets.push(json!({"reference": reference}));
        }

        let mut resource = json!({
            "resourceType": "Provenance",
            "target": targets,
            "recorded": format_instant(&self.recorded),
        });

        match &self.source {
            CorrelationSource::Locator(locator) => {
                resource["meta"] = json!({"source": locator.as_str()});
                resource["entity"] = json!([{
                    "role": "source",
                    "what": {"reference": locator.unversioned().as_str()}
                }]);
            }
            CorrelationSource::Embedded(payload) => {
                let mut contained = payload.clone();
                if let Value::Object(map) = &mut contained {
                    map.insert("id".to_string(), Value::String(EMBEDDED_SOURCE_ID.into()));
                }
                resource["contained"] = json!([contained]);
                resource["entity"] = json!([{
                    "role": "source",
                    "what": {"reference": format!("#{EMBEDDED_SOURCE_ID}")}
                }]);
            }
        }

        if let Some(id) = &self.id {
            resource["id"] = Value::String(id.clone());
        }
        resource
    }

    /// Reads a `Provenance` resource written by [`to_resource`](Self::to_resource)
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or malformed field.
    pub fn from_resource(resource: &Value) -> Result<Self, String> {
        if resource.get("resourceType").and_then(Value::as_str) != Some("Provenance") {
            return Err("not a Provenance resource".to_string());
        }

        let targets = resource
            .get("target")
            .and_then(Value::as_array)
            .ok_or("Provenance has no target")?;
        let reference_at = |index: usize| {
            targets
                .get(index)
                .and_then(|t| t.get("reference"))
                .and_then(Value::as_str)
        };

        let patient = PatientId::from_reference(reference_at(0).ok_or("Provenance has no patient target")?)?;
        let target = reference_at(1)
            .and_then(TargetRef::parse)
            .ok_or("Provenance has no resolvable record target")?;

        let recorded = resource
            .get("recorded")
            .and_then(Value::as_str)
            .ok_or("Provenance has no recorded timestamp")
            .and_then(|s| parse_instant(s).ok_or("Provenance recorded is not an instant"))?;

        let what = resource
            .get("entity")
            .and_then(Value::as_array)
            .and_then(|entities| entities.first())
            .and_then(|entity| entity.get("what"))
            .and_then(|what| what.get("reference"))
            .and_then(Value::as_str)
            .ok_or("Provenance has no source entity")?;

        let source = if what == format!("#{EMBEDDED_SOURCE_ID}") {
            let payload = resource
                .get("contained")
                .and_then(Value::as_array)
                .and_then(|contained| {
                    contained.iter().find(|c| {
                        c.get("id").and_then(Value::as_str) == Some(EMBEDDED_SOURCE_ID)
                    })
                })
                .cloned()
                .ok_or("Provenance embedded source is missing")?;
            CorrelationSource::Embedded(payload)
        } else {
            let full = resource
                .get("meta")
                .and_then(|meta| meta.get("source"))
                .and_then(Value::as_str)
                .unwrap_or(what);
            CorrelationSource::Locator(Locator::new(full)?)
        };

        Ok(Self {
            id: resource.get("id").and_then(Value::as_str).map(str::to_string),
            recorded,
            patient,
            target,
            source,
        })
    }
}

/// Millisecond RFC 3339 in UTC, so recency sorts lexically as well
pub fn format_instant(instant: &DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_instant(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
