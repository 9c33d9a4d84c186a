//! Clinical record and entry types
//!
//! A [`ClinicalRecord`] wraps one FHIR resource as an ordered JSON object. The
//! pipeline only reads a handful of well-known fields (`resourceType`, `id`,
//! `meta.versionId`); everything else travels through untouched.

use crate::domain::ids::{Locator, PatientId, TargetRef};
use crate::domain::{PdrError, Result};
use serde_json::{Map, Value};

/// Requested write operation for an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    /// `POST`
    Create,
    /// `PUT`
    Update,
}

impl Verb {
    /// HTTP method used in a transaction request
    pub fn method(&self) -> &'static str {
        match self {
            Verb::Create => "POST",
            Verb::Update => "PUT",
        }
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verb::Create => write!(f, "CREATE"),
            Verb::Update => write!(f, "UPDATE"),
        }
    }
}

/// A typed clinical record
#[derive(Debug, Clone, PartialEq)]
pub struct ClinicalRecord {
    resource_type: String,
    body: Map<String, Value>,
}

impl ClinicalRecord {
    /// Wraps a resource JSON object
    ///
    /// # Errors
    ///
    /// Returns `UnprocessableSubmission` if the value is not an object with a
    /// string `resourceType`.
    pub fn from_value(value: Value) -> Result<Self> {
        let body = match value {
            Value::Object(map) => map,
            other => {
                return Err(PdrError::unprocessable(format!(
                    "resource must be a JSON object, got {}",
                    json_kind(&other)
                )))
            }
        };

        let resource_type = body
            .get("resourceType")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PdrError::unprocessable("resource is missing resourceType"))?
            .to_string();

        Ok(Self {
            resource_type,
            body,
        })
    }

    /// Starts a new record of the given type with no other fields
    pub fn new(resource_type: impl Into<String>) -> Self {
        let resource_type = resource_type.into();
        let mut body = Map::new();
        body.insert(
            "resourceType".to_string(),
            Value::String(resource_type.clone()),
        );
        Self {
            resource_type,
            body,
        }
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Logical id, when present and non-empty
    pub fn id(&self) -> Option<&str> {
        self.body
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.body.insert("id".to_string(), Value::String(id.into()));
    }

    pub fn clear_id(&mut self) {
        self.body.remove("id");
    }

    /// `meta.versionId`, when present
    pub fn version(&self) -> Option<&str> {
        self.body
            .get("meta")
            .and_then(|meta| meta.get("versionId"))
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn is_patient(&self) -> bool {
        self.resource_type == "Patient"
    }

    /// The record's own identity as a store target
    pub fn own_target(&self) -> TargetRef {
        TargetRef::new(self.resource_type.clone(), self.id().map(str::to_string))
            .with_version(self.version().map(str::to_string))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.body.insert(field.into(), value);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.body.remove(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn fields_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.body
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.body.clone())
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.body)
    }
}

/// One data entry of a submission
///
/// `locator` is derived from the record's identity and the submission's source
/// endpoint, falling back to the declared `fullUrl`.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub verb: Verb,
    pub record: ClinicalRecord,
    pub full_url: Option<String>,
    pub locator: Option<Locator>,
}

impl Entry {
    /// Builds an entry, deriving its Locator
    pub fn new(
        verb: Verb,
        record: ClinicalRecord,
        full_url: Option<String>,
        source_endpoint: Option<&str>,
    ) -> Self {
        let full_url = full_url.filter(|url| !url.trim().is_empty());
        let locator = derive_locator(&record, full_url.as_deref(), source_endpoint);
        Self {
            verb,
            record,
            full_url,
            locator,
        }
    }
}

/// Locator derivation: endpoint plus record identity, else the declared fullUrl
pub fn derive_locator(
    record: &ClinicalRecord,
    full_url: Option<&str>,
    source_endpoint: Option<&str>,
) -> Option<Locator> {
    match (source_endpoint.filter(|e| !e.is_empty()), record.id()) {
        (Some(endpoint), Some(id)) => Some(Locator::from_parts(
            endpoint,
            record.resource_type(),
            id,
            record.version(),
        )),
        _ => full_url.and_then(|url| Locator::new(url).ok()),
    }
}

/// Rewrites a `Patient` record's identity onto the target patient
pub fn self_correlate(record: &mut ClinicalRecord, patient: &PatientId) {
    record.set_id(patient.as_str());
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
