//! Per-patient submission manifest
//!
//! The manifest is an append-only log, persisted as a FHIR `List`, of the
//! records and correlation records a submission produced. Entries are never
//! mutated or removed; the document itself is only ever extended.

use crate::domain::envelope::SubmissionIdentifier;
use crate::domain::ids::PatientId;
use crate::domain::provenance::{format_instant, parse_instant};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

/// Coding system of the manifest `List.code`
pub const PDR_CODE_SYSTEM: &str = "urn:mitre:healthmanager";

/// Code of the manifest `List.code`
pub const PDR_CODE: &str = "pdr";

/// One manifest line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub date: DateTime<Utc>,
    pub item: String,
    pub deleted: bool,
}

impl ManifestEntry {
    pub fn new(item: impl Into<String>) -> Self {
        Self {
            date: Utc::now(),
            item: item.into(),
            deleted: false,
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "date": format_instant(&self.date),
            "item": {"reference": self.item},
            "deleted": self.deleted,
        })
    }

    fn from_value(value: &Value) -> Result<Self, String> {
        let item = value
            .get("item")
            .and_then(|item| item.get("reference"))
            .and_then(Value::as_str)
            .ok_or("manifest entry has no item reference")?;
        let date = value
            .get("date")
            .and_then(Value::as_str)
            .and_then(parse_instant)
            .unwrap_or_else(Utc::now);

        Ok(Self {
            date,
            item: item.to_string(),
            deleted: value.get("deleted").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// The manifest document
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    /// Store id, once persisted
    pub id: Option<String>,
    /// Store version the document was read at
    pub version: Option<String>,
    pub subject: PatientId,
    pub identifier: Option<SubmissionIdentifier>,
    pub date: DateTime<Utc>,
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// A fresh, unsaved manifest
    pub fn new(subject: PatientId, identifier: Option<SubmissionIdentifier>) -> Self {
        Self {
            id: None,
            version: None,
            subject,
            identifier,
            date: Utc::now(),
            entries: Vec::new(),
        }
    }

    pub fn is_new(&self) -> bool {
        self.id.is_none()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends a line referencing `item`
    pub fn append(&mut self, item: impl Into<String>) {
        self.entries.push(ManifestEntry::new(item));
    }

    /// Serialises to a `List` resource
    pub fn to_resource(&self) -> Value {
        let mut resource = json!({
            "resourceType": "List",
            "status": "current",
            "mode": "snapshot",
            "code": {
                "coding": [{"system": PDR_CODE_SYSTEM, "code": PDR_CODE}]
            },
            "subject": {"reference": self.subject.reference()},
            "date": format_instant(&self.date),
            "entry": self.entries.iter().map(ManifestEntry::to_value).collect::<Vec<_>>(),
        });

        if let Some(identifier) = &self.identifier {
            resource["identifier"] = json!([{
                "system": identifier.system,
                "value": identifier.value,
            }]);
        }
        if let Some(id) = &self.id {
            resource["id"] = Value::String(id.clone());
        }
        if let Some(version) = &self.version {
            resource["meta"] = json!({"versionId": version});
        }
        resource
    }

    /// Reads a `List` resource
    ///
    /// # Errors
    ///
    /// Returns a description of the first missing or malformed field.
    pub fn from_resource(resource: &Value) -> Result<Self, String> {
        if resource.get("resourceType").and_then(Value::as_str) != Some("List") {
            return Err("not a List resource".to_string());
        }

        let subject = resource
            .get("subject")
            .and_then(|s| s.get("reference"))
            .and_then(Value::as_str)
            .ok_or("manifest has no subject")?;

        let identifier = resource
            .get("identifier")
            .and_then(Value::as_array)
            .and_then(|ids| ids.first())
            .and_then(|id| {
                Some(SubmissionIdentifier {
                    system: id.get("system")?.as_str()?.to_string(),
                    value: id.get("value")?.as_str()?.to_string(),
                })
            });

        let entries = resource
            .get("entry")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .map(ManifestEntry::from_value)
                    .collect::<Result<Vec<_>, _>>()
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            id: resource.get("id").and_then(Value::as_str).map(str::to_string),
            version: resource
                .get("meta")
                .and_then(|m| m.get("versionId"))
                .and_then(Value::as_str)
                .map(str::to_string),
            subject: PatientId::from_reference(subject)?,
            identifier,
            date: resource
                .get("date")
                .and_then(Value::as_str)
                .and_then(parse_instant)
                .unwrap_or_else(Utc::now),
            entries,
        })
    }
}
