//! Submission envelope types
//!
//! A [`Submission`] is the validated form of an inbound message Bundle. It is
//! transient: built per invocation by the envelope validator and consumed by
//! the pipeline.

use crate::domain::ids::PatientId;
use crate::domain::record::Entry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Header fields read from the `MessageHeader` resource
///
/// Every field is optional here; the validator decides which ones are required.
/// The error boundary also uses this type to echo what it could parse from a
/// rejected envelope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// `MessageHeader.id`
    pub id: Option<String>,
    /// `MessageHeader.eventUri`
    pub event: Option<String>,
    /// `MessageHeader.source.endpoint`
    pub source_endpoint: Option<String>,
    /// `MessageHeader.focus[].reference`, in declaration order
    pub focus: Vec<String>,
}

impl MessageHeader {
    /// Reads header fields from a `MessageHeader` resource
    pub fn from_resource(resource: &Value) -> Self {
        let text = |value: Option<&Value>| {
            value
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let focus = resource
            .get("focus")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| text(item.get("reference")))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            id: text(resource.get("id")),
            event: text(resource.get("eventUri")),
            source_endpoint: text(resource.get("source").and_then(|s| s.get("endpoint"))),
            focus,
        }
    }

    /// Best-effort header extraction from a raw Bundle
    ///
    /// Returns the default (empty) header when the first entry is not a
    /// `MessageHeader`.
    pub fn peek(bundle: &Value) -> Self {
        bundle
            .get("entry")
            .and_then(Value::as_array)
            .and_then(|entries| entries.first())
            .and_then(|entry| entry.get("resource"))
            .filter(|resource| {
                resource.get("resourceType").and_then(Value::as_str) == Some("MessageHeader")
            })
            .map(Self::from_resource)
            .unwrap_or_default()
    }

    /// The first focus that is a `Patient` reference
    pub fn target_patient(&self) -> Option<PatientId> {
        self.focus
            .iter()
            .find_map(|reference| PatientId::from_reference(reference).ok())
    }
}

/// Submission identifier stored on the manifest: `(sourceEndpoint, sourceMessageId)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubmissionIdentifier {
    pub system: String,
    pub value: String,
}

impl SubmissionIdentifier {
    /// `system|value` token used in identifier searches
    pub fn token(&self) -> String {
        format!("{}|{}", self.system, self.value)
    }
}

/// A validated PDR submission
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub event: String,
    pub source_endpoint: String,
    pub source_message_id: Option<String>,
    pub patient: PatientId,
    pub entries: Vec<Entry>,
}

impl Submission {
    /// Manifest identifier, when both halves are present
    pub fn identifier(&self) -> Option<SubmissionIdentifier> {
        self.source_message_id
            .as_ref()
            .map(|message_id| SubmissionIdentifier {
                system: self.source_endpoint.clone(),
                value: message_id.clone(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bundle() -> Value {
        json!({
            "resourceType": "Bundle",
            "type": "message",
            "entry": [{
                "resource": {
                    "resourceType": "MessageHeader",
                    "id": "msg-1",
                    "eventUri": "urn:mitre:healthmanager:pdr",
                    "source": {"endpoint": "urn:apple:health-kit"},
                    "focus": [
                        {"reference": "Organization/o"},
                        {"reference": "Patient/p1"}
                    ]
                }
            }]
        })
    }

    #[test]
    fn test_peek_header() {
        let header = MessageHeader::peek(&bundle());
        assert_eq!(header.id.as_deref(), Some("msg-1"));
        assert_eq!(header.event.as_deref(), Some("urn:mitre:healthmanager:pdr"));
        assert_eq!(header.source_endpoint.as_deref(), Some("urn:apple:health-kit"));
        assert_eq!(header.target_patient().unwrap().as_str(), "p1");
    }

    #[test]
    fn test_peek_without_header() {
        let header = MessageHeader::peek(&json!({"resourceType": "Bundle", "entry": []}));
        assert_eq!(header, MessageHeader::default());
        assert!(header.target_patient().is_none());
    }

    #[test]
    fn test_blank_fields_are_absent() {
        let header = MessageHeader::from_resource(&json!({
            "resourceType": "MessageHeader",
            "id": "  ",
            "source": {"endpoint": ""}
        }));
        assert!(header.id.is_none());
        assert!(header.source_endpoint.is_none());
    }

    #[test]
    fn test_identifier_requires_message_id() {
        let mut submission = Submission {
            event: "urn:mitre:healthmanager:pdr".into(),
            source_endpoint: "urn:src".into(),
            source_message_id: None,
            patient: PatientId::new("p").unwrap(),
            entries: vec![],
        };
        assert!(submission.identifier().is_none());

        submission.source_message_id = Some("m".into());
        assert_eq!(submission.identifier().unwrap().token(), "urn:src|m");
    }
}
