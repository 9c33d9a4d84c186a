//! Envelope validation
//!
//! Turns an inbound message Bundle into a [`Submission`], or rejects it with
//! [`PdrError::UnprocessableSubmission`] naming the first check that failed.
//! Checks run in a fixed order:
//!
//! 1. the document is a Bundle of type `message`
//! 2. the first entry is a `MessageHeader`
//! 3. the header event is the PDR event
//! 4. the header focuses on a Patient
//! 5. the header declares a source endpoint
//! 6. at least one data entry follows the header
//! 7. no entry requests DELETE
//!
//! Entry-level parsing (verbs, resources) only happens once all seven pass.

use crate::domain::envelope::{MessageHeader, Submission};
use crate::domain::record::{ClinicalRecord, Entry, Verb};
use crate::domain::{PdrError, Result};
use serde_json::Value;

/// Validates inbound envelopes against one supported event URI
#[derive(Debug, Clone)]
pub struct EnvelopeValidator {
    pdr_event: String,
}

impl EnvelopeValidator {
    pub fn new(pdr_event: impl Into<String>) -> Self {
        Self {
            pdr_event: pdr_event.into(),
        }
    }

    /// Event URI this validator accepts
    pub fn pdr_event(&self) -> &str {
        &self.pdr_event
    }

    /// Validate and parse an envelope
    ///
    /// # Errors
    ///
    /// Returns `UnprocessableSubmission` with a human-readable reason.
    pub fn validate(&self, bundle: &Value) -> Result<Submission> {
        if bundle.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
            return Err(PdrError::unprocessable(
                "bundle not provided to $process-message",
            ));
        }
        if bundle.get("type").and_then(Value::as_str) != Some("message") {
            return Err(PdrError::unprocessable(
                "$process-message bundle must have type 'message'",
            ));
        }

        let entries = bundle
            .get("entry")
            .and_then(Value::as_array)
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| {
                PdrError::unprocessable("message Bundle must have at least a MessageHeader entry")
            })?;

        let header_resource = entries[0]
            .get("resource")
            .filter(|r| r.get("resourceType").and_then(Value::as_str) == Some("MessageHeader"))
            .ok_or_else(|| {
                PdrError::unprocessable(
                    "First entry of the message Bundle must be a MessageHeader instance",
                )
            })?;
        let header = MessageHeader::from_resource(header_resource);

        let event = header
            .event
            .clone()
            .filter(|event| event.eq_ignore_ascii_case(&self.pdr_event))
            .ok_or_else(|| PdrError::unprocessable("message event not supported"))?;

        let patient = header.target_patient().ok_or_else(|| {
            PdrError::unprocessable("PDR message header must reference the target Patient in focus")
        })?;

        let source_endpoint = header.source_endpoint.clone().ok_or_else(|| {
            PdrError::unprocessable("PDR message header must declare a source endpoint")
        })?;

        let data_entries = &entries[1..];
        if data_entries.is_empty() {
            return Err(PdrError::unprocessable(
                "PDR message must contain at least one entry beyond the MessageHeader",
            ));
        }

        if data_entries
            .iter()
            .any(|entry| request_method(entry).is_some_and(|m| m.eq_ignore_ascii_case("DELETE")))
        {
            return Err(PdrError::unprocessable(
                "Cannot process DELETE as a part of a PDR",
            ));
        }

        let parsed = data_entries
            .iter()
            .enumerate()
            .map(|(index, entry)| parse_entry(index + 1, entry, &source_endpoint))
            .collect::<Result<Vec<_>>>()?;

        Ok(Submission {
            event,
            source_endpoint,
            source_message_id: header.id,
            patient,
            entries: parsed,
        })
    }
}

fn request_method(entry: &Value) -> Option<&str> {
    entry
        .get("request")
        .and_then(|request| request.get("method"))
        .and_then(Value::as_str)
}

fn parse_entry(index: usize, entry: &Value, source_endpoint: &str) -> Result<Entry> {
    let verb = match request_method(entry).map(str::to_ascii_uppercase).as_deref() {
        None | Some("POST") => Verb::Create,
        Some("PUT") => Verb::Update,
        Some(other) => {
            return Err(PdrError::unprocessable(format!(
                "entry {index} uses unsupported method {other}"
            )))
        }
    };

    let resource = entry
        .get("resource")
        .cloned()
        .ok_or_else(|| PdrError::unprocessable(format!("entry {index} has no resource")))?;
    let record = ClinicalRecord::from_value(resource)
        .map_err(|e| PdrError::unprocessable(format!("entry {index}: {e}")))?;

    let full_url = entry
        .get("fullUrl")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok(Entry::new(verb, record, full_url, Some(source_endpoint)))
}
