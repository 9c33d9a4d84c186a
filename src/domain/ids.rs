//! Domain identifier types with validation
//!
//! Newtype wrappers for the identities a submission moves around: the target
//! patient, the source-side [`Locator`] used as the correlation key, and the
//! store-side [`TargetRef`] a record resolves to.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Path segment separating a resource reference from its version
const HISTORY_SEGMENT: &str = "/_history/";

/// Patient identifier newtype wrapper
///
/// Holds the logical id only (`123`, not `Patient/123`).
///
/// # Examples
///
/// ```
/// use pdr_ingest::domain::ids::PatientId;
///
/// let patient = PatientId::from_reference("https://fhir.example.org/fhir/Patient/42").unwrap();
/// assert_eq!(patient.as_str(), "42");
/// assert_eq!(patient.reference(), "Patient/42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatientId(String);

impl PatientId {
    /// Creates a new PatientId from a bare logical id
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Patient ID cannot be empty".to_string());
        }
        if id.contains('/') {
            return Err(format!("Patient ID must not contain '/': {id}"));
        }
        Ok(Self(id))
    }

    /// Parses a relative or absolute `Patient/<id>` reference
    ///
    /// A trailing `/_history/<v>` suffix is ignored.
    pub fn from_reference(reference: &str) -> Result<Self, String> {
        let target = TargetRef::parse(reference)
            .ok_or_else(|| format!("Not a resource reference: {reference}"))?;
        if target.resource_type() != "Patient" {
            return Err(format!("Not a Patient reference: {reference}"));
        }
        match target.id() {
            Some(id) => Self::new(id),
            None => Err(format!("Patient reference has no id: {reference}")),
        }
    }

    /// Returns the patient ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Relative reference, `Patient/<id>`
    pub fn reference(&self) -> String {
        format!("Patient/{}", self.0)
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for PatientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PatientId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('/') {
            Self::from_reference(s)
        } else {
            Self::new(s)
        }
    }
}

impl AsRef<str> for PatientId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Stable source-system identity for a record
///
/// Format: `{source_endpoint}/{type}/{id}[/_history/{version}]`, or the
/// entry's declared `fullUrl` when the record carries no id.
///
/// # Examples
///
/// ```
/// use pdr_ingest::domain::ids::Locator;
///
/// let locator = Locator::from_parts("urn:apple:health-kit", "Observation", "a1", Some("3"));
/// assert_eq!(locator.as_str(), "urn:apple:health-kit/Observation/a1/_history/3");
/// assert_eq!(locator.unversioned().as_str(), "urn:apple:health-kit/Observation/a1");
/// assert_eq!(locator.version(), Some("3"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator(String);

impl Locator {
    /// Creates a Locator from an already-formatted string
    pub fn new(locator: impl Into<String>) -> Result<Self, String> {
        let locator = locator.into();
        if locator.trim().is_empty() {
            return Err("Locator cannot be empty".to_string());
        }
        Ok(Self(locator))
    }

    /// Builds a Locator from the source endpoint and the record's own identity
    pub fn from_parts(endpoint: &str, resource_type: &str, id: &str, version: Option<&str>) -> Self {
        let base = format!("{}/{}/{}", endpoint.trim_end_matches('/'), resource_type, id);
        match version {
            Some(v) if !v.is_empty() => Self(format!("{base}{HISTORY_SEGMENT}{v}")),
            _ => Self(base),
        }
    }

    /// Returns the locator as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The correlation key: this locator without its version suffix
    pub fn unversioned(&self) -> Locator {
        match self.0.find(HISTORY_SEGMENT) {
            Some(pos) => Self(self.0[..pos].to_string()),
            None => self.clone(),
        }
    }

    /// The declared source version, if any
    pub fn version(&self) -> Option<&str> {
        self.0
            .find(HISTORY_SEGMENT)
            .map(|pos| &self.0[pos + HISTORY_SEGMENT.len()..])
            .filter(|v| !v.is_empty())
    }

    /// Consumes self and returns the inner String
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Locator {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Store-side identity a record resolves to
///
/// Renders as `Type/id` or `Type/id/_history/v`. A target without an id is
/// legal: it describes a record whose identity the store has yet to assign.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetRef {
    resource_type: String,
    id: Option<String>,
    version: Option<String>,
}

impl TargetRef {
    /// Creates a target with a type and optional id
    pub fn new(resource_type: impl Into<String>, id: Option<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.filter(|id| !id.is_empty()),
            version: None,
        }
    }

    /// Sets the version
    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version.filter(|v| !v.is_empty());
        self
    }

    /// Parses `Type/id[/_history/v]`, relative or absolute
    ///
    /// Returns `None` for `urn:` identifiers, contained references (`#x`)
    /// and strings without a `Type/id` pair.
    pub fn parse(reference: &str) -> Option<Self> {
        if reference.starts_with("urn:") || reference.starts_with('#') {
            return None;
        }

        let (path, version) = match reference.find(HISTORY_SEGMENT) {
            Some(pos) => (
                &reference[..pos],
                Some(reference[pos + HISTORY_SEGMENT.len()..].to_string()),
            ),
            None => (reference, None),
        };

        let mut segments = path.trim_end_matches('/').rsplit('/');
        let id = segments.next()?;
        let resource_type = segments.next()?;
        if id.is_empty() || !is_resource_type(resource_type) {
            return None;
        }

        Some(Self::new(resource_type, Some(id.to_string())).with_version(version))
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// `Type/id` without the version, when the id is known
    pub fn reference(&self) -> Option<String> {
        self.id
            .as_ref()
            .map(|id| format!("{}/{}", self.resource_type, id))
    }

    /// `Type/id/_history/v` when both are known, else the plain reference
    pub fn versioned_reference(&self) -> Option<String> {
        let base = self.reference()?;
        Some(match &self.version {
            Some(v) => format!("{base}{HISTORY_SEGMENT}{v}"),
            None => base,
        })
    }

    /// Whether the id is a generated UUID rather than a store-assigned id
    pub fn has_generated_id(&self) -> bool {
        self.id
            .as_deref()
            .map(|id| uuid::Uuid::parse_str(id).is_ok())
            .unwrap_or(false)
    }

    /// Transport identity used as the transaction entry's `fullUrl`
    ///
    /// Empty when there is no id, `urn:uuid:<id>` for generated ids,
    /// `Type/id` otherwise.
    pub fn transport_full_url(&self) -> String {
        match &self.id {
            None => String::new(),
            Some(id) if self.has_generated_id() => format!("urn:uuid:{id}"),
            Some(id) => format!("{}/{}", self.resource_type, id),
        }
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.versioned_reference() {
            Some(reference) => write!(f, "{reference}"),
            None => write!(f, "{}/<unassigned>", self.resource_type),
        }
    }
}

/// FHIR resource type names are capitalised alphanumerics
fn is_resource_type(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patient_id_valid() {
        let id = PatientId::new("123").unwrap();
        assert_eq!(id.as_str(), "123");
        assert_eq!(id.reference(), "Patient/123");
        assert_eq!(id.to_string(), "123");
    }

    #[test]
    fn test_patient_id_empty() {
        assert!(PatientId::new("").is_err());
        assert!(PatientId::new("   ").is_err());
        assert!(PatientId::new("Patient/1").is_err());
    }

    #[test]
    fn test_patient_id_from_reference() {
        assert_eq!(PatientId::from_reference("Patient/7").unwrap().as_str(), "7");
        assert_eq!(
            PatientId::from_reference("http://h/fhir/Patient/7/_history/2")
                .unwrap()
                .as_str(),
            "7"
        );
        assert!(PatientId::from_reference("Observation/7").is_err());
        assert!(PatientId::from_reference("urn:uuid:abc").is_err());
        assert_eq!(PatientId::from_str("Patient/9").unwrap().as_str(), "9");
    }

    #[test]
    fn test_locator_without_version() {
        let locator = Locator::from_parts("http://src/fhir/", "Observation", "o1", None);
        assert_eq!(locator.as_str(), "http://src/fhir/Observation/o1");
        assert_eq!(locator.version(), None);
        assert_eq!(locator.unversioned(), locator);
    }

    #[test]
    fn test_locator_versions_share_key() {
        let v1 = Locator::from_parts("urn:src", "Condition", "c", Some("1"));
        let v2 = Locator::from_parts("urn:src", "Condition", "c", Some("2"));
        assert_ne!(v1, v2);
        assert_eq!(v1.unversioned(), v2.unversioned());
    }

    #[test]
    fn test_locator_empty() {
        assert!(Locator::new("").is_err());
        assert!(Locator::new("urn:uuid:1").is_ok());
    }

    #[test]
    fn test_target_ref_parse() {
        let target = TargetRef::parse("Observation/12/_history/3").unwrap();
        assert_eq!(target.resource_type(), "Observation");
        assert_eq!(target.id(), Some("12"));
        assert_eq!(target.version(), Some("3"));
        assert_eq!(target.reference().unwrap(), "Observation/12");
        assert_eq!(target.to_string(), "Observation/12/_history/3");

        let absolute = TargetRef::parse("https://fhir.example.org/r4/Condition/abc").unwrap();
        assert_eq!(absolute.reference().unwrap(), "Condition/abc");

        assert!(TargetRef::parse("urn:uuid:4f0c1a8e-7a8b-4c4b-9d43-0d5f0b6f7f11").is_none());
        assert!(TargetRef::parse("#src").is_none());
        assert!(TargetRef::parse("nothing").is_none());
        assert!(TargetRef::parse("lower/case").is_none());
    }

    #[test]
    fn test_transport_full_url() {
        let none = TargetRef::new("Observation", None);
        assert_eq!(none.transport_full_url(), "");

        let generated = TargetRef::new(
            "Observation",
            Some("4f0c1a8e-7a8b-4c4b-9d43-0d5f0b6f7f11".to_string()),
        );
        assert!(generated.has_generated_id());
        assert_eq!(
            generated.transport_full_url(),
            "urn:uuid:4f0c1a8e-7a8b-4c4b-9d43-0d5f0b6f7f11"
        );

        let assigned = TargetRef::new("Observation", Some("15".to_string()));
        assert!(!assigned.has_generated_id());
        assert_eq!(assigned.transport_full_url(), "Observation/15");
    }

    #[test]
    fn test_target_ref_empty_id_is_none() {
        let target = TargetRef::new("Patient", Some(String::new()));
        assert_eq!(target.id(), None);
        assert_eq!(target.reference(), None);
    }
}
