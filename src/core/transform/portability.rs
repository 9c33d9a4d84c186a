//! Localisation of source records
//!
//! Records arrive scoped to the sending system: they point at that system's
//! patient, encounters and practitioners. Before a record can be stored for
//! the target patient, its patient references are rewritten and links to
//! context that does not exist here are removed.

use crate::domain::ids::{PatientId, TargetRef};
use crate::domain::record::ClinicalRecord;
use serde_json::{json, Value};

/// Field carrying the patient for types that must always have one
fn patient_field(resource_type: &str) -> Option<&'static str> {
    match resource_type {
        "Observation" | "Procedure" | "Condition" | "MedicationStatement" => Some("subject"),
        "AllergyIntolerance" | "Immunization" => Some("patient"),
        _ => None,
    }
}

/// Links that are always dropped for a type
fn non_portable_fields(resource_type: &str) -> &'static [&'static str] {
    match resource_type {
        "Observation" => &["encounter"],
        "Procedure" | "Immunization" => &["encounter", "performer"],
        "Condition" => &["asserter"],
        _ => &[],
    }
}

const ENCOUNTER_LINKS: [&str; 2] = ["encounter", "context"];
const PATIENT_LINKS: [&str; 2] = ["subject", "patient"];

/// Scope `record` to `patient`
///
/// - `subject`/`patient` references that point at a patient are rewritten to
///   the target, and are added where the type requires one
/// - per-type non-portable links are removed
/// - encounter links are removed from every type
/// - any other reference to a patient that is not the target is removed
///
/// Patient records are left alone; they are correlated to the target as a
/// whole.
pub fn localise(record: &mut ClinicalRecord, patient: &PatientId) {
    if record.is_patient() {
        return;
    }

    let target = json!({"reference": patient.reference()});
    let resource_type = record.resource_type().to_string();

    for field in PATIENT_LINKS {
        let rewrite = record
            .get(field)
            .is_some_and(|value| !points_elsewhere(value));
        if rewrite {
            record.set(field, target.clone());
        }
    }
    if let Some(field) = patient_field(&resource_type) {
        record.set(field, target.clone());
    }

    for field in non_portable_fields(&resource_type) {
        record.remove(field);
    }
    for field in ENCOUNTER_LINKS {
        if record.get(field).is_some_and(is_encounter_reference) {
            record.remove(field);
        }
    }

    let keep = patient.reference();
    for (name, value) in record.fields_mut().iter_mut() {
        if PATIENT_LINKS.contains(&name.as_str()) || name == "contained" {
            continue;
        }
        strip_foreign_patients(value, &keep);
    }
    record.fields_mut().retain(|name, value| {
        PATIENT_LINKS.contains(&name.as_str())
            || name == "contained"
            || !(is_foreign_patient(value, &keep) || is_emptied(value))
    });
}

fn reference_of(value: &Value) -> Option<&str> {
    value.get("reference").and_then(Value::as_str)
}

/// True when a subject/patient link names a non-Patient resource (a Group, say)
fn points_elsewhere(value: &Value) -> bool {
    reference_of(value)
        .and_then(TargetRef::parse)
        .is_some_and(|target| target.resource_type() != "Patient")
}

fn is_encounter_reference(value: &Value) -> bool {
    match reference_of(value).and_then(TargetRef::parse) {
        Some(target) => target.resource_type() == "Encounter",
        // urn:uuid links into the source bundle
        None => reference_of(value).is_some(),
    }
}

fn is_foreign_patient(value: &Value, keep: &str) -> bool {
    reference_of(value)
        .and_then(TargetRef::parse)
        .is_some_and(|target| {
            target.resource_type() == "Patient" && target.reference().as_deref() != Some(keep)
        })
}

/// Containers emptied by stripping are dropped too; FHIR forbids empty arrays
fn strip_foreign_patients(value: &mut Value, keep: &str) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !is_foreign_patient(v, keep));
            for v in map.values_mut() {
                strip_foreign_patients(v, keep);
            }
            map.retain(|_, v| !is_emptied(v));
        }
        Value::Array(items) => {
            items.retain(|v| !is_foreign_patient(v, keep));
            for v in items.iter_mut() {
                strip_foreign_patients(v, keep);
            }
            items.retain(|v| !is_emptied(v));
        }
        _ => {}
    }
}

fn is_emptied(value: &Value) -> bool {
    match value {
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(value: Value) -> ClinicalRecord {
        ClinicalRecord::from_value(value).unwrap()
    }

    fn patient() -> PatientId {
        PatientId::new("target").unwrap()
    }

    #[test]
    fn test_observation_rewritten_and_encounter_dropped() {
        let mut obs = record(json!({
            "resourceType": "Observation",
            "subject": {"reference": "urn:uuid:source-patient"},
            "encounter": {"reference": "Encounter/e1"},
            "status": "final"
        }));
        localise(&mut obs, &patient());

        assert_eq!(obs.get("subject"), Some(&json!({"reference": "Patient/target"})));
        assert!(obs.get("encounter").is_none());
        assert_eq!(obs.get("status"), Some(&json!("final")));
    }

    #[test]
    fn test_missing_subject_is_added() {
        let mut condition = record(json!({"resourceType": "Condition", "asserter": {"reference": "Practitioner/1"}}));
        localise(&mut condition, &patient());
        assert_eq!(condition.get("subject"), Some(&json!({"reference": "Patient/target"})));
        assert!(condition.get("asserter").is_none());
    }

    #[test]
    fn test_procedure_and_immunization_lose_performer() {
        let mut procedure = record(json!({
            "resourceType": "Procedure",
            "subject": {"reference": "Patient/src"},
            "performer": [{"actor": {"reference": "Practitioner/1"}}]
        }));
        localise(&mut procedure, &patient());
        assert!(procedure.get("performer").is_none());

        let mut immunization = record(json!({
            "resourceType": "Immunization",
            "patient": {"reference": "Patient/src"},
            "performer": [{"actor": {"reference": "Practitioner/1"}}],
            "encounter": {"reference": "Encounter/2"}
        }));
        localise(&mut immunization, &patient());
        assert_eq!(immunization.get("patient"), Some(&json!({"reference": "Patient/target"})));
        assert!(immunization.get("performer").is_none());
        assert!(immunization.get("encounter").is_none());
    }

    #[test]
    fn test_allergy_only_rewrites_patient() {
        let mut allergy = record(json!({
            "resourceType": "AllergyIntolerance",
            "patient": {"reference": "Patient/src"},
            "recorder": {"reference": "Practitioner/1"}
        }));
        localise(&mut allergy, &patient());
        assert_eq!(allergy.get("patient"), Some(&json!({"reference": "Patient/target"})));
        assert!(allergy.get("recorder").is_some());
    }

    #[test]
    fn test_other_types_lose_encounter_context() {
        let mut report = record(json!({
            "resourceType": "DiagnosticReport",
            "subject": {"reference": "Patient/src"},
            "encounter": {"reference": "Encounter/1"},
            "performer": [{"reference": "Organization/1"}]
        }));
        localise(&mut report, &patient());
        assert!(report.get("encounter").is_none());
        assert!(report.get("performer").is_some());
        assert_eq!(report.get("subject"), Some(&json!({"reference": "Patient/target"})));
    }

    #[test]
    fn test_group_subject_kept() {
        let mut report = record(json!({
            "resourceType": "DiagnosticReport",
            "subject": {"reference": "Group/g1"}
        }));
        localise(&mut report, &patient());
        assert_eq!(report.get("subject"), Some(&json!({"reference": "Group/g1"})));
    }

    #[test]
    fn test_foreign_patient_references_removed() {
        let mut obs = record(json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/src"},
            "focus": [{"reference": "Patient/other"}, {"reference": "Device/d1"}],
            "performer": [{"reference": "Patient/other"}]
        }));
        localise(&mut obs, &patient());
        assert_eq!(obs.get("focus"), Some(&json!([{"reference": "Device/d1"}])));
        assert!(obs.get("performer").is_none());
    }

    #[test]
    fn test_emptied_backbone_elements_removed() {
        let mut obs = record(json!({
            "resourceType": "Observation",
            "subject": {"reference": "Patient/src"},
            "note": [{"authorReference": {"reference": "Patient/other"}}],
            "component": [{"code": {"text": "x"}}]
        }));
        localise(&mut obs, &patient());
        assert!(obs.get("note").is_none());
        assert_eq!(obs.get("component"), Some(&json!([{"code": {"text": "x"}}])));
        assert_eq!(obs.get("subject"), Some(&json!({"reference": "Patient/target"})));
    }

    #[test]
    fn test_patient_records_untouched() {
        let original = json!({"resourceType": "Patient", "id": "p", "link": [{"other": {"reference": "Patient/x"}}]});
        let mut p = record(original.clone());
        localise(&mut p, &patient());
        assert_eq!(p.to_value(), original);
    }
}
