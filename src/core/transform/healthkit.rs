//! Apple HealthKit transformer
//!
//! HealthKit exports mix ordinary FHIR resources with `Binary` resources whose
//! base64 `data` carries either a HealthKit sample (`application/json`) or an
//! embedded DSTU2-era FHIR resource (`application/fhir+json`). Ordinary
//! resources are localised; binaries are decoded into R4 records first.

use super::{localise, Transformer};
use crate::domain::ids::PatientId;
use crate::domain::record::{ClinicalRecord, Entry};
use crate::domain::{PdrError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};

const PREGNANCY_SAMPLE: &str = "HKCategoryTypeIdentifierPregnancy";
const BLOOD_PRESSURE_SAMPLE: &str = "HKCorrelationTypeIdentifierBloodPressure";

/// HealthKit's end date for samples that have not ended
const OPEN_ENDED_DATE: &str = "4000-12-31";

const SNOMED: &str = "http://snomed.info/sct";
const LOINC: &str = "http://loinc.org";
const UCUM: &str = "http://unitsofmeasure.org";

/// Embedded resource types that can be lifted to R4
const LIFTABLE_TYPES: [&str; 6] = [
    "Observation",
    "Condition",
    "Procedure",
    "AllergyIntolerance",
    "Immunization",
    "MedicationStatement",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct HealthKitTransformer;

impl Transformer for HealthKitTransformer {
    fn name(&self) -> &'static str {
        "healthkit"
    }

    fn transform(&self, entry: &Entry, patient: &PatientId) -> Result<Vec<ClinicalRecord>> {
        let mut records = if entry.record.resource_type() == "Binary" {
            decode_binary(&entry.record)?
        } else {
            vec![entry.record.clone()]
        };

        for record in &mut records {
            localise(record, patient);
        }
        Ok(records)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HealthKitSample {
    sample_type: String,
    uuid: Option<String>,
    /// Blood pressure samples carry `effectiveDate` instead
    #[serde(alias = "effectiveDate")]
    start_date: Option<String>,
    end_date: Option<String>,
    #[serde(default, alias = "systolicValue")]
    systolic: Value,
    #[serde(default, alias = "diastolicValue")]
    diastolic: Value,
}

fn decode_binary(binary: &ClinicalRecord) -> Result<Vec<ClinicalRecord>> {
    let content_type = binary
        .get("contentType")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let data = binary
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| PdrError::transform("HealthKit Binary has no data"))?;
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| PdrError::transform(format!("HealthKit Binary data is not base64: {e}")))?;

    match content_type {
        "application/json" => {
            let sample: HealthKitSample = serde_json::from_slice(&bytes).map_err(|e| {
                PdrError::transform(format!("HealthKit sample is not valid JSON: {e}"))
            })?;
            sample_to_records(sample)
        }
        "application/fhir+json" => {
            let embedded: Value = serde_json::from_slice(&bytes).map_err(|e| {
                PdrError::transform(format!("embedded FHIR resource is not valid JSON: {e}"))
            })?;
            lift_dstu2(embedded).map(|record| vec![record])
        }
        other => Err(PdrError::transform(format!(
            "unsupported HealthKit Binary content type '{other}'"
        ))),
    }
}

fn sample_to_records(sample: HealthKitSample) -> Result<Vec<ClinicalRecord>> {
    let record = match sample.sample_type.as_str() {
        PREGNANCY_SAMPLE => pregnancy_condition(&sample)?,
        BLOOD_PRESSURE_SAMPLE => blood_pressure_observation(&sample)?,
        other => {
            return Err(PdrError::transform(format!(
                "unsupported HealthKit sample type '{other}'"
            )))
        }
    };
    ClinicalRecord::from_value(record).map(|record| vec![record])
}

fn usable_end(end: Option<&str>) -> Option<&str> {
    end.map(str::trim)
        .filter(|end| !end.is_empty() && !end.starts_with(OPEN_ENDED_DATE))
}

fn pregnancy_condition(sample: &HealthKitSample) -> Result<Value> {
    let start = sample
        .start_date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PdrError::transform("pregnancy sample has no startDate"))?;
    let end = usable_end(sample.end_date.as_deref());

    let mut onset = json!({"start": start});
    if let Some(end) = end {
        onset["end"] = json!(end);
    }
    let status = if end.is_some() { "resolved" } else { "active" };

    let mut condition = json!({
        "resourceType": "Condition",
        "clinicalStatus": {
            "coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/condition-clinical",
                "code": status
            }]
        },
        "category": [{
            "coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/condition-category",
                "code": "problem-list-item"
            }]
        }],
        "code": {
            "coding": [{"system": SNOMED, "code": "77386006", "display": "Pregnant"}],
            "text": "Pregnancy"
        },
        "onsetPeriod": onset
    });
    if let Some(uuid) = &sample.uuid {
        condition["id"] = json!(uuid);
    }
    Ok(condition)
}

fn blood_pressure_observation(sample: &HealthKitSample) -> Result<Value> {
    let mut observation = json!({
        "resourceType": "Observation",
        "status": "unknown",
        "category": [{
            "coding": [{
                "system": "http://terminology.hl7.org/CodeSystem/observation-category",
                "code": "vital-signs"
            }]
        }],
        "code": {
            "coding": [{
                "system": LOINC,
                "code": "85354-9",
                "display": "Blood pressure panel with all children optional"
            }]
        },
        "component": [
            pressure_component("8480-6", "Systolic blood pressure", &sample.systolic)?,
            pressure_component("8462-4", "Diastolic blood pressure", &sample.diastolic)?,
        ]
    });
    if let Some(uuid) = &sample.uuid {
        observation["id"] = json!(uuid);
    }
    if let Some(start) = sample.start_date.as_deref().filter(|s| !s.trim().is_empty()) {
        observation["effectiveDateTime"] = json!(start.trim());
    }
    Ok(observation)
}

fn pressure_component(code: &str, display: &str, value: &Value) -> Result<Value> {
    let mut component = json!({
        "code": {"coding": [{"system": LOINC, "code": code, "display": display}]}
    });

    let number = match value {
        Value::Number(n) => Some(Value::Number(n.clone())),
        Value::String(s) if !s.trim().is_empty() => {
            let parsed: f64 = s.trim().parse().map_err(|_| {
                PdrError::transform(format!("{display} value '{s}' is not a number"))
            })?;
            Some(json!(parsed))
        }
        Value::Null | Value::String(_) => None,
        other => {
            return Err(PdrError::transform(format!(
                "{display} value {other} is not a number"
            )))
        }
    };

    match number {
        Some(number) => {
            component["valueQuantity"] = json!({
                "value": number,
                "unit": "mmHg",
                "system": UCUM,
                "code": "mm[Hg]"
            });
        }
        None => {
            component["dataAbsentReason"] = json!({
                "coding": [{
                    "system": "http://terminology.hl7.org/CodeSystem/data-absent-reason",
                    "code": "unknown"
                }]
            });
        }
    }
    Ok(component)
}

/// Brings an embedded DSTU2 resource to R4 shape
fn lift_dstu2(embedded: Value) -> Result<ClinicalRecord> {
    let mut record = ClinicalRecord::from_value(embedded)
        .map_err(|e| PdrError::transform(format!("embedded FHIR resource: {e}")))?;

    if !LIFTABLE_TYPES.contains(&record.resource_type()) {
        return Err(PdrError::transform(format!(
            "unsupported embedded resource type '{}'",
            record.resource_type()
        )));
    }

    let renamed = matches!(
        record.resource_type(),
        "Condition" | "Observation" | "Procedure" | "MedicationStatement"
    );
    if renamed {
        if let Some(patient) = record.remove("patient") {
            record.set("subject", patient);
        }
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::Verb;

    fn binary(content_type: &str, payload: &Value) -> Entry {
        let data = STANDARD.encode(serde_json::to_vec(payload).unwrap());
        let record = ClinicalRecord::from_value(json!({
            "resourceType": "Binary",
            "contentType": content_type,
            "data": data
        }))
        .unwrap();
        Entry::new(Verb::Create, record, Some("urn:uuid:bin".into()), Some("urn:apple:health-kit"))
    }

    fn patient() -> PatientId {
        PatientId::new("p1").unwrap()
    }

    #[test]
    fn test_pregnancy_with_end() {
        let entry = binary(
            "application/json",
            &json!({
                "sampleType": PREGNANCY_SAMPLE,
                "uuid": "9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d",
                "startDate": "2021-01-01T00:00:00Z",
                "endDate": "2021-09-01T00:00:00Z"
            }),
        );
        let out = HealthKitTransformer.transform(&entry, &patient()).unwrap();

        assert_eq!(out.len(), 1);
        let condition = &out[0];
        assert_eq!(condition.resource_type(), "Condition");
        assert_eq!(condition.id(), Some("9b1deb4d-3b7d-4bad-9bdd-2b0d7b3dcb6d"));
        assert_eq!(condition.get("subject"), Some(&json!({"reference": "Patient/p1"})));
        assert_eq!(
            condition.get("onsetPeriod"),
            Some(&json!({"start": "2021-01-01T00:00:00Z", "end": "2021-09-01T00:00:00Z"}))
        );
        assert_eq!(
            condition.get("clinicalStatus").unwrap()["coding"][0]["code"],
            json!("resolved")
        );
    }

    #[test]
    fn test_pregnancy_open_ended() {
        let entry = binary(
            "application/json",
            &json!({
                "sampleType": PREGNANCY_SAMPLE,
                "startDate": "2022-02-01",
                "endDate": "4000-12-31T00:00:00Z"
            }),
        );
        let out = HealthKitTransformer.transform(&entry, &patient()).unwrap();
        assert_eq!(out[0].get("onsetPeriod"), Some(&json!({"start": "2022-02-01"})));
        assert_eq!(
            out[0].get("clinicalStatus").unwrap()["coding"][0]["code"],
            json!("active")
        );
    }

    #[test]
    fn test_pregnancy_without_start_fails() {
        let entry = binary("application/json", &json!({"sampleType": PREGNANCY_SAMPLE}));
        let err = HealthKitTransformer.transform(&entry, &patient()).unwrap_err();
        assert!(matches!(err, PdrError::TransformFailure(_)));
    }

    #[test]
    fn test_blood_pressure() {
        let entry = binary(
            "application/json",
            &json!({
                "sampleType": BLOOD_PRESSURE_SAMPLE,
                "uuid": "bp-1",
                "startDate": "2022-03-01T08:00:00Z",
                "systolic": 121,
                "diastolic": ""
            }),
        );
        let out = HealthKitTransformer.transform(&entry, &patient()).unwrap();
        let obs = &out[0];

        assert_eq!(obs.resource_type(), "Observation");
        assert_eq!(obs.get("status"), Some(&json!("unknown")));
        assert_eq!(obs.get("code").unwrap()["coding"][0]["code"], json!("85354-9"));
        let components = obs.get("component").unwrap();
        assert_eq!(components[0]["valueQuantity"]["value"], json!(121));
        assert_eq!(components[0]["valueQuantity"]["code"], json!("mm[Hg]"));
        assert_eq!(components[1]["dataAbsentReason"]["coding"][0]["code"], json!("unknown"));
        assert_eq!(obs.get("subject"), Some(&json!({"reference": "Patient/p1"})));
    }

    #[test]
    fn test_blood_pressure_export_field_names() {
        let entry = binary(
            "application/json",
            &json!({
                "sampleType": BLOOD_PRESSURE_SAMPLE,
                "uuid": "u1",
                "effectiveDate": "2022-03-01T08:00:00Z",
                "systolicValue": "120",
                "diastolicValue": "80"
            }),
        );
        let out = HealthKitTransformer.transform(&entry, &patient()).unwrap();
        let obs = &out[0];

        assert_eq!(obs.get("effectiveDateTime"), Some(&json!("2022-03-01T08:00:00Z")));
        let components = obs.get("component").unwrap();
        assert_eq!(components[0]["valueQuantity"]["value"], json!(120.0));
        assert_eq!(components[1]["valueQuantity"]["value"], json!(80.0));
        assert!(components[0].get("dataAbsentReason").is_none());
        assert!(components[1].get("dataAbsentReason").is_none());
    }

    #[test]
    fn test_unknown_sample_type_fails() {
        let entry = binary("application/json", &json!({"sampleType": "HKQuantityTypeIdentifierStepCount"}));
        assert!(HealthKitTransformer.transform(&entry, &patient()).is_err());
    }

    #[test]
    fn test_dstu2_condition_lifted() {
        let entry = binary(
            "application/fhir+json",
            &json!({
                "resourceType": "Condition",
                "id": "c1",
                "patient": {"reference": "Patient/apple"},
                "asserter": {"reference": "Practitioner/x"}
            }),
        );
        let out = HealthKitTransformer.transform(&entry, &patient()).unwrap();
        assert_eq!(out[0].id(), Some("c1"));
        assert!(out[0].get("patient").is_none());
        assert!(out[0].get("asserter").is_none());
        assert_eq!(out[0].get("subject"), Some(&json!({"reference": "Patient/p1"})));
    }

    #[test]
    fn test_unsupported_embedded_type_fails() {
        let entry = binary("application/fhir+json", &json!({"resourceType": "Encounter"}));
        assert!(HealthKitTransformer.transform(&entry, &patient()).is_err());
    }

    #[test]
    fn test_bad_base64_fails() {
        let record = ClinicalRecord::from_value(json!({
            "resourceType": "Binary",
            "contentType": "application/json",
            "data": "!!not base64!!"
        }))
        .unwrap();
        let entry = Entry::new(Verb::Create, record, None, None);
        let err = HealthKitTransformer.transform(&entry, &patient()).unwrap_err();
        assert!(err.to_string().contains("base64"));
    }

    #[test]
    fn test_unknown_content_type_fails() {
        let entry = binary("text/plain", &json!({}));
        assert!(HealthKitTransformer.transform(&entry, &patient()).is_err());
    }

    #[test]
    fn test_plain_resources_pass_through() {
        let record = ClinicalRecord::from_value(json!({
            "resourceType": "Procedure",
            "id": "pr1",
            "subject": {"reference": "Patient/apple"},
            "performer": [{"actor": {"reference": "Practitioner/1"}}]
        }))
        .unwrap();
        let entry = Entry::new(Verb::Create, record, None, Some("urn:apple:health-kit"));
        let out = HealthKitTransformer.transform(&entry, &patient()).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].get("performer").is_none());
    }
}
