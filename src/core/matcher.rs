//! Record correlation
//!
//! Decides, for each normalised record, whether it creates a new resource or
//! updates one already on file for the patient. The decision keys on the
//! record's source [`Locator`]: the latest correlation record filed for the
//! patient under that locator names the target to update.
//!
//! Resubmitting the same bundle therefore resolves to the same targets and
//! turns every create into an update.

use crate::adapters::store::{ResourceStore, SearchParam, SearchQuery, SortKey};
use crate::domain::ids::{Locator, PatientId, TargetRef};
use crate::domain::provenance::CorrelationRecord;
use crate::domain::record::{self_correlate, ClinicalRecord, Verb};
use crate::domain::Result;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// A record with its write decision
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedEntry {
    pub verb: Verb,
    /// Where the record will be written
    pub target: TargetRef,
    /// Transport identity inside the transaction; empty when there is no id
    pub full_url: String,
    /// Body to write
    pub record: ClinicalRecord,
    pub locator: Option<Locator>,
    /// The record as received, kept when there is no locator to point at
    pub source_payload: Option<Value>,
}

/// Resolves create-vs-update against the correlation records in the store
pub struct RecordMatcher {
    store: Arc<dyn ResourceStore>,
}

impl RecordMatcher {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Match one record for `patient`
    ///
    /// # Errors
    ///
    /// Returns a store error if the correlation lookup fails.
    pub async fn resolve(
        &self,
        mut record: ClinicalRecord,
        locator: Option<Locator>,
        patient: &PatientId,
    ) -> Result<MatchedEntry> {
        let source_payload = locator.is_none().then(|| record.to_value());

        if record.is_patient() {
            self_correlate(&mut record, patient);
            let target = TargetRef::new("Patient", Some(patient.as_str().to_string()));
            return Ok(Self::matched(Verb::Update, target, record, locator, source_payload));
        }

        if let Some(locator) = &locator {
            if let Some(prior) = self.latest_correlation(locator, patient).await? {
                let same_type = prior.target.resource_type() == record.resource_type();
                if let (true, Some(id)) = (same_type, prior.target.id()) {
                    tracing::debug!(
                        locator = %locator,
                        target = %prior.target,
                        "Correlated to existing record"
                    );
                    record.set_id(id);
                    let target = TargetRef::new(prior.target.resource_type(), Some(id.to_string()));
                    return Ok(Self::matched(
                        Verb::Update,
                        target,
                        record,
                        Some(locator.clone()),
                        source_payload,
                    ));
                }
            }
        }

        let id = record
            .id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let target = TargetRef::new(record.resource_type(), Some(id));
        record.clear_id();
        Ok(Self::matched(Verb::Create, target, record, locator, source_payload))
    }

    fn matched(
        verb: Verb,
        target: TargetRef,
        record: ClinicalRecord,
        locator: Option<Locator>,
        source_payload: Option<Value>,
    ) -> MatchedEntry {
        MatchedEntry {
            verb,
            full_url: target.transport_full_url(),
            target,
            record,
            locator,
            source_payload,
        }
    }

    /// Most recently recorded correlation for `(patient, locator)`
    async fn latest_correlation(
        &self,
        locator: &Locator,
        patient: &PatientId,
    ) -> Result<Option<CorrelationRecord>> {
        let query = SearchQuery::new("Provenance")
            .param(SearchParam::Patient(patient.reference()))
            .param(SearchParam::Entity(locator.unversioned().into_inner()))
            .sort(SortKey::RecordedDesc)
            .count(1);

        let hits = self.store.search(&query).await?;
        Ok(hits.into_iter().next().and_then(|hit| {
            CorrelationRecord::from_resource(&hit.resource)
                .map_err(|reason| {
                    tracing::warn!(
                        provenance = %hit.reference(),
                        reason = %reason,
                        "Ignoring unreadable correlation record"
                    );
                })
                .ok()
        }))
    }
}
