//! Manifest bookkeeping
//!
//! After the data transaction commits, the correlation records and the
//! manifest append are written together in a second transaction. The manifest
//! is a read-modify-write document shared by every submission for a patient,
//! so appends are serialised per patient inside this process and retried on a
//! version conflict coming from anywhere else.

use crate::adapters::store::{ResourceStore, SearchParam, SearchQuery, SortKey, TransactionOp};
use crate::domain::envelope::SubmissionIdentifier;
use crate::domain::ids::{PatientId, TargetRef};
use crate::domain::manifest::{Manifest, PDR_CODE, PDR_CODE_SYSTEM};
use crate::domain::provenance::CorrelationRecord;
use crate::domain::{PdrError, Result, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// One processed record to file
#[derive(Debug, Clone)]
pub struct Bookkeeping {
    /// Resolved target of the data write
    pub target: TargetRef,
    pub correlation: CorrelationRecord,
}

/// Result of a committed manifest append
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestReceipt {
    /// `List/<id>`
    pub manifest: TargetRef,
    /// Whether this append created the manifest
    pub created: bool,
    /// Entries appended by this submission
    pub appended: usize,
    /// One per [`Bookkeeping`] item, in order
    pub provenance: Vec<TargetRef>,
}

/// Finds, creates and appends to per-patient manifests
pub struct ManifestManager {
    store: Arc<dyn ResourceStore>,
    max_attempts: usize,
    locks: Mutex<HashMap<PatientId, Arc<Mutex<()>>>>,
}

impl ManifestManager {
    pub fn new(store: Arc<dyn ResourceStore>, max_attempts: usize) -> Self {
        Self {
            store,
            max_attempts: max_attempts.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn patient_lock(&self, patient: &PatientId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(patient.clone()).or_default().clone()
    }

    /// Drops the map entry once no other append holds or waits on it
    async fn release_lock(&self, patient: &PatientId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(patient)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(patient);
        }
    }

    /// Active manifest for a submission, if one exists
    ///
    /// Submissions without an identifier never find one.
    pub async fn find(
        &self,
        patient: &PatientId,
        identifier: Option<&SubmissionIdentifier>,
    ) -> Result<Option<Manifest>> {
        let Some(identifier) = identifier else {
            return Ok(None);
        };

        let query = SearchQuery::new("List")
            .param(SearchParam::Patient(patient.reference()))
            .param(SearchParam::Code {
                system: PDR_CODE_SYSTEM.to_string(),
                code: PDR_CODE.to_string(),
            })
            .param(SearchParam::Identifier {
                system: identifier.system.clone(),
                value: identifier.value.clone(),
            })
            .sort(SortKey::DateDesc)
            .count(1);

        match self.store.search(&query).await?.into_iter().next() {
            Some(hit) => Manifest::from_resource(&hit.resource)
                .map(Some)
                .map_err(|reason| {
                    PdrError::InternalFailure(format!(
                        "manifest {} is unreadable: {reason}",
                        hit.reference()
                    ))
                }),
            None => Ok(None),
        }
    }

    /// File correlation records and append them to the patient's manifest
    ///
    /// A new manifest gets the archive reference first; then each item adds
    /// its target and its correlation record.
    ///
    /// # Errors
    ///
    /// Returns `InternalFailure` if the bookkeeping transaction fails, or keeps
    /// conflicting after every attempt.
    pub async fn append(
        &self,
        patient: &PatientId,
        identifier: Option<&SubmissionIdentifier>,
        archive_reference: &str,
        items: &[Bookkeeping],
    ) -> Result<ManifestReceipt> {
        let lock = self.patient_lock(patient).await;
        let outcome = {
            let _guard = lock.lock().await;
            self.append_with_retry(patient, identifier, archive_reference, items)
                .await
        };
        self.release_lock(patient, lock).await;
        outcome
    }

    async fn append_with_retry(
        &self,
        patient: &PatientId,
        identifier: Option<&SubmissionIdentifier>,
        archive_reference: &str,
        items: &[Bookkeeping],
    ) -> Result<ManifestReceipt> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self
                .try_append(patient, identifier, archive_reference, items)
                .await
            {
                Ok(receipt) => return Ok(receipt),
                Err(PdrError::Store(StoreError::VersionConflict { reference, .. }))
                    if attempt < self.max_attempts =>
                {
                    tracing::warn!(
                        patient = %patient,
                        manifest = %reference,
                        attempt,
                        max_attempts = self.max_attempts,
                        "Manifest changed concurrently, re-reading"
                    );
                }
                Err(PdrError::Store(e)) => {
                    return Err(PdrError::InternalFailure(format!(
                        "bookkeeping for Patient/{patient} failed after {attempt} attempt(s): {e}"
                    )))
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_append(
        &self,
        patient: &PatientId,
        identifier: Option<&SubmissionIdentifier>,
        archive_reference: &str,
        items: &[Bookkeeping],
    ) -> Result<ManifestReceipt> {
        let mut manifest = match self.find(patient, identifier).await? {
            Some(existing) => existing,
            None => Manifest::new(patient.clone(), identifier.cloned()),
        };
        let created = manifest.is_new();
        let before = manifest.len();

        if created {
            manifest.append(archive_reference);
        }

        let mut ops = Vec::with_capacity(items.len() + 1);
        for item in items {
            let full_url = format!("urn:uuid:{}", Uuid::new_v4());
            let target = item
                .target
                .versioned_reference()
                .or_else(|| item.target.reference())
                .unwrap_or_else(|| item.target.resource_type().to_string());
            manifest.append(target);
            manifest.append(full_url.clone());
            ops.push(TransactionOp::create(
                Some(full_url),
                item.correlation.to_resource(),
            ));
        }
        let appended = manifest.len() - before;

        let manifest_op = match &manifest.id {
            None => TransactionOp::create(
                Some(format!("urn:uuid:{}", Uuid::new_v4())),
                manifest.to_resource(),
            ),
            Some(id) => TransactionOp::update(
                Some(format!("List/{id}")),
                manifest.to_resource(),
                manifest.version.clone(),
            ),
        };
        ops.push(manifest_op);

        let expected = ops.len();
        let results = self.store.transaction(ops).await?;
        if results.len() != expected {
            return Err(PdrError::InternalFailure(format!(
                "bookkeeping transaction returned {} results for {expected} entries",
                results.len()
            )));
        }

        let mut targets = results
            .iter()
            .map(|result| {
                result.assigned_target().ok_or_else(|| {
                    PdrError::InternalFailure(format!(
                        "bookkeeping result has no identity (status {})",
                        result.status
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let manifest_target = targets.pop().ok_or_else(|| {
            PdrError::InternalFailure("bookkeeping transaction returned no manifest".into())
        })?;

        Ok(ManifestReceipt {
            manifest: TargetRef::new("List", manifest_target.id().map(str::to_string)),
            created,
            appended,
            provenance: targets,
        })
    }
}
