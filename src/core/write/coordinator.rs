//! Write coordinator
//!
//! Applies the matched records of one submission as a single atomic
//! transaction, resolves what the store assigned, then hands the correlation
//! records to the [`ManifestManager`].

use super::manifest::{Bookkeeping, ManifestManager, ManifestReceipt};
use crate::adapters::store::{ResourceStore, TransactionOp, TransactionResult};
use crate::core::matcher::MatchedEntry;
use crate::domain::envelope::SubmissionIdentifier;
use crate::domain::ids::{PatientId, TargetRef};
use crate::domain::provenance::{CorrelationRecord, CorrelationSource};
use crate::domain::record::Verb;
use crate::domain::{PdrError, Result};
use std::sync::Arc;

/// What one record turned into
#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub verb: Verb,
    /// Versioned target the store wrote
    pub target: TargetRef,
    /// Correlation record filed for it
    pub provenance: TargetRef,
}

/// Result of a fully committed submission
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    pub records: Vec<RecordOutcome>,
    pub manifest: ManifestReceipt,
}

/// Context shared by every record of one submission
#[derive(Debug, Clone, Copy)]
pub struct CommitContext<'a> {
    pub patient: &'a PatientId,
    pub identifier: Option<&'a SubmissionIdentifier>,
    /// `Bundle/<id>` of the raw archive
    pub archive_reference: &'a str,
}

pub struct WriteCoordinator {
    store: Arc<dyn ResourceStore>,
    manifests: ManifestManager,
}

impl WriteCoordinator {
    pub fn new(store: Arc<dyn ResourceStore>, manifest_max_retries: usize) -> Self {
        Self {
            manifests: ManifestManager::new(store.clone(), manifest_max_retries),
            store,
        }
    }

    pub fn manifests(&self) -> &ManifestManager {
        &self.manifests
    }

    /// Write `entries` and record what happened
    ///
    /// # Errors
    ///
    /// - `TransactionFailure` if the data transaction fails; nothing is written
    /// - `InternalFailure` if the data committed but the bookkeeping did not
    pub async fn commit(
        &self,
        context: CommitContext<'_>,
        entries: Vec<MatchedEntry>,
    ) -> Result<CommitOutcome> {
        let ops: Vec<TransactionOp> = entries.iter().map(to_op).collect();
        let expected = ops.len();

        let results = self
            .store
            .transaction(ops)
            .await
            .map_err(|e| PdrError::TransactionFailure(e.to_string()))?;
        if results.len() != expected {
            return Err(PdrError::TransactionFailure(format!(
                "store returned {} results for {expected} entries",
                results.len()
            )));
        }

        let resolved: Vec<TargetRef> = entries
            .iter()
            .zip(&results)
            .map(|(entry, result)| resolve_target(entry, result))
            .collect();

        tracing::info!(
            patient = %context.patient,
            records = resolved.len(),
            backend = self.store.backend_name(),
            "Data transaction committed"
        );

        let verbs: Vec<Verb> = entries.iter().map(|entry| entry.verb).collect();
        let items: Vec<Bookkeeping> = entries
            .into_iter()
            .zip(&resolved)
            .map(|(entry, target)| {
                let source = match (entry.locator, entry.source_payload) {
                    (Some(locator), _) => CorrelationSource::Locator(locator),
                    (None, payload) => CorrelationSource::Embedded(
                        payload.unwrap_or_else(|| entry.record.to_value()),
                    ),
                };
                Bookkeeping {
                    target: target.clone(),
                    correlation: CorrelationRecord::new(
                        context.patient.clone(),
                        target.clone(),
                        source,
                    ),
                }
            })
            .collect();

        let manifest = match self
            .manifests
            .append(
                context.patient,
                context.identifier,
                context.archive_reference,
                &items,
            )
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                let committed: Vec<String> = resolved.iter().map(ToString::to_string).collect();
                tracing::error!(
                    patient = %context.patient,
                    archive = %context.archive_reference,
                    committed = ?committed,
                    error = %e,
                    "Data committed but correlation bookkeeping failed"
                );
                return Err(match e {
                    PdrError::InternalFailure(_) => e,
                    other => PdrError::InternalFailure(other.to_string()),
                });
            }
        };

        let records = resolved
            .into_iter()
            .zip(verbs)
            .zip(manifest.provenance.iter().cloned())
            .map(|((target, verb), provenance)| RecordOutcome {
                verb,
                target,
                provenance,
            })
            .collect();

        Ok(CommitOutcome { records, manifest })
    }
}

fn to_op(entry: &MatchedEntry) -> TransactionOp {
    let full_url = Some(entry.full_url.clone());
    match entry.verb {
        Verb::Create => TransactionOp::create(full_url, entry.record.to_value()),
        Verb::Update => TransactionOp::update(full_url, entry.record.to_value(), None),
    }
}

/// Assigned location, else the body the store returned, else the planned target
fn resolve_target(entry: &MatchedEntry, result: &TransactionResult) -> TargetRef {
    result
        .assigned_target()
        .unwrap_or_else(|| entry.target.clone())
}
