//! PDR pipeline orchestration
//!
//! One submission flows through:
//!
//! 1. validate the envelope
//! 2. archive it verbatim
//! 3. check the target patient exists
//! 4. transform and match every entry, `worker_concurrency` at a time
//! 5. commit the matched records, their correlation records and the manifest
//! 6. answer with a response envelope
//!
//! Step 4 is a join barrier: the first entry that fails aborts the submission
//! before anything is written. Only the archive from step 2 survives a failure.

use crate::adapters::store::ResourceStore;
use crate::config::PdrConfig;
use crate::core::archive::{ArchiveReceipt, RawArchive};
use crate::core::matcher::{MatchedEntry, RecordMatcher};
use crate::core::response::ResponseBuilder;
use crate::core::transform::{Transformer, TransformerRegistry};
use crate::core::validate::EnvelopeValidator;
use crate::core::write::{CommitContext, RecordOutcome, WriteCoordinator};
use crate::domain::envelope::{MessageHeader, Submission};
use crate::domain::ids::{PatientId, TargetRef};
use crate::domain::record::{derive_locator, Entry, Verb};
use crate::domain::{PdrError, Result, StoreError};
use crate::{log_submission_complete, log_submission_failed, log_submission_start};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Everything a successful submission produced
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub archive: ArchiveReceipt,
    /// `List/<id>`
    pub manifest: TargetRef,
    pub manifest_created: bool,
    pub manifest_entries_added: usize,
    /// One per written record, in submission order
    pub records: Vec<RecordOutcome>,
}

impl IngestOutcome {
    pub fn created(&self) -> usize {
        self.records.iter().filter(|r| r.verb == Verb::Create).count()
    }

    pub fn updated(&self) -> usize {
        self.records.iter().filter(|r| r.verb == Verb::Update).count()
    }
}

/// The PDR ingestion pipeline
pub struct PdrPipeline {
    store: Arc<dyn ResourceStore>,
    validator: EnvelopeValidator,
    archive: RawArchive,
    transformers: TransformerRegistry,
    matcher: RecordMatcher,
    writer: WriteCoordinator,
    worker_concurrency: usize,
    reply_timeout: Duration,
    server_address: Option<String>,
}

impl PdrPipeline {
    /// Build a pipeline over `store` with the transformers enabled in `config`
    pub fn new(config: &PdrConfig, store: Arc<dyn ResourceStore>) -> Self {
        Self {
            validator: EnvelopeValidator::new(config.pipeline.pdr_event.clone()),
            archive: RawArchive::new(store.clone()),
            transformers: TransformerRegistry::from_config(&config.transformers),
            matcher: RecordMatcher::new(store.clone()),
            writer: WriteCoordinator::new(store.clone(), config.pipeline.manifest_max_retries),
            worker_concurrency: config.pipeline.worker_concurrency.max(1),
            reply_timeout: Duration::from_millis(config.pipeline.reply_timeout_ms),
            server_address: config.application.server_address.clone(),
            store,
        }
    }

    /// Replace the transformer registry
    pub fn with_transformers(mut self, transformers: TransformerRegistry) -> Self {
        self.transformers = transformers;
        self
    }

    pub fn validator(&self) -> &EnvelopeValidator {
        &self.validator
    }

    /// Process one submission and answer with a response envelope
    ///
    /// Never fails: every error becomes a `fatal-error` envelope and is logged.
    pub async fn process_submission(&self, bundle_json: &str, caller_server_base: &str) -> Value {
        let server_base = self
            .server_address
            .as_deref()
            .unwrap_or(caller_server_base);
        let responses = ResponseBuilder::new(self.validator.pdr_event(), server_base);

        let bundle: Value = match serde_json::from_str(bundle_json) {
            Ok(bundle) => bundle,
            Err(e) => {
                let error = PdrError::unprocessable(format!("submission is not valid JSON: {e}"));
                log_submission_failed!(&error, None::<&str>);
                return responses.failure(None, None);
            }
        };

        let header = MessageHeader::peek(&bundle);
        let destination = header.source_endpoint.as_deref();
        let request_id = header.id.as_deref();

        match self.run(&bundle, bundle_json.as_bytes()).await {
            Ok(_) => responses.success(destination, request_id),
            Err(error) => {
                log_submission_failed!(&error, request_id);
                responses.failure(destination, request_id)
            }
        }
    }

    /// [`ingest`](Self::ingest) bounded by the reply timeout
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the reply timeout expires first.
    pub async fn run(&self, bundle: &Value, raw: &[u8]) -> Result<IngestOutcome> {
        match tokio::time::timeout(self.reply_timeout, self.ingest(bundle, raw)).await {
            Ok(result) => result,
            Err(_) => Err(PdrError::Timeout(self.reply_timeout.as_millis() as u64)),
        }
    }

    /// Ingest one submission
    ///
    /// `raw` is the submission as received; it is hashed into the archive
    /// receipt.
    ///
    /// # Errors
    ///
    /// - `UnprocessableSubmission` when the envelope is rejected
    /// - `PatientNotFound` when the target patient does not exist
    /// - `TransformFailure` when a payload cannot be decoded
    /// - `TransactionFailure` when the data transaction fails
    /// - `InternalFailure` when the data committed but bookkeeping did not
    pub async fn ingest(&self, bundle: &Value, raw: &[u8]) -> Result<IngestOutcome> {
        let started = Instant::now();
        let submission = self.validator.validate(bundle)?;
        log_submission_start!(
            &submission.patient,
            &submission.source_endpoint,
            submission.entries.len()
        );

        let archive = self.archive.archive(bundle, raw).await?;
        self.check_patient(&submission.patient).await?;

        let transformer = self.transformers.resolve(&submission.source_endpoint);
        tracing::debug!(
            transformer = transformer.name(),
            source = %submission.source_endpoint,
            "Routing entries"
        );

        let matched: Vec<Vec<MatchedEntry>> = stream::iter(&submission.entries)
            .map(|entry| self.match_entry(transformer.as_ref(), entry, &submission))
            .buffered(self.worker_concurrency)
            .try_collect()
            .await?;
        let matched: Vec<MatchedEntry> = matched.into_iter().flatten().collect();

        let identifier = submission.identifier();
        let context = CommitContext {
            patient: &submission.patient,
            identifier: identifier.as_ref(),
            archive_reference: &archive.reference,
        };
        let committed = self.writer.commit(context, matched).await?;

        let outcome = IngestOutcome {
            archive,
            manifest: committed.manifest.manifest,
            manifest_created: committed.manifest.created,
            manifest_entries_added: committed.manifest.appended,
            records: committed.records,
        };
        log_submission_complete!(
            &submission.patient,
            outcome.created(),
            outcome.updated(),
            started.elapsed()
        );
        Ok(outcome)
    }

    async fn check_patient(&self, patient: &PatientId) -> Result<()> {
        match self.store.read("Patient", patient.as_str()).await {
            Ok(_) => Ok(()),
            Err(StoreError::NotFound(_)) => Err(PdrError::PatientNotFound(patient.reference())),
            Err(e) => Err(e.into()),
        }
    }

    /// Transform one entry and match every record it produced
    async fn match_entry(
        &self,
        transformer: &dyn Transformer,
        entry: &Entry,
        submission: &Submission,
    ) -> Result<Vec<MatchedEntry>> {
        let records = transformer.transform(entry, &submission.patient)?;

        // a fullUrl identifies the submitted entry, so it only carries over 1:1
        let full_url = match records.len() {
            1 => entry.full_url.as_deref(),
            _ => None,
        };

        let mut matched = Vec::with_capacity(records.len());
        for record in records {
            let locator = derive_locator(&record, full_url, Some(&submission.source_endpoint));
            matched.push(
                self.matcher
                    .resolve(record, locator, &submission.patient)
                    .await?,
            );
        }
        Ok(matched)
    }
}
