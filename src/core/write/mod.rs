//! Committing a submission: data transaction, correlation records, manifest

pub mod coordinator;
pub mod manifest;

pub use coordinator::{CommitContext, CommitOutcome, RecordOutcome, WriteCoordinator};
pub use manifest::{Bookkeeping, ManifestManager, ManifestReceipt};
