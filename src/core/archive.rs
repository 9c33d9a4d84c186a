//! Raw submission archive
//!
//! Every envelope that passes validation is stored verbatim as a `Bundle`
//! before anything else is written. The archive is the audit trail of what was
//! attempted and is kept whatever happens downstream.

use crate::adapters::store::ResourceStore;
use crate::domain::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Identity of an archived submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveReceipt {
    /// Store id of the archived Bundle
    pub id: String,
    /// `Bundle/<id>`
    pub reference: String,
    /// Hex SHA-256 of the submitted bytes
    pub digest: String,
}

/// Writes inbound envelopes to the resource store
pub struct RawArchive {
    store: Arc<dyn ResourceStore>,
}

impl RawArchive {
    pub fn new(store: Arc<dyn ResourceStore>) -> Self {
        Self { store }
    }

    /// Store `bundle` and return its receipt
    ///
    /// `raw` is the exact byte form the caller received; it is only hashed.
    ///
    /// # Errors
    ///
    /// Returns a store error if the create fails.
    pub async fn archive(&self, bundle: &Value, raw: &[u8]) -> Result<ArchiveReceipt> {
        let digest = digest_hex(raw);
        let stored = self.store.create(bundle.clone()).await?;

        tracing::info!(
            archive = %stored.reference(),
            digest = %digest,
            bytes = raw.len(),
            "Archived raw submission"
        );

        Ok(ArchiveReceipt {
            reference: stored.reference(),
            id: stored.id,
            digest,
        })
    }
}

fn digest_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
