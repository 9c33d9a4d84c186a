//! Pass-through transformer for sources without a registration

use super::{localise, Transformer};
use crate::domain::ids::PatientId;
use crate::domain::record::{ClinicalRecord, Entry};
use crate::domain::Result;

/// Returns the entry's record, localised to the target patient
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransformer;

impl Transformer for DefaultTransformer {
    fn name(&self) -> &'static str {
        "default"
    }

    fn transform(&self, entry: &Entry, patient: &PatientId) -> Result<Vec<ClinicalRecord>> {
        let mut record = entry.record.clone();
        localise(&mut record, patient);
        Ok(vec![record])
    }
}
