//! Clinical resource store abstraction
//!
//! The pipeline reads and writes FHIR resources only through the
//! [`ResourceStore`] trait. Two implementations are provided:
//!
//! - [`InMemoryStore`] - process-local, used for tests and dry runs
//! - [`FhirRestStore`] - a FHIR R4 REST server

pub mod factory;
pub mod fhir;
pub mod memory;
pub mod traits;

pub use factory::create_store;
pub use fhir::FhirRestStore;
pub use memory::InMemoryStore;
pub use traits::{
    ResourceStore, SearchParam, SearchQuery, SortKey, StoreResult, StoredResource,
    TransactionMethod, TransactionOp, TransactionResult,
};
