//! Resource store abstraction
//!
//! This module defines the trait the clinical resource store must implement to
//! back the PDR pipeline, together with the request and response types shared
//! by every implementation.

use crate::domain::ids::TargetRef;
use crate::domain::StoreError;
use async_trait::async_trait;
use serde_json::Value;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A resource as returned by the store, with its assigned identity
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResource {
    pub resource_type: String,
    pub id: String,
    pub version: String,
    /// Full resource body, `id` and `meta.versionId` included
    pub resource: Value,
}

impl StoredResource {
    /// Reads the identity fields out of a resource body
    pub fn from_resource(resource: Value) -> StoreResult<Self> {
        let field = |name: &str| {
            resource
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| StoreError::InvalidResponse(format!("resource has no {name}")))
        };
        let resource_type = field("resourceType")?;
        let id = field("id")?;
        let version = resource
            .get("meta")
            .and_then(|meta| meta.get("versionId"))
            .and_then(Value::as_str)
            .unwrap_or("1")
            .to_string();

        Ok(Self {
            resource_type,
            id,
            version,
            resource,
        })
    }

    /// `Type/id`
    pub fn reference(&self) -> String {
        format!("{}/{}", self.resource_type, self.id)
    }

    /// Identity as a versioned target
    pub fn target(&self) -> TargetRef {
        TargetRef::new(self.resource_type.clone(), Some(self.id.clone()))
            .with_version(Some(self.version.clone()))
    }
}

/// Search parameters understood by every store implementation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchParam {
    /// `patient=Patient/<id>`
    Patient(String),
    /// `entity=<reference>` (Provenance)
    Entity(String),
    /// `code=<system>|<code>`
    Code { system: String, code: String },
    /// `identifier=<system>|<value>`
    Identifier { system: String, value: String },
}

impl SearchParam {
    /// Query-string name and value
    pub fn to_query_pair(&self) -> (&'static str, String) {
        match self {
            SearchParam::Patient(reference) => ("patient", reference.clone()),
            SearchParam::Entity(reference) => ("entity", reference.clone()),
            SearchParam::Code { system, code } => ("code", format!("{system}|{code}")),
            SearchParam::Identifier { system, value } => {
                ("identifier", format!("{system}|{value}"))
            }
        }
    }
}

/// Descending sort on a date-valued element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    /// `_sort=-recorded`
    RecordedDesc,
    /// `_sort=-date`
    DateDesc,
}

impl SortKey {
    /// Element the sort reads
    pub fn element(&self) -> &'static str {
        match self {
            SortKey::RecordedDesc => "recorded",
            SortKey::DateDesc => "date",
        }
    }

    pub fn to_query_value(&self) -> String {
        format!("-{}", self.element())
    }
}

/// A typed search request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub resource_type: String,
    pub params: Vec<SearchParam>,
    pub sort: Option<SortKey>,
    pub count: Option<usize>,
}

impl SearchQuery {
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            params: Vec::new(),
            sort: None,
            count: None,
        }
    }

    pub fn param(mut self, param: SearchParam) -> Self {
        self.params.push(param);
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }
}

/// Write operation inside a transaction
#[derive(Debug, Clone, PartialEq)]
pub enum TransactionMethod {
    /// `POST /{type}`, id assigned by the store
    Create,
    /// `PUT /{type}/{id}`, optionally guarded by `If-Match`
    Update { if_match: Option<String> },
}

/// One entry of an atomic transaction
///
/// Other entries of the same transaction may refer to this one through its
/// `full_url`; the store rewrites those references to the assigned identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionOp {
    pub full_url: Option<String>,
    pub method: TransactionMethod,
    pub resource: Value,
}

impl TransactionOp {
    pub fn create(full_url: Option<String>, resource: Value) -> Self {
        Self {
            full_url: full_url.filter(|url| !url.is_empty()),
            method: TransactionMethod::Create,
            resource,
        }
    }

    pub fn update(full_url: Option<String>, resource: Value, if_match: Option<String>) -> Self {
        Self {
            full_url: full_url.filter(|url| !url.is_empty()),
            method: TransactionMethod::Update { if_match },
            resource,
        }
    }

    pub fn resource_type(&self) -> Option<&str> {
        self.resource.get("resourceType").and_then(Value::as_str)
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// Relative request URL: `Type` for creates, `Type/id` for updates
    pub fn request_url(&self) -> StoreResult<String> {
        let resource_type = self
            .resource_type()
            .ok_or_else(|| StoreError::Rejected("transaction entry has no resourceType".into()))?;
        match &self.method {
            TransactionMethod::Create => Ok(resource_type.to_string()),
            TransactionMethod::Update { .. } => {
                let id = self.resource_id().ok_or_else(|| {
                    StoreError::Rejected(format!("update of {resource_type} without an id"))
                })?;
                Ok(format!("{resource_type}/{id}"))
            }
        }
    }
}

/// Per-entry outcome of a committed transaction
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionResult {
    /// HTTP-style status line, e.g. `201 Created`
    pub status: String,
    /// `Type/id/_history/v` of the written resource
    pub location: Option<String>,
    /// The written resource, when the store returns it
    pub resource: Option<Value>,
}

impl TransactionResult {
    /// Target identity assigned by the store, from the location or the body
    pub fn assigned_target(&self) -> Option<TargetRef> {
        self.location
            .as_deref()
            .and_then(TargetRef::parse)
            .or_else(|| {
                self.resource
                    .clone()
                    .and_then(|r| StoredResource::from_resource(r).ok())
                    .map(|stored| stored.target())
            })
    }
}

/// Clinical resource store
///
/// Typed CRUD, search and atomic multi-resource transactions over FHIR
/// resources. Implementations must be safe to share between concurrent
/// submissions.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Short backend name for logs (`memory`, `fhir`)
    fn backend_name(&self) -> &'static str;

    /// Create a resource; the store assigns the id
    ///
    /// # Errors
    ///
    /// Returns `Rejected` if the store refuses the resource.
    async fn create(&self, resource: Value) -> StoreResult<StoredResource>;

    /// Read the current version of a resource
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no such resource exists.
    async fn read(&self, resource_type: &str, id: &str) -> StoreResult<StoredResource>;

    /// Update (or create at a client-chosen id) a resource
    ///
    /// # Arguments
    ///
    /// * `resource` - Resource body, which must carry `resourceType` and `id`
    /// * `expected_version` - When set, the update only applies if the current
    ///   version matches
    ///
    /// # Errors
    ///
    /// Returns `VersionConflict` if `expected_version` is stale.
    async fn update(
        &self,
        resource: Value,
        expected_version: Option<&str>,
    ) -> StoreResult<StoredResource>;

    /// Search resources of one type
    ///
    /// Results honour the query's sort; resources that compare equal on the
    /// sort key are returned most recently written first.
    async fn search(&self, query: &SearchQuery) -> StoreResult<Vec<StoredResource>>;

    /// Apply all operations atomically and in order
    ///
    /// # Returns
    ///
    /// One result per operation, in request order.
    ///
    /// # Errors
    ///
    /// Any failing operation fails the whole transaction; nothing is written.
    async fn transaction(&self, ops: Vec<TransactionOp>) -> StoreResult<Vec<TransactionResult>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_urls() {
        let create = TransactionOp::create(None, json!({"resourceType": "Observation"}));
        assert_eq!(create.request_url().unwrap(), "Observation");

        let update = TransactionOp::update(
            Some("Observation/1".into()),
            json!({"resourceType": "Observation", "id": "1"}),
            None,
        );
        assert_eq!(update.request_url().unwrap(), "Observation/1");

        let bad = TransactionOp::update(None, json!({"resourceType": "Observation"}), None);
        assert!(matches!(bad.request_url(), Err(StoreError::Rejected(_))));
    }

    #[test]
    fn test_empty_full_url_is_dropped() {
        let op = TransactionOp::create(Some(String::new()), json!({"resourceType": "List"}));
        assert!(op.full_url.is_none());
    }

    #[test]
    fn test_query_pairs() {
        let code = SearchParam::Code {
            system: "urn:mitre:healthmanager".into(),
            code: "pdr".into(),
        };
        assert_eq!(code.to_query_pair(), ("code", "urn:mitre:healthmanager|pdr".to_string()));
        assert_eq!(SortKey::RecordedDesc.to_query_value(), "-recorded");
    }

    #[test]
    fn test_assigned_target_prefers_location() {
        let result = TransactionResult {
            status: "201 Created".into(),
            location: Some("Observation/7/_history/1".into()),
            resource: Some(json!({"resourceType": "Observation", "id": "other"})),
        };
        assert_eq!(result.assigned_target().unwrap().to_string(), "Observation/7/_history/1");

        let body_only = TransactionResult {
            status: "200 OK".into(),
            location: None,
            resource: Some(json!({
                "resourceType": "Observation",
                "id": "8",
                "meta": {"versionId": "2"}
            })),
        };
        assert_eq!(body_only.assigned_target().unwrap().to_string(), "Observation/8/_history/2");
    }

    #[test]
    fn test_stored_resource_requires_id() {
        assert!(StoredResource::from_resource(json!({"resourceType": "List"})).is_err());
        let stored =
            StoredResource::from_resource(json!({"resourceType": "List", "id": "3"})).unwrap();
        assert_eq!(stored.version, "1");
        assert_eq!(stored.reference(), "List/3");
    }
}
