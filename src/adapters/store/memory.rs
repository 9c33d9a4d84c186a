//! In-memory resource store
//!
//! Process-local, versioned store with atomic transactions. Writes are staged
//! on a copy of the state and swapped in only when every operation succeeds.
//! Used by the test suite, by `pdr check`, and by `store.backend = "memory"`.

use super::traits::{
    ResourceStore, SearchParam, SearchQuery, SortKey, StoreResult, StoredResource,
    TransactionMethod, TransactionOp, TransactionResult,
};
use crate::domain::provenance::{format_instant, parse_instant};
use crate::domain::StoreError;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Predicate deciding whether a write is refused; `Some(reason)` refuses it
pub type RejectionRule = Arc<dyn Fn(&Value) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone)]
struct Slot {
    version: u64,
    /// Global write order, used to break sort ties
    sequence: u64,
    resource: Value,
}

#[derive(Debug, Clone, Default)]
struct State {
    resources: HashMap<(String, String), Slot>,
    next_id: u64,
    next_sequence: u64,
}

impl State {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    fn write(&mut self, mut resource: Value, id: String, version: u64) -> StoredResource {
        let resource_type = resource_type_of(&resource).unwrap_or_default().to_string();
        resource["id"] = Value::String(id.clone());
        let meta = resource
            .as_object_mut()
            .map(|obj| obj.entry("meta").or_insert_with(|| json!({})));
        if let Some(Value::Object(meta)) = meta {
            meta.insert("versionId".into(), Value::String(version.to_string()));
            meta.insert(
                "lastUpdated".into(),
                Value::String(format_instant(&Utc::now())),
            );
        }

        self.next_sequence += 1;
        self.resources.insert(
            (resource_type.clone(), id.clone()),
            Slot {
                version,
                sequence: self.next_sequence,
                resource: resource.clone(),
            },
        );

        StoredResource {
            resource_type,
            id,
            version: version.to_string(),
            resource,
        }
    }

    fn put(
        &mut self,
        resource: Value,
        expected_version: Option<&str>,
    ) -> StoreResult<(StoredResource, bool)> {
        let resource_type = resource_type_of(&resource)?.to_string();
        let id = resource
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StoreError::Rejected(format!("update of {resource_type} without an id")))?
            .to_string();

        let current = self
            .resources
            .get(&(resource_type.clone(), id.clone()))
            .map(|slot| slot.version);

        if let Some(expected) = expected_version {
            let actual = current.map(|v| v.to_string());
            if actual.as_deref() != Some(strip_weak_etag(expected)) {
                return Err(StoreError::VersionConflict {
                    reference: format!("{resource_type}/{id}"),
                    expected: expected.to_string(),
                    actual: actual.unwrap_or_else(|| "none".to_string()),
                });
            }
        }

        let created = current.is_none();
        let version = current.map_or(1, |v| v + 1);
        Ok((self.write(resource, id, version), created))
    }
}

/// Process-local [`ResourceStore`]
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    rejection: Option<RejectionRule>,
    transactions: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every write for which `rule` returns a reason
    pub fn with_rejection<F>(mut self, rule: F) -> Self
    where
        F: Fn(&Value) -> Option<String> + Send + Sync + 'static,
    {
        self.rejection = Some(Arc::new(rule));
        self
    }

    /// Number of resources of a type currently stored
    pub async fn count(&self, resource_type: &str) -> usize {
        self.state
            .read()
            .await
            .resources
            .keys()
            .filter(|(t, _)| t == resource_type)
            .count()
    }

    /// All resources of a type, in write order
    pub async fn all(&self, resource_type: &str) -> Vec<Value> {
        let state = self.state.read().await;
        let mut slots: Vec<&Slot> = state
            .resources
            .iter()
            .filter(|((t, _), _)| t == resource_type)
            .map(|(_, slot)| slot)
            .collect();
        slots.sort_by_key(|slot| slot.sequence);
        slots.into_iter().map(|slot| slot.resource.clone()).collect()
    }

    /// Number of transactions attempted, committed or not
    pub fn transaction_count(&self) -> usize {
        self.transactions.load(AtomicOrdering::SeqCst)
    }

    fn check_rejection(&self, resource: &Value) -> StoreResult<()> {
        match self.rejection.as_ref().and_then(|rule| rule(resource)) {
            Some(reason) => Err(StoreError::Rejected(reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, resource: Value) -> StoreResult<StoredResource> {
        resource_type_of(&resource)?;
        self.check_rejection(&resource)?;

        let mut state = self.state.write().await;
        let id = state.allocate_id();
        Ok(state.write(resource, id, 1))
    }

    async fn read(&self, resource_type: &str, id: &str) -> StoreResult<StoredResource> {
        let state = self.state.read().await;
        state
            .resources
            .get(&(resource_type.to_string(), id.to_string()))
            .map(|slot| StoredResource {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
                version: slot.version.to_string(),
                resource: slot.resource.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(format!("{resource_type}/{id}")))
    }

    async fn update(
        &self,
        resource: Value,
        expected_version: Option<&str>,
    ) -> StoreResult<StoredResource> {
        self.check_rejection(&resource)?;
        let mut state = self.state.write().await;
        state
            .put(resource, expected_version)
            .map(|(stored, _)| stored)
    }

    async fn search(&self, query: &SearchQuery) -> StoreResult<Vec<StoredResource>> {
        let state = self.state.read().await;
        let mut hits: Vec<(&(String, String), &Slot)> = state
            .resources
            .iter()
            .filter(|((t, _), _)| *t == query.resource_type)
            .filter(|(_, slot)| query.params.iter().all(|p| matches_param(&slot.resource, p)))
            .collect();

        hits.sort_by(|(_, a), (_, b)| {
            let by_key = query
                .sort
                .map(|key| compare_desc(&a.resource, &b.resource, key))
                .unwrap_or(Ordering::Equal);
            by_key.then_with(|| b.sequence.cmp(&a.sequence))
        });

        let limit = query.count.unwrap_or(usize::MAX);
        Ok(hits
            .into_iter()
            .take(limit)
            .map(|((resource_type, id), slot)| StoredResource {
                resource_type: resource_type.clone(),
                id: id.clone(),
                version: slot.version.to_string(),
                resource: slot.resource.clone(),
            })
            .collect())
    }

    async fn transaction(&self, ops: Vec<TransactionOp>) -> StoreResult<Vec<TransactionResult>> {
        self.transactions.fetch_add(1, AtomicOrdering::SeqCst);

        let mut state = self.state.write().await;
        let mut staged = state.clone();

        // Assign identities first so entries can reference each other
        let mut assigned: HashMap<String, String> = HashMap::new();
        let mut create_ids: Vec<Option<String>> = Vec::with_capacity(ops.len());
        for op in &ops {
            let url = op.request_url()?;
            let id = match op.method {
                TransactionMethod::Create => {
                    let id = staged.allocate_id();
                    let reference = format!("{url}/{id}");
                    if let Some(full_url) = &op.full_url {
                        assigned.insert(full_url.clone(), reference);
                    }
                    Some(id)
                }
                TransactionMethod::Update { .. } => {
                    if let Some(full_url) = &op.full_url {
                        assigned.insert(full_url.clone(), url);
                    }
                    None
                }
            };
            create_ids.push(id);
        }

        let mut results = Vec::with_capacity(ops.len());
        for (op, create_id) in ops.into_iter().zip(create_ids) {
            let mut resource = op.resource;
            rewrite_references(&mut resource, &assigned);
            self.check_rejection(&resource)?;

            let (stored, created) = match (op.method, create_id) {
                (TransactionMethod::Create, Some(id)) => (staged.write(resource, id, 1), true),
                (TransactionMethod::Update { if_match }, _) => {
                    staged.put(resource, if_match.as_deref())?
                }
                (TransactionMethod::Create, None) => {
                    return Err(StoreError::InvalidResponse(
                        "create without an assigned id".to_string(),
                    ))
                }
            };

            results.push(TransactionResult {
                status: if created { "201 Created" } else { "200 OK" }.to_string(),
                location: Some(format!(
                    "{}/_history/{}",
                    stored.reference(),
                    stored.version
                )),
                resource: Some(stored.resource),
            });
        }

        *state = staged;
        Ok(results)
    }
}

fn resource_type_of(resource: &Value) -> StoreResult<&str> {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| StoreError::Rejected("resource has no resourceType".to_string()))
}

fn strip_weak_etag(tag: &str) -> &str {
    tag.trim_start_matches("W/").trim_matches('"')
}

/// Replace every `reference` string found in `assigned`
fn rewrite_references(value: &mut Value, assigned: &HashMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "reference" {
                    if let Some(replacement) = child.as_str().and_then(|r| assigned.get(r)) {
                        *child = Value::String(replacement.clone());
                        continue;
                    }
                }
                rewrite_references(child, assigned);
            }
        }
        Value::Array(items) => {
            for item in items {
                rewrite_references(item, assigned);
            }
        }
        _ => {}
    }
}

fn references_at<'a>(resource: &'a Value, field: &str) -> Vec<&'a str> {
    match resource.get(field) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("reference").and_then(Value::as_str))
            .collect(),
        Some(item) => item
            .get("reference")
            .and_then(Value::as_str)
            .into_iter()
            .collect(),
        None => Vec::new(),
    }
}

fn same_reference(stored: &str, wanted: &str) -> bool {
    stored == wanted
        || stored
            .split("/_history/")
            .next()
            .is_some_and(|base| base == wanted)
}

fn matches_param(resource: &Value, param: &SearchParam) -> bool {
    match param {
        SearchParam::Patient(reference) => ["subject", "patient", "target"]
            .iter()
            .flat_map(|field| references_at(resource, field))
            .any(|r| same_reference(r, reference)),
        SearchParam::Entity(reference) => resource
            .get("entity")
            .and_then(Value::as_array)
            .is_some_and(|entities| {
                entities.iter().any(|entity| {
                    entity
                        .get("what")
                        .and_then(|what| what.get("reference"))
                        .and_then(Value::as_str)
                        == Some(reference.as_str())
                })
            }),
        SearchParam::Code { system, code } => resource
            .get("code")
            .and_then(|c| c.get("coding"))
            .and_then(Value::as_array)
            .is_some_and(|codings| {
                codings.iter().any(|coding| {
                    coding.get("system").and_then(Value::as_str) == Some(system.as_str())
                        && coding.get("code").and_then(Value::as_str) == Some(code.as_str())
                })
            }),
        SearchParam::Identifier { system, value } => {
            let matches = |id: &Value| {
                id.get("system").and_then(Value::as_str) == Some(system.as_str())
                    && id.get("value").and_then(Value::as_str) == Some(value.as_str())
            };
            match resource.get("identifier") {
                Some(Value::Array(ids)) => ids.iter().any(matches),
                Some(id) => matches(id),
                None => false,
            }
        }
    }
}

fn compare_desc(a: &Value, b: &Value, key: SortKey) -> Ordering {
    let read = |v: &Value| v.get(key.element()).and_then(Value::as_str).map(str::to_string);
    let (a, b) = (read(a), read(b));
    let instant = |s: &Option<String>| s.as_deref().and_then(parse_instant);
    match (instant(&a), instant(&b)) {
        (Some(a), Some(b)) => b.cmp(&a),
        _ => b.cmp(&a),
    }
}
