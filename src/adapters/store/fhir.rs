//! FHIR R4 REST resource store
//!
//! Talks to a FHIR server over HTTP:
//!
//! - `POST /{type}` for create
//! - `GET /{type}/{id}` for read
//! - `PUT /{type}/{id}` with `If-Match` for update
//! - `GET /{type}?params&_sort=-x` for search
//! - `POST /` with a `transaction` Bundle for atomic writes
//!
//! Connection errors and 5xx responses are retried with exponential backoff;
//! every other failure is returned immediately.

use super::traits::{
    ResourceStore, SearchQuery, StoreResult, StoredResource, TransactionMethod, TransactionOp,
    TransactionResult,
};
use crate::config::FhirStoreConfig;
use crate::domain::ids::TargetRef;
use crate::domain::StoreError;
use async_trait::async_trait;
use reqwest::header::{CONTENT_LOCATION, LOCATION};
use reqwest::{Client, ClientBuilder, RequestBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde_json::{json, Value};
use std::time::Duration;

const FHIR_JSON: &str = "application/fhir+json";

/// Parts of an HTTP reply the store cares about
#[derive(Debug)]
struct HttpReply {
    location: Option<String>,
    body: Value,
}

/// [`ResourceStore`] backed by a FHIR R4 REST server
pub struct FhirRestStore {
    /// Base URL without a trailing slash
    base_url: String,

    client: Client,

    config: FhirStoreConfig,
}

impl FhirRestStore {
    /// Create a new REST store
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connection` if the HTTP client cannot be built.
    pub fn new(config: FhirStoreConfig) -> StoreResult<Self> {
        let client = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| StoreError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client,
            config,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.is_empty() {
            self.base_url.clone()
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("Accept", FHIR_JSON);
        match &self.config.auth_token {
            Some(token) => request.header(
                "Authorization",
                format!("Bearer {}", token.expose_secret()),
            ),
            None => request,
        }
    }

    /// Retry a request with exponential backoff
    async fn retry_request<F, T, Fut>(&self, operation: F) -> StoreResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = StoreResult<T>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= retry.max_retries {
                        return Err(e);
                    }

                    let delay_ms = (retry.initial_delay_ms as f64
                        * retry.backoff_multiplier.powf((attempt - 1) as f64))
                        as u64;
                    let delay_ms = delay_ms.min(retry.max_delay_ms);

                    tracing::warn!(
                        attempt = attempt,
                        max_retries = retry.max_retries,
                        delay_ms = delay_ms,
                        error = %e,
                        "Retrying FHIR request after error"
                    );

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// Send a request (rebuilt on every attempt) and decode the JSON reply
    async fn exchange<F>(
        &self,
        build: F,
        context: &str,
        expected_version: Option<&str>,
    ) -> StoreResult<HttpReply>
    where
        F: Fn() -> RequestBuilder + Sync,
    {
        self.retry_request(|| async {
            let response = self
                .authorize(build())
                .send()
                .await
                .map_err(|e| StoreError::Connection(format!("{context}: {e}")))?;

            let status = response.status();
            let location = response
                .headers()
                .get(LOCATION)
                .or_else(|| response.headers().get(CONTENT_LOCATION))
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = response
                .text()
                .await
                .map_err(|e| StoreError::Connection(format!("{context}: {e}")))?;

            if !status.is_success() {
                return Err(status_error(status, &text, context, expected_version));
            }

            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text).map_err(|e| {
                    StoreError::InvalidResponse(format!("{context}: body is not JSON: {e}"))
                })?
            };
            Ok(HttpReply { location, body })
        })
        .await
    }
}

#[async_trait]
impl ResourceStore for FhirRestStore {
    fn backend_name(&self) -> &'static str {
        "fhir"
    }

    async fn create(&self, resource: Value) -> StoreResult<StoredResource> {
        let resource_type = resource_type_of(&resource)?.to_string();
        let url = self.url(&resource_type);
        let context = format!("create {resource_type}");

        let reply = self
            .exchange(
                || {
                    self.client
                        .post(&url)
                        .header("Prefer", "return=representation")
                        .json(&resource)
                },
                &context,
                None,
            )
            .await?;
        stored_from_reply(reply, &resource)
    }

    async fn read(&self, resource_type: &str, id: &str) -> StoreResult<StoredResource> {
        let url = self.url(&format!("{resource_type}/{id}"));
        let context = format!("read {resource_type}/{id}");

        let reply = self
            .exchange(|| self.client.get(&url), &context, None)
            .await?;
        StoredResource::from_resource(reply.body)
    }

    async fn update(
        &self,
        resource: Value,
        expected_version: Option<&str>,
    ) -> StoreResult<StoredResource> {
        let op = TransactionOp::update(None, resource, expected_version.map(str::to_string));
        let path = op.request_url()?;
        let url = self.url(&path);
        let context = format!("update {path}");

        let reply = self
            .exchange(
                || {
                    let request = self
                        .client
                        .put(&url)
                        .header("Prefer", "return=representation")
                        .json(&op.resource);
                    match expected_version {
                        Some(version) => request.header("If-Match", weak_etag(version)),
                        None => request,
                    }
                },
                &context,
                expected_version,
            )
            .await?;
        stored_from_reply(reply, &op.resource)
    }

    async fn search(&self, query: &SearchQuery) -> StoreResult<Vec<StoredResource>> {
        let url = self.url(&query.resource_type);
        let mut pairs: Vec<(&str, String)> =
            query.params.iter().map(|p| p.to_query_pair()).collect();
        if let Some(sort) = query.sort {
            pairs.push(("_sort", sort.to_query_value()));
        }
        if let Some(count) = query.count {
            pairs.push(("_count", count.to_string()));
        }
        let context = format!("search {}", query.resource_type);

        let reply = self
            .exchange(|| self.client.get(&url).query(&pairs), &context, None)
            .await?;

        let entries = reply
            .body
            .get("entry")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        entries
            .into_iter()
            .filter(|entry| {
                entry
                    .get("search")
                    .and_then(|s| s.get("mode"))
                    .and_then(Value::as_str)
                    .map_or(true, |mode| mode == "match")
            })
            .filter_map(|mut entry| entry.get_mut("resource").map(Value::take))
            .filter(|resource| {
                resource.get("resourceType").and_then(Value::as_str)
                    == Some(query.resource_type.as_str())
            })
            .map(StoredResource::from_resource)
            .collect()
    }

    async fn transaction(&self, ops: Vec<TransactionOp>) -> StoreResult<Vec<TransactionResult>> {
        let mut entries = Vec::with_capacity(ops.len());
        for op in &ops {
            let method = match op.method {
                TransactionMethod::Create => "POST",
                TransactionMethod::Update { .. } => "PUT",
            };
            let mut request = json!({"method": method, "url": op.request_url()?});
            if let TransactionMethod::Update {
                if_match: Some(version),
            } = &op.method
            {
                request["ifMatch"] = Value::String(weak_etag(version));
            }

            let mut entry = json!({"resource": op.resource, "request": request});
            if let Some(full_url) = &op.full_url {
                entry["fullUrl"] = Value::String(full_url.clone());
            }
            entries.push(entry);
        }

        let bundle = json!({
            "resourceType": "Bundle",
            "type": "transaction",
            "entry": entries,
        });
        let url = self.url("");
        let context = format!("transaction of {} entries", ops.len());

        let reply = self
            .exchange(
                || {
                    self.client
                        .post(&url)
                        .header("Prefer", "return=representation")
                        .json(&bundle)
                },
                &context,
                None,
            )
            .await?;

        let results: Vec<TransactionResult> = reply
            .body
            .get("entry")
            .and_then(Value::as_array)
            .map(|items| items.iter().map(transaction_result).collect())
            .unwrap_or_default();

        if results.len() != ops.len() {
            return Err(StoreError::InvalidResponse(format!(
                "{context}: expected {} results, got {}",
                ops.len(),
                results.len()
            )));
        }
        Ok(results)
    }
}

fn resource_type_of(resource: &Value) -> StoreResult<&str> {
    resource
        .get("resourceType")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::Rejected("resource has no resourceType".to_string()))
}

fn weak_etag(version: &str) -> String {
    if version.starts_with("W/") {
        version.to_string()
    } else {
        format!("W/\"{version}\"")
    }
}

fn status_error(
    status: StatusCode,
    body: &str,
    context: &str,
    expected_version: Option<&str>,
) -> StoreError {
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => StoreError::NotFound(context.to_string()),
        StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => StoreError::VersionConflict {
            reference: context.to_string(),
            expected: expected_version.unwrap_or("current").to_string(),
            actual: "newer".to_string(),
        },
        s if s.is_server_error() => {
            StoreError::Connection(format!("{context}: server error {s}: {body}"))
        }
        s => StoreError::Rejected(format!("{context}: status {s}: {body}")),
    }
}

/// Build the stored identity from a reply body, or from its Location header
fn stored_from_reply(reply: HttpReply, sent: &Value) -> StoreResult<StoredResource> {
    let is_resource = reply
        .body
        .get("resourceType")
        .and_then(Value::as_str)
        .is_some_and(|t| t != "OperationOutcome");
    if is_resource {
        return StoredResource::from_resource(reply.body);
    }

    let target = reply
        .location
        .as_deref()
        .and_then(TargetRef::parse)
        .ok_or_else(|| {
            StoreError::InvalidResponse("reply has neither a resource nor a Location".to_string())
        })?;

    let mut resource = sent.clone();
    if let (Some(id), Value::Object(map)) = (target.id(), &mut resource) {
        map.insert("id".into(), Value::String(id.to_string()));
        if let Some(version) = target.version() {
            map.insert("meta".into(), json!({"versionId": version}));
        }
    }
    StoredResource::from_resource(resource)
}

fn transaction_result(entry: &Value) -> TransactionResult {
    let response = entry.get("response");
    let text = |field: &str| {
        response
            .and_then(|r| r.get(field))
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    TransactionResult {
        status: text("status").unwrap_or_default(),
        location: text("location"),
        resource: entry.get("resource").cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weak_etag() {
        assert_eq!(weak_etag("3"), "W/\"3\"");
        assert_eq!(weak_etag("W/\"3\""), "W/\"3\"");
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            status_error(StatusCode::NOT_FOUND, "", "read Patient/1", None),
            StoreError::NotFound(_)
        ));
        assert!(matches!(
            status_error(StatusCode::PRECONDITION_FAILED, "", "update List/1", Some("2")),
            StoreError::VersionConflict { .. }
        ));
        let server = status_error(StatusCode::BAD_GATEWAY, "down", "create Bundle", None);
        assert!(server.is_transient());
        let client = status_error(StatusCode::UNPROCESSABLE_ENTITY, "bad", "create Bundle", None);
        assert!(matches!(client, StoreError::Rejected(_)));
        assert!(!client.is_transient());
    }

    #[test]
    fn test_stored_from_location() {
        let reply = HttpReply {
            location: Some("http://fhir.local/fhir/Observation/12/_history/1".into()),
            body: Value::Null,
        };
        let stored =
            stored_from_reply(reply, &json!({"resourceType": "Observation", "status": "final"}))
                .unwrap();
        assert_eq!(stored.reference(), "Observation/12");
        assert_eq!(stored.version, "1");
        assert_eq!(stored.resource["status"], "final");
    }

    #[test]
    fn test_transaction_result_parsing() {
        let result = transaction_result(&json!({
            "response": {"status": "201 Created", "location": "Observation/5/_history/1"}
        }));
        assert_eq!(result.status, "201 Created");
        assert_eq!(result.assigned_target().unwrap().to_string(), "Observation/5/_history/1");
        assert!(result.resource.is_none());
    }
}
