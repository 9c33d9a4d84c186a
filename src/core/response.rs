//! Response envelopes
//!
//! Every submission gets a message Bundle back, success or not. Failure detail
//! stays in the logs; the envelope only carries the response code.

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

const PROCESS_MESSAGE: &str = "$process-message";

/// `MessageHeader.response.code`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Ok,
    FatalError,
}

impl ResponseCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseCode::Ok => "ok",
            ResponseCode::FatalError => "fatal-error",
        }
    }
}

/// Builds response envelopes addressed back to the submitting source
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    event: String,
    server_base: String,
}

impl ResponseBuilder {
    /// `server_base` is the public base URL the response claims to come from
    pub fn new(event: impl Into<String>, server_base: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            server_base: server_base.into(),
        }
    }

    pub fn success(&self, destination: Option<&str>, request_id: Option<&str>) -> Value {
        self.build(ResponseCode::Ok, destination, request_id)
    }

    pub fn failure(&self, destination: Option<&str>, request_id: Option<&str>) -> Value {
        self.build(ResponseCode::FatalError, destination, request_id)
    }

    fn build(&self, code: ResponseCode, destination: Option<&str>, request_id: Option<&str>) -> Value {
        let mut response = json!({"code": code.as_str()});
        if let Some(id) = request_id {
            response["identifier"] = json!(id);
        }

        let mut header = json!({
            "resourceType": "MessageHeader",
            "eventUri": self.event,
            "source": {"endpoint": self.source_endpoint()},
            "response": response
        });
        if let Some(endpoint) = destination {
            header["destination"] = json!([{"endpoint": endpoint}]);
        }

        json!({
            "resourceType": "Bundle",
            "id": Uuid::new_v4().to_string(),
            "type": "message",
            "timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "entry": [{"resource": header}]
        })
    }

    fn source_endpoint(&self) -> String {
        format!("{}/{PROCESS_MESSAGE}", self.server_base.trim_end_matches('/'))
    }
}

/// Response code of an envelope built by [`ResponseBuilder`]
pub fn response_code(envelope: &Value) -> Option<&str> {
    envelope
        .pointer("/entry/0/resource/response/code")
        .and_then(Value::as_str)
}
