//! Protocol request/response framing
//!
//! All three protocol servers (memory, context, tools) share one framing
//! contract: a request carries `{method, params}`; a response carries
//! either `{result}` or `{error: {kind, message}}`. Frames travel as
//! newline-delimited JSON.

use crate::errors::{AgentError, AgentErrorExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single protocol request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
    /// Client-chosen correlation id, echoed back in the response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl Request {
    /// Create a new request
    pub fn new(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: HashMap::new(),
            id: None,
        }
    }

    /// Add a parameter
    pub fn with_param(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Get a required string parameter
    pub fn param_str(&self, key: &str) -> Result<String, AgentError> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
            .ok_or_else(|| AgentError::MissingParameter(key.to_string()))
    }

    /// Get an optional string parameter
    pub fn param_str_opt(&self, key: &str) -> Option<String> {
        self.params
            .get(key)
            .and_then(|v| v.as_str())
            .map(String::from)
    }

    /// Get an optional u64 parameter
    pub fn param_u64_opt(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| v.as_u64())
    }

    /// Get a required raw JSON parameter
    pub fn param_value(&self, key: &str) -> Result<serde_json::Value, AgentError> {
        self.params
            .get(key)
            .cloned()
            .ok_or_else(|| AgentError::MissingParameter(key.to_string()))
    }

    /// Get an optional string-array parameter
    pub fn param_str_vec_opt(&self, key: &str) -> Option<Vec<String>> {
        self.params.get(key).and_then(|v| v.as_array()).map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
    }
}

/// Structured error body carried in failed responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// A single protocol response: exactly one of `result` / `error` is set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<serde_json::Value>,
}

impl Response {
    /// Build a success response
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            result: Some(result),
            error: None,
            id: None,
        }
    }

    /// Build an error response from an agent error
    pub fn from_error(err: &AgentError) -> Self {
        Self {
            result: None,
            error: Some(ErrorBody {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
            id: None,
        }
    }

    /// Build an error response from a kind tag and message
    pub fn error(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(ErrorBody {
                kind: kind.into(),
                message: message.into(),
            }),
            id: None,
        }
    }

    /// Attach the correlation id from a request
    pub fn with_id(mut self, id: Option<serde_json::Value>) -> Self {
        self.id = id;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_some()
    }
}
