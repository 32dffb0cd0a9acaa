//! API response envelope.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::operation::Operation;

/// Response type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    Sync,
    Async,
    Error,
}

/// Envelope wrapped around every API response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(rename = "type")]
    pub response_type: ResponseType,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub status_code: u16,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<HashMap<String, Vec<String>>>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub error_code: u16,
}

fn is_zero(v: &u16) -> bool {
    *v == 0
}

impl ApiResponse {
    /// Synchronous success carrying `metadata`.
    pub fn sync(metadata: serde_json::Value) -> Self {
        Self {
            response_type: ResponseType::Sync,
            status: "Success".to_string(),
            status_code: 200,
            metadata,
            operation: String::new(),
            resources: None,
            error: String::new(),
            error_code: 0,
        }
    }

    /// Synchronous success with no payload.
    pub fn empty_sync() -> Self {
        Self::sync(serde_json::json!({}))
    }

    /// Operation created.
    pub fn async_op(op: &Operation) -> Self {
        Self {
            response_type: ResponseType::Async,
            status: "Operation created".to_string(),
            status_code: 100,
            metadata: op.metadata.clone(),
            operation: op.url(),
            resources: Some(op.resources.clone()),
            error: String::new(),
            error_code: 0,
        }
    }

    /// Error envelope.
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            response_type: ResponseType::Error,
            status: String::new(),
            status_code: 0,
            metadata: serde_json::Value::Null,
            operation: String::new(),
            resources: None,
            error: message.into(),
            error_code: code,
        }
    }
}
