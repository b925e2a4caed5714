//! A2A error codes, the JSON-RPC error object and the crate's typed errors.
//!
//! Error codes follow JSON-RPC 2.0 conventions:
//! - -32700 to -32600: Standard JSON-RPC errors
//! - -32099 to -32000: Server errors (A2A-specific)

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A2A protocol error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum A2AErrorCode {
    /// Invalid JSON was received by the server.
    JsonParseError = -32700,
    /// The JSON sent is not a valid Request object.
    InvalidRequest = -32600,
    /// The method does not exist / is not available.
    MethodNotFound = -32601,
    /// Invalid method parameter(s).
    InvalidParams = -32602,
    /// Internal JSON-RPC error.
    InternalError = -32603,
    /// The specified task was not found.
    TaskNotFound = -32001,
}

impl A2AErrorCode {
    /// Get the default error message for this code.
    pub fn default_message(&self) -> &'static str {
        match self {
            Self::JsonParseError => "Parse error",
            Self::InvalidRequest => "Invalid Request",
            Self::MethodNotFound => "Method not found",
            Self::InvalidParams => "Invalid params",
            Self::InternalError => "Internal error",
            Self::TaskNotFound => "Task not found",
        }
    }
}

/// JSON-RPC error object: `{code, message, data?}`.
#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl RpcError {
    /// An error carrying the code's default message.
    pub fn from_code(code: A2AErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    pub fn new(code: A2AErrorCode, message: impl Into<String>) -> Self {
        Self {
            code: code as i32,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

// ---------------------------------------------------------------------------
// Inbound validation
// ---------------------------------------------------------------------------

/// One invalid field in an inbound envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    /// Path to the field, e.g. `params -> message -> parts`.
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// A malformed inbound request. Never reaches the task store.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Request body is not valid JSON: {0}")]
    Parse(String),

    #[error("Invalid JSON-RPC request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported A2A method: {0}")]
    MethodNotFound(String),

    #[error("Validation failed")]
    InvalidParams(Vec<FieldError>),
}

impl ValidationError {
    pub fn code(&self) -> A2AErrorCode {
        match self {
            Self::Parse(_) => A2AErrorCode::JsonParseError,
            Self::InvalidRequest(_) => A2AErrorCode::InvalidRequest,
            Self::MethodNotFound(_) => A2AErrorCode::MethodNotFound,
            Self::InvalidParams(_) => A2AErrorCode::InvalidParams,
        }
    }

    /// Convert into the JSON-RPC error object returned to the client.
    pub fn to_rpc_error(&self) -> RpcError {
        let error = RpcError::new(self.code(), self.to_string());
        match self {
            Self::InvalidParams(fields) => {
                error.with_data(serde_json::to_value(fields).unwrap_or(Value::Null))
            }
            _ => error,
        }
    }
}

// ---------------------------------------------------------------------------
// Component errors
// ---------------------------------------------------------------------------

/// Failures inside a single connector call. Always folded into an
/// [`Outcome`](crate::a2a::client::Outcome) before leaving the connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("agent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response envelope: {0}")]
    Decode(String),

    #[error("agent returned RPC error {0}")]
    Remote(RpcError),

    #[error("agent task {task_id} has no agent reply")]
    NoReply { task_id: String },
}

/// Failures while resolving the registry. Never escapes discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("cannot read registry {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse registry {path}: {message}")]
    Parse { path: String, message: String },

    #[error("cannot fetch agent card from {url}: {message}")]
    Fetch { url: String, message: String },
}

/// Failures reported by a decision policy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PolicyError {
    #[error("no agents are available")]
    NoAgents,

    #[error("decision policy failed: {0}")]
    Failed(String),
}

/// Task store lookups.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TaskStoreError {
    #[error("task {0} not found")]
    NotFound(String),
}

impl TaskStoreError {
    pub fn to_rpc_error(&self) -> RpcError {
        match self {
            Self::NotFound(id) => RpcError::new(A2AErrorCode::TaskNotFound, self.to_string())
                .with_data(Value::String(id.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_params_carries_field_detail() {
        let err = ValidationError::InvalidParams(vec![FieldError::new(
            "params -> message -> parts",
            "must contain at least one part",
        )]);
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, -32602);
        assert_eq!(rpc.message, "Validation failed");
        let data = rpc.data.unwrap();
        assert_eq!(data[0]["field"], "params -> message -> parts");
    }

    #[test]
    fn test_method_not_found_code() {
        let err = ValidationError::MethodNotFound("tasks/cancel".into());
        let rpc = err.to_rpc_error();
        assert_eq!(rpc.code, A2AErrorCode::MethodNotFound as i32);
        assert!(rpc.message.contains("tasks/cancel"));
        assert!(rpc.data.is_none());
    }

    #[test]
    fn test_task_not_found_rpc_error() {
        let rpc = TaskStoreError::NotFound("t-9".into()).to_rpc_error();
        assert_eq!(rpc.code, -32001);
        assert_eq!(rpc.data, Some(Value::String("t-9".into())));
    }

    #[test]
    fn test_rpc_error_display() {
        let rpc = RpcError::from_code(A2AErrorCode::InternalError);
        assert_eq!(rpc.to_string(), "[-32603] Internal error");
    }
}
