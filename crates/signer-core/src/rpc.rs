//! JSON-RPC 2.0 envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Error;

/// The protocol version written into every response.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid method parameter(s).
pub const INVALID_PARAMS: i32 = -32602;

/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;

/// A JSON-RPC request.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcRequest {
    /// The protocol version, normally `"2.0"`.
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// The request id, echoed in the response.
    #[serde(default)]
    pub id: Option<Value>,
    /// The method name.
    pub method: String,
    /// Positional parameters.
    #[serde(default)]
    pub params: Vec<Value>,
}

impl JsonRpcRequest {
    /// Creates a request with no id.
    #[must_use]
    pub fn new(method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            jsonrpc: Some(JSONRPC_VERSION.to_string()),
            id: None,
            method: method.into(),
            params,
        }
    }

    /// Sets the request id.
    #[must_use]
    pub fn with_id(mut self, id: Value) -> Self {
        self.id = Some(id);
        self
    }

    /// Returns the parameter at `index`, if present and not `null`.
    #[must_use]
    pub fn param(&self, index: usize) -> Option<&Value> {
        self.params.get(index).filter(|value| !value.is_null())
    }
}

/// A JSON-RPC response.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcResponse {
    /// The protocol version.
    pub jsonrpc: String,
    /// The id of the request being answered.
    #[serde(default)]
    pub id: Option<Value>,
    /// The result, on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// The error, on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Creates a success response.
    #[must_use]
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Creates an error response.
    #[must_use]
    pub fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// A JSON-RPC error object.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// The numeric error code.
    pub code: i32,
    /// A human-readable description.
    pub message: String,
    /// Structured detail. Errors raised by the signer put their machine code
    /// here as `{"code": "..."}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Creates an error object.
    #[must_use]
    pub fn new(code: i32, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }
}

impl From<&Error> for JsonRpcError {
    fn from(error: &Error) -> Self {
        let code = if error.is_input_error() {
            INVALID_PARAMS
        } else {
            INTERNAL_ERROR
        };
        Self::new(code, error.to_string(), Some(json!({ "code": error.code() })))
    }
}

impl From<Error> for JsonRpcError {
    fn from(error: Error) -> Self {
        Self::from(&error)
    }
}
