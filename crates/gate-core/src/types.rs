//! JSON-RPC 2.0 protocol types shared by every transport.
//!
//! # Type Categories
//!
//! - [`JsonRpcRequest`], [`JsonRpcResponse`], [`JsonRpcError`]: wire conformance
//! - [`RpcPayload`]: a single call or a batch; upstream replies stay raw JSON
//! - [`codes`]: the error codes this proxy emits
//!
//! Inbound payloads go through [`parse_payload`], which enforces the request shape
//! (`jsonrpc` string, string-or-number `id`, string `method`) and the batch bounds
//! before anything reaches the admission filter.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::{borrow::Cow, sync::Arc};

/// JSON-RPC protocol version constant.
pub const JSONRPC_VERSION: &str = "2.0";

/// Pre-allocated `Cow` for the protocol version.
pub const JSONRPC_VERSION_COW: Cow<'static, str> = Cow::Borrowed(JSONRPC_VERSION);

/// Largest batch accepted from a client.
pub const MAX_BATCH_SIZE: usize = 100;

/// Error codes emitted by the proxy itself.
///
/// Codes returned by upstream nodes are relayed untouched and are not listed here.
pub mod codes {
    /// Malformed request or WebSocket frame.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unsupported method, invalid block params, duplicate id.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Internal fault inside the proxy.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Upstream transport failure.
    pub const UPSTREAM_ERROR: i32 = -32000;
    /// Rate or connection limit exceeded.
    pub const LIMIT_EXCEEDED: i32 = -32029;
}

/// JSON-RPC 2.0 request.
///
/// `id` is kept behind an `Arc` so rejections and correlation can copy it cheaply.
///
/// # Example
///
/// ```
/// use gate_core::types::JsonRpcRequest;
/// use serde_json::json;
///
/// let request = JsonRpcRequest::new("eth_blockNumber", None, json!(1));
/// assert_eq!(request.method, "eth_blockNumber");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: Cow<'static, str>,
    pub id: Arc<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Value) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, id: Arc::new(id), method: method.into(), params }
    }

    /// Stable string form of the id, distinguishing `1` from `"1"`.
    #[must_use]
    pub fn id_key(&self) -> String {
        self.id.to_string()
    }
}

/// JSON-RPC 2.0 response.
///
/// A `result` that is present but `null` survives a round trip: upstream answers such as
/// an unknown transaction receipt rely on it.
///
/// # Example
///
/// ```
/// use gate_core::types::JsonRpcResponse;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let ok = JsonRpcResponse::success(json!("0x10"), Arc::new(json!(1)));
/// assert!(ok.error.is_none());
///
/// let err = JsonRpcResponse::error(-32601, "Method not found", Arc::new(json!(1)));
/// assert!(err.result.is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: Cow<'static, str>,
    #[serde(default = "null_id")]
    pub id: Arc<Value>,
    #[serde(default, deserialize_with = "present_value", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

fn null_id() -> Arc<Value> {
    Arc::new(Value::Null)
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

impl JsonRpcResponse {
    #[must_use]
    pub fn success(result: Value, id: Arc<Value>) -> Self {
        Self { jsonrpc: JSONRPC_VERSION_COW, id, result: Some(result), error: None }
    }

    #[must_use]
    pub fn error(code: i32, message: impl Into<String>, id: Arc<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION_COW,
            id,
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
        }
    }

    /// Error response mirroring the version and id of `request`.
    #[must_use]
    pub fn error_for(request: &JsonRpcRequest, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: request.jsonrpc.clone(),
            id: Arc::clone(&request.id),
            result: None,
            error: Some(JsonRpcError { code, message: message.into(), data: None }),
        }
    }

    #[must_use]
    pub fn id_key(&self) -> String {
        self.id.to_string()
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A single JSON-RPC message or a batch of them.
///
/// Serializes untagged, so a batch is a bare JSON array on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RpcPayload<T> {
    Batch(Vec<T>),
    Single(T),
}

impl<T> RpcPayload<T> {
    #[must_use]
    pub fn is_batch(&self) -> bool {
        matches!(self, Self::Batch(_))
    }

    /// Number of calls carried by the payload.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Batch(items) => items.len(),
            Self::Single(_) => 1,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the calls regardless of shape.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            Self::Batch(items) => items.iter(),
            Self::Single(item) => std::slice::from_ref(item).iter(),
        }
    }

    /// Maps every item while keeping the single/batch shape.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> RpcPayload<U> {
        match self {
            Self::Batch(items) => RpcPayload::Batch(items.iter().map(f).collect()),
            Self::Single(item) => {
                let mut f = f;
                RpcPayload::Single(f(item))
            }
        }
    }
}

impl RpcPayload<JsonRpcRequest> {
    /// Distinct method names in first-seen order.
    #[must_use]
    pub fn methods(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for request in self.iter() {
            if !seen.contains(&request.method.as_str()) {
                seen.push(request.method.as_str());
            }
        }
        seen
    }

    /// Answers every call with the same error, echoing each id.
    #[must_use]
    pub fn reject(&self, code: i32, message: &str) -> RpcPayload<JsonRpcResponse> {
        self.map(|request| JsonRpcResponse::error_for(request, code, message))
    }
}

impl RpcPayload<JsonRpcResponse> {
    /// Wire form of a locally built response.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Standalone error response with id `0`, used when no request id can be trusted.
#[must_use]
pub fn new_error(code: i32, message: impl Into<String>) -> RpcPayload<JsonRpcResponse> {
    RpcPayload::Single(JsonRpcResponse::error(code, message, Arc::new(Value::from(0))))
}

/// Reasons an inbound payload is refused before admission.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty batch")]
    EmptyBatch,
    #[error("batch of {0} exceeds the limit of {MAX_BATCH_SIZE}")]
    BatchTooLarge(usize),
    #[error("request id must be a string or a number")]
    InvalidId,
    #[error("expected an object or an array")]
    InvalidShape,
}

/// Parses and validates a client payload.
///
/// # Errors
///
/// Returns [`PayloadError`] when the bytes are not JSON, an item does not have the request
/// shape, or a batch is empty or larger than [`MAX_BATCH_SIZE`].
pub fn parse_payload(bytes: &[u8]) -> Result<RpcPayload<JsonRpcRequest>, PayloadError> {
    let value: Value = serde_json::from_slice(bytes)?;
    let payload = match value {
        Value::Array(items) => {
            if items.is_empty() {
                return Err(PayloadError::EmptyBatch);
            }
            if items.len() > MAX_BATCH_SIZE {
                return Err(PayloadError::BatchTooLarge(items.len()));
            }
            let requests = items
                .into_iter()
                .map(serde_json::from_value::<JsonRpcRequest>)
                .collect::<Result<Vec<_>, _>>()?;
            RpcPayload::Batch(requests)
        }
        Value::Object(_) => RpcPayload::Single(serde_json::from_value(value)?),
        _ => return Err(PayloadError::InvalidShape),
    };

    if payload.iter().any(|request| !(request.id.is_string() || request.id.is_number())) {
        return Err(PayloadError::InvalidId);
    }

    Ok(payload)
}
