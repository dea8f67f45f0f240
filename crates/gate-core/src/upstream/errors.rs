use crate::types::{codes, JsonRpcError, JsonRpcRequest, JsonRpcResponse, RpcPayload};
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur when talking to an upstream node.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    /// Call exceeded the backend timeout.
    #[error("Request timeout")]
    Timeout,

    /// Could not reach the upstream endpoint.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The upstream connection went away while the call was outstanding.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Non-2xx HTTP status.
    #[error("HTTP error: {0}")]
    HttpError(u16),

    /// JSON-RPC error returned by the upstream node.
    #[error("RPC error {0}: {1}")]
    RpcError(i32, String),

    /// The backend has no endpoint for this transport.
    #[error("Backend {0} has no WebSocket endpoint")]
    Unavailable(String),

    /// Another call with the same correlation id is still waiting for its reply.
    #[error("Duplicate request id: {0}")]
    DuplicateId(String),

    /// Response could not be parsed or was malformed.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UpstreamError {
    /// Converts a transport failure into the response the client receives.
    ///
    /// Every call in `request` gets the same error, with the affected methods listed in
    /// `error.data.methods`.
    #[must_use]
    pub fn to_response(&self, request: &RpcPayload<JsonRpcRequest>) -> RpcPayload<JsonRpcResponse> {
        let (code, message) = match self {
            Self::DuplicateId(_) => {
                (codes::METHOD_NOT_FOUND, "Request contains duplicated id".to_string())
            }
            Self::HttpError(status) => {
                (codes::UPSTREAM_ERROR, format!("Upstream request returned {status}"))
            }
            Self::Timeout => (codes::UPSTREAM_ERROR, "Upstream request timed out".to_string()),
            other => (codes::UPSTREAM_ERROR, format!("Upstream request failed: {other}")),
        };

        let data = (code == codes::UPSTREAM_ERROR)
            .then(|| serde_json::json!({ "methods": request.methods() }));

        request.map(|call| JsonRpcResponse {
            jsonrpc: call.jsonrpc.clone(),
            id: Arc::clone(&call.id),
            result: None,
            error: Some(JsonRpcError { code, message: message.clone(), data: data.clone() }),
        })
    }
}
