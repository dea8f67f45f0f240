//! Upstream transports.
//!
//! Two transports reach a backend node:
//!
//! - [`HttpTransport`]: stateless, one POST per call against `url`
//! - [`WsTransport`]: one persistent, multiplexed connection against `ws_url` per client
//!   session, with request/response correlation and subscription relay
//!
//! Both implement [`UpstreamTransport`]. Only [`UpstreamTransport::send_upstream`] differs
//! between them; [`UpstreamTransport::send`] runs the admission filter first and is the
//! only entry point handlers use, so no transport can skip it.
//!
//! Upstream replies are relayed as the node sent them. Only the `id` fields are read, for
//! correlation and batch ordering.

pub mod context;
pub mod errors;
pub mod http;
pub mod http_client;
pub mod websocket;

pub use context::RequestContext;
pub use errors::UpstreamError;
pub use http::HttpTransport;
pub use http_client::HttpClient;
pub use websocket::{UpstreamEvent, WsTransport};

use crate::{
    filter,
    types::{JsonRpcError, JsonRpcRequest, RpcPayload},
    utils::create_id,
};
use async_trait::async_trait;
use serde_json::{json, Value};

#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    fn context(&self) -> &RequestContext;

    /// Delivers an already admitted payload to the backend and returns its reply untouched.
    async fn send_upstream(&self, request: &RpcPayload<JsonRpcRequest>) -> Result<Value, UpstreamError>;

    /// Filters and forwards a client payload.
    async fn send(&self, request: RpcPayload<JsonRpcRequest>) -> Value {
        filter::filter_request(self, request).await
    }

    /// Issues one internal call, bypassing admission, and unwraps its result.
    ///
    /// # Errors
    ///
    /// Returns the transport error, or [`UpstreamError::RpcError`] when the node answers
    /// with an error object.
    async fn call(&self, method: &str, params: Value) -> Result<Value, UpstreamError> {
        let request = RpcPayload::Single(JsonRpcRequest::new(method, Some(params), json!(create_id())));
        let Value::Object(mut reply) = self.send_upstream(&request).await? else {
            return Err(UpstreamError::InvalidResponse("expected a single reply object".to_string()));
        };

        match reply.remove("error").filter(|error| !error.is_null()) {
            Some(error) => {
                let error: JsonRpcError = serde_json::from_value(error)
                    .map_err(|e| UpstreamError::InvalidResponse(format!("bad error object: {e}")))?;
                Err(UpstreamError::RpcError(error.code, error.message))
            }
            None => Ok(reply.remove("result").unwrap_or(Value::Null)),
        }
    }

    /// Current head of the backend via `eth_blockNumber`.
    ///
    /// # Errors
    ///
    /// Fails when the call fails or the result is not a hex quantity.
    async fn get_block_number(&self) -> Result<u64, UpstreamError> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_quantity(&result)
            .ok_or_else(|| UpstreamError::InvalidResponse(format!("bad block number: {result}")))
    }

    /// Latest block header via `eth_getBlockByNumber("latest", false)`.
    ///
    /// # Errors
    ///
    /// Fails when the call fails.
    async fn get_block(&self) -> Result<Value, UpstreamError> {
        self.call("eth_getBlockByNumber", json!(["latest", false])).await
    }
}

/// Reads a hex quantity (`"0x1a"`) or a plain JSON number.
#[must_use]
pub fn parse_quantity(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s
            .strip_prefix("0x")
            .and_then(|hex| u64::from_str_radix(hex, 16).ok())
            .or_else(|| s.parse().ok()),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}
