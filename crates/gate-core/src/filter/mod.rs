//! Admission filter.
//!
//! Every call, whatever transport carries it, passes through [`filter_request`] before it
//! is forwarded. Checks run in a fixed order and the first failure answers the whole
//! payload:
//!
//! ```text
//! batch:  unique ids ─► rate (len units) ─► methods ─► block range ─► forward
//! single:               rate (1 unit)    ─► methods ─► block range ─► forward
//! ```
//!
//! Faults inside the filter itself never escape: they become a single
//! `-32603 Unknown filter error` response. Admitted payloads are answered with the
//! upstream reply exactly as the node sent it.

pub mod block_range;
pub mod methods;

pub use block_range::exceeds_block_range;
pub use methods::MethodPolicy;

use crate::{
    authority::AuthorityError,
    types::{codes, new_error, JsonRpcRequest, JsonRpcResponse, RpcPayload},
    upstream::{RequestContext, UpstreamTransport},
};
use ahash::AHashSet;
use serde_json::Value;
use thiserror::Error;

pub const DUPLICATE_IDS: &str = "Batch should have unique ids";
pub const RATE_LIMITED: &str = "Rate limited";
pub const UNSUPPORTED_METHOD: &str = "Request contains unsupported method";
pub const INVALID_BLOCK_PARAMS: &str = "Request contains invalid block params";
pub const UNKNOWN_FILTER_ERROR: &str = "Unknown filter error";

/// Faults raised while evaluating a payload.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("malformed params for {0}")]
    MalformedParams(String),
    #[error(transparent)]
    Authority(#[from] AuthorityError),
}

/// Outcome of the admission checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Admit,
    Reject(RpcPayload<JsonRpcResponse>),
}

/// Runs the admission checks for `request` without forwarding it.
///
/// # Errors
///
/// Returns [`FilterError`] when the rate hook or block lookup fails, or when a
/// range-sensitive call carries params that are not an array of filter objects.
pub async fn admit(
    context: &RequestContext,
    request: &RpcPayload<JsonRpcRequest>,
) -> Result<Admission, FilterError> {
    if let RpcPayload::Batch(items) = request {
        let mut ids = AHashSet::with_capacity(items.len());
        if !items.iter().all(|item| ids.insert(item.id_key())) {
            tracing::debug!(chain = context.chain(), size = items.len(), "batch rejected: duplicate ids");
            return Ok(Admission::Reject(request.reject(codes::METHOD_NOT_FOUND, DUPLICATE_IDS)));
        }
    }

    if let (Some(origin), Some(authority)) = (context.origin_key(), context.authority()) {
        let score = request.len() as u64;
        if !authority.add_count(origin, score).await? {
            tracing::debug!(
                chain = context.chain(),
                origin = context.origin().unwrap_or_default(),
                score,
                "request rate limited"
            );
            return Ok(Admission::Reject(request.reject(codes::LIMIT_EXCEEDED, RATE_LIMITED)));
        }
    }

    let methods = request.methods();
    let policy = context.policy();
    if let Some(method) = methods
        .iter()
        .find(|method| !policy.is_allowed(method, context.backend(), context.supports_subscribe()))
    {
        tracing::debug!(
            chain = context.chain(),
            origin = context.origin().unwrap_or_default(),
            method = *method,
            "request rejected: unsupported method"
        );
        return Ok(Admission::Reject(request.reject(codes::METHOD_NOT_FOUND, UNSUPPORTED_METHOD)));
    }

    if methods.iter().any(|method| policy.is_range_sensitive(method)) && exceeds_range(context, request).await? {
        tracing::debug!(
            chain = context.chain(),
            origin = context.origin().unwrap_or_default(),
            "request rejected: block range too wide"
        );
        return Ok(Admission::Reject(request.reject(codes::METHOD_NOT_FOUND, INVALID_BLOCK_PARAMS)));
    }

    Ok(Admission::Admit)
}

async fn exceeds_range(
    context: &RequestContext,
    request: &RpcPayload<JsonRpcRequest>,
) -> Result<bool, FilterError> {
    let Some(max_range) = context.max_block_range() else {
        return Ok(false);
    };

    let latest_block = context.saved_block_number().await?;
    if latest_block == 0 {
        return Ok(false);
    }

    let policy = context.policy();
    for call in request.iter().filter(|call| policy.is_range_sensitive(&call.method)) {
        if exceeds_block_range(call, latest_block, max_range)? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Filters `request` and forwards it through `transport` when admitted.
///
/// Always produces a well-formed response: rejections, upstream failures and internal
/// faults are all turned into JSON-RPC errors.
pub async fn filter_request<T>(transport: &T, request: RpcPayload<JsonRpcRequest>) -> Value
where
    T: UpstreamTransport + ?Sized,
{
    let context = transport.context();
    let local = match admit(context, &request).await {
        Ok(Admission::Reject(response)) => response,
        Ok(Admission::Admit) => match transport.send_upstream(&request).await {
            Ok(reply) => return reply,
            Err(e) => {
                tracing::warn!(
                    chain = context.chain(),
                    methods = ?request.methods(),
                    error = %e,
                    "upstream request failed"
                );
                e.to_response(&request)
            }
        },
        Err(e) => {
            tracing::error!(chain = context.chain(), error = %e, "filter failed");
            new_error(codes::INTERNAL_ERROR, UNKNOWN_FILTER_ERROR)
        }
    };
    local.to_value()
}
