//! Block span checks for `eth_getLogs` style calls.

use super::FilterError;
use crate::{types::JsonRpcRequest, utils::normalize_block_tag};
use serde_json::{Map, Value};

/// Whether any filter object in `request` spans more than `max_range` blocks.
///
/// Entries pinned to a `blockHash` are exempt, as are entries whose tags cannot be read
/// as heights. A span too wide to represent counts as exceeding.
///
/// # Errors
///
/// Returns [`FilterError::MalformedParams`] when `params` is not an array or holds an
/// entry that is not a filter object.
pub fn exceeds_block_range(
    request: &JsonRpcRequest,
    latest_block: u64,
    max_range: u64,
) -> Result<bool, FilterError> {
    let Some(Value::Array(entries)) = request.params.as_ref() else {
        return Err(FilterError::MalformedParams(request.method.clone()));
    };

    for entry in entries {
        let Some(filter) = entry.as_object() else {
            return Err(FilterError::MalformedParams(request.method.clone()));
        };
        if filter_exceeds(filter, latest_block, max_range) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn filter_exceeds(filter: &Map<String, Value>, latest_block: u64, max_range: u64) -> bool {
    if filter.get("blockHash").is_some_and(|hash| !hash.is_null()) {
        return false;
    }

    let from = normalize_block_tag(filter.get("fromBlock"), latest_block);
    let to = normalize_block_tag(filter.get("toBlock"), latest_block);

    match (from, to) {
        (Some(from), Some(to)) => to.checked_sub(from).map_or(to > from, |span| span > i128::from(max_range)),
        _ => false,
    }
}
