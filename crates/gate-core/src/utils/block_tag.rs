//! Block tag normalization for range checks.
//!
//! Range-sensitive calls carry `fromBlock`/`toBlock` as numbers, `0x` hex strings,
//! decimal strings or named tags. Everything is reduced to a signed block height so the
//! filter can compare spans without caring about the spelling.

use serde_json::Value;
use std::num::IntErrorKind;

/// Named block tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    /// Genesis
    Earliest,
    /// The most recent block in the canonical chain
    Latest,
    /// A block in the pending state
    Pending,
    /// The most recent safe head block
    Safe,
    /// The most recent finalized block
    Finalized,
}

impl BlockTag {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "earliest" => Some(Self::Earliest),
            "latest" => Some(Self::Latest),
            "pending" => Some(Self::Pending),
            "safe" => Some(Self::Safe),
            "finalized" => Some(Self::Finalized),
            _ => None,
        }
    }
}

/// Parses a numeric block string: `0x` hex or plain decimal, surrounding whitespace ignored.
///
/// Hex digits carry no sign. Values beyond the `i128` range saturate.
fn parse_block_string(raw: &str) -> Option<i128> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0);
    }
    let parsed = match trimmed.strip_prefix("0x").or_else(|| trimmed.strip_prefix("0X")) {
        Some(hex) if hex.starts_with(['+', '-']) => return None,
        Some(hex) => i128::from_str_radix(hex, 16),
        None => trimmed.parse::<i128>(),
    };
    match parsed {
        Ok(height) => Some(height),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => Some(i128::MAX),
            IntErrorKind::NegOverflow => Some(i128::MIN),
            _ => None,
        },
    }
}

/// Normalizes a block tag to a height.
///
/// - numbers pass through
/// - a missing tag and `earliest` become `0`
/// - `latest`, `pending`, `safe` and `finalized` become `latest_block`
/// - other strings are parsed as hex or decimal
///
/// Returns `None` for values that cannot be read as a height; callers treat those as
/// unconstrained.
///
/// # Examples
/// ```
/// use gate_core::utils::normalize_block_tag;
/// use serde_json::json;
///
/// assert_eq!(normalize_block_tag(Some(&json!("latest")), 500), Some(500));
/// assert_eq!(normalize_block_tag(Some(&json!("0x10")), 500), Some(16));
/// assert_eq!(normalize_block_tag(None, 500), Some(0));
/// assert_eq!(normalize_block_tag(Some(&json!("soon")), 500), None);
/// ```
#[must_use]
pub fn normalize_block_tag(tag: Option<&Value>, latest_block: u64) -> Option<i128> {
    match tag {
        None | Some(Value::Null) => Some(0),
        Some(Value::Number(n)) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i128)),
        Some(Value::String(s)) => match BlockTag::from_name(s) {
            Some(BlockTag::Earliest) => Some(0),
            Some(BlockTag::Latest | BlockTag::Pending | BlockTag::Safe | BlockTag::Finalized) => {
                Some(i128::from(latest_block))
            }
            None => parse_block_string(s),
        },
        Some(_) => None,
    }
}
