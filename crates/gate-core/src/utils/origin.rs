//! Client identity helpers.
//!
//! Origins are never stored raw: limits and session registries key on a short digest of
//! the client address.

use sha2::{Digest, Sha256};

/// Length of an origin hash including the `0x` prefix.
pub const ORIGIN_HASH_LEN: usize = 18;

/// Hashes a client address into a `0x` prefixed, 16 hex digit key.
///
/// # Example
///
/// ```
/// use gate_core::utils::hash_origin;
///
/// let key = hash_origin("203.0.113.7");
/// assert_eq!(key.len(), 18);
/// assert!(key.starts_with("0x"));
/// assert_eq!(key, hash_origin("203.0.113.7"));
/// ```
#[must_use]
pub fn hash_origin(origin: &str) -> String {
    let digest = Sha256::digest(origin.as_bytes());
    let mut key = String::with_capacity(ORIGIN_HASH_LEN);
    key.push_str("0x");
    key.push_str(&hex::encode(&digest[..(ORIGIN_HASH_LEN - 2) / 2]));
    key
}

/// Generates a fresh random identifier for sessions and IPC messages.
#[must_use]
pub fn create_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
