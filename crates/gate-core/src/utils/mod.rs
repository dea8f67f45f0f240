//! Small helpers shared across modules.

pub mod block_tag;
pub mod origin;

pub use block_tag::normalize_block_tag;
pub use origin::{create_id, hash_origin};
