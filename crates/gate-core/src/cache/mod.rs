//! Last-known block numbers per chain.

pub mod block_cache;

pub use block_cache::BlockCache;
