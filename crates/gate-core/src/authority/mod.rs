//! Shared rate, session and block-number authority.
//!
//! All limit state lives in one place: the supervising process. Request handlers reach it
//! through the [`StateAuthority`] seam, either directly ([`Authority`], single-process
//! deployments and tests) or over IPC ([`crate::ipc::IpcClient`], worker processes).

pub mod rate_limiter;

pub use rate_limiter::{RateLimiter, WindowStats};

use crate::{
    cache::BlockCache,
    ipc::{MessageResult, WorkerRequest},
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failures reaching the authority.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthorityError {
    #[error("authority did not reply within {0:?}")]
    Timeout(std::time::Duration),
    #[error("authority channel closed")]
    ChannelClosed,
    #[error("unexpected authority reply: {0}")]
    UnexpectedReply(String),
}

/// Operations request handlers need from the authority.
#[async_trait]
pub trait StateAuthority: Send + Sync {
    /// Consumes `score` units of `key`'s budget. `false` means rate limited.
    async fn add_count(&self, key: &str, score: u64) -> Result<bool, AuthorityError>;

    /// Registers a live session. `false` means the origin holds too many.
    async fn add_session(&self, key: &str, session: &str) -> Result<bool, AuthorityError>;

    async fn remove_session(&self, key: &str, session: &str) -> Result<bool, AuthorityError>;

    /// Last known block of `chain`, if any.
    async fn block_number(&self, chain: &str) -> Result<Option<u64>, AuthorityError>;
}

/// The authority state itself: rate limiter plus block cache.
pub struct Authority {
    rate_limiter: Arc<RateLimiter>,
    block_cache: Arc<BlockCache>,
}

impl Authority {
    #[must_use]
    pub fn new(rate_limiter: Arc<RateLimiter>, block_cache: Arc<BlockCache>) -> Self {
        Self { rate_limiter, block_cache }
    }

    #[must_use]
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    #[must_use]
    pub fn block_cache(&self) -> &Arc<BlockCache> {
        &self.block_cache
    }

    /// Answers one worker message.
    #[must_use]
    pub fn handle(&self, request: &WorkerRequest) -> MessageResult {
        match request {
            WorkerRequest::AddCount { key, score } => {
                MessageResult::Flag(self.rate_limiter.add_count(key, *score))
            }
            WorkerRequest::AddSession { key, session } => {
                MessageResult::Flag(self.rate_limiter.add_session(key, session))
            }
            WorkerRequest::RemoveSession { key, session } => {
                MessageResult::Flag(self.rate_limiter.remove_session(key, session))
            }
            WorkerRequest::GetBlockNumber { chain } => {
                MessageResult::BlockNumber(self.block_cache.get(chain))
            }
        }
    }
}

#[async_trait]
impl StateAuthority for Authority {
    async fn add_count(&self, key: &str, score: u64) -> Result<bool, AuthorityError> {
        Ok(self.rate_limiter.add_count(key, score))
    }

    async fn add_session(&self, key: &str, session: &str) -> Result<bool, AuthorityError> {
        Ok(self.rate_limiter.add_session(key, session))
    }

    async fn remove_session(&self, key: &str, session: &str) -> Result<bool, AuthorityError> {
        Ok(self.rate_limiter.remove_session(key, session))
    }

    async fn block_number(&self, chain: &str) -> Result<Option<u64>, AuthorityError> {
        Ok(self.block_cache.get(chain))
    }
}
