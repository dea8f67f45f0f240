use crate::{
    authority::{AuthorityError, StateAuthority},
    config::BackendConfig,
    filter::MethodPolicy,
    utils::hash_origin,
};
use std::sync::{Arc, OnceLock};

/// Everything the admission filter needs to judge one client's calls.
///
/// HTTP handlers build one per request; WebSocket sessions build one per connection and
/// reuse it for every frame. Hooks are optional: a context without an authority neither
/// rate limits nor range checks.
pub struct RequestContext {
    backend: Arc<BackendConfig>,
    origin: Option<String>,
    origin_key: OnceLock<String>,
    max_block_range: Option<u64>,
    authority: Option<Arc<dyn StateAuthority>>,
    policy: Arc<MethodPolicy>,
    supports_subscribe: bool,
}

impl RequestContext {
    #[must_use]
    pub fn new(backend: Arc<BackendConfig>) -> Self {
        Self {
            backend,
            origin: None,
            origin_key: OnceLock::new(),
            max_block_range: None,
            authority: None,
            policy: Arc::new(MethodPolicy::default()),
            supports_subscribe: false,
        }
    }

    /// Sets the raw client address. Empty strings count as no origin.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        self.origin = (!origin.is_empty()).then_some(origin);
        self
    }

    #[must_use]
    pub fn with_authority(mut self, authority: Arc<dyn StateAuthority>) -> Self {
        self.authority = Some(authority);
        self
    }

    #[must_use]
    pub fn with_max_block_range(mut self, max_block_range: Option<u64>) -> Self {
        self.max_block_range = max_block_range;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<MethodPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Marks the context as belonging to a persistent connection.
    #[must_use]
    pub fn with_subscriptions(mut self) -> Self {
        self.supports_subscribe = true;
        self
    }

    #[must_use]
    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    #[must_use]
    pub fn chain(&self) -> &str {
        &self.backend.chain
    }

    #[must_use]
    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    /// Hashed origin, computed on first use.
    #[must_use]
    pub fn origin_key(&self) -> Option<&str> {
        self.origin
            .as_deref()
            .map(|origin| self.origin_key.get_or_init(|| hash_origin(origin)).as_str())
    }

    #[must_use]
    pub fn max_block_range(&self) -> Option<u64> {
        self.max_block_range
    }

    #[must_use]
    pub fn authority(&self) -> Option<&Arc<dyn StateAuthority>> {
        self.authority.as_ref()
    }

    #[must_use]
    pub fn policy(&self) -> &MethodPolicy {
        &self.policy
    }

    #[must_use]
    pub fn supports_subscribe(&self) -> bool {
        self.supports_subscribe
    }

    /// Last block the authority knows for this chain; `0` when unknown or unavailable.
    ///
    /// # Errors
    ///
    /// Propagates authority failures such as an IPC timeout.
    pub async fn saved_block_number(&self) -> Result<u64, AuthorityError> {
        match &self.authority {
            Some(authority) => Ok(authority.block_number(self.chain()).await?.unwrap_or(0)),
            None => Ok(0),
        }
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("chain", &self.backend.chain)
            .field("origin", &self.origin)
            .field("max_block_range", &self.max_block_range)
            .field("has_authority", &self.authority.is_some())
            .field("supports_subscribe", &self.supports_subscribe)
            .finish_non_exhaustive()
    }
}
