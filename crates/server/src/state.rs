use axum::{body::Bytes, extract::ws::Message};
use dashmap::DashMap;
use gate_core::{
    authority::StateAuthority,
    config::{AppConfig, BackendConfig, BackendGroups},
    filter::MethodPolicy,
    upstream::{HttpClient, RequestContext},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::{mpsc, Notify};

/// Open client sockets keyed by session id.
pub type SocketRegistry = Arc<DashMap<String, Arc<TrackedSocket>>>;

/// Shared state handed to every handler.
pub struct ProxyState {
    pub config: Arc<AppConfig>,
    pub groups: BackendGroups,
    pub authority: Arc<dyn StateAuthority>,
    pub client: HttpClient,
    pub policy: Arc<MethodPolicy>,
    pub sockets: SocketRegistry,
}

impl ProxyState {
    #[must_use]
    pub fn new(config: Arc<AppConfig>, authority: Arc<dyn StateAuthority>, client: HttpClient) -> Self {
        let groups = config.backend_groups();
        let policy = Arc::new(MethodPolicy::with_extra_methods(config.methods.allow.iter().cloned()));
        Self { config, groups, authority, client, policy, sockets: Arc::new(DashMap::new()) }
    }

    /// Backend that serves `chain`, the first one configured for it.
    #[must_use]
    pub fn backend(&self, chain: &str) -> Option<Arc<BackendConfig>> {
        self.groups.primary(chain).cloned()
    }

    /// Admission context for one client of `backend`.
    #[must_use]
    pub fn context(&self, backend: Arc<BackendConfig>, origin: &str) -> RequestContext {
        RequestContext::new(backend)
            .with_origin(origin)
            .with_authority(Arc::clone(&self.authority))
            .with_max_block_range(self.config.blocks.max_block_range)
            .with_policy(Arc::clone(&self.policy))
    }
}

/// Liveness handle for one client socket.
///
/// The sweep clears `alive` and pings; a pong sets it again. A socket still cleared at the
/// next sweep is told to terminate.
pub struct TrackedSocket {
    alive: AtomicBool,
    outbound: mpsc::UnboundedSender<Message>,
    terminate: Notify,
}

impl TrackedSocket {
    #[must_use]
    pub fn new(outbound: mpsc::UnboundedSender<Message>) -> Self {
        Self { alive: AtomicBool::new(true), outbound, terminate: Notify::new() }
    }

    pub fn mark_alive(&self) {
        self.alive.store(true, Ordering::Relaxed);
    }

    /// Clears the liveness flag, returning whether it was set.
    pub fn take_alive(&self) -> bool {
        self.alive.swap(false, Ordering::Relaxed)
    }

    /// Queues a ping; `false` once the session has stopped writing.
    pub fn ping(&self) -> bool {
        self.outbound.send(Message::Ping(Bytes::new())).is_ok()
    }

    pub fn terminate(&self) {
        self.terminate.notify_one();
    }

    /// Resolves once [`TrackedSocket::terminate`] has been called.
    pub async fn terminated(&self) {
        self.terminate.notified().await;
    }
}
