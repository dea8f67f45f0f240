use crate::{
    config::BackendGroups,
    upstream::{HttpClient, HttpTransport, RequestContext, UpstreamTransport},
};
use dashmap::DashMap;
use futures::future::join_all;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};

/// Block height of every chain's primary backend, refreshed on an interval.
///
/// A chain that has never answered is absent; readers treat that as unknown.
pub struct BlockCache {
    blocks: DashMap<String, u64>,
    groups: BackendGroups,
    client: HttpClient,
    ready: watch::Sender<bool>,
}

impl BlockCache {
    #[must_use]
    pub fn new(groups: BackendGroups, client: HttpClient) -> Self {
        let (ready, _) = watch::channel(false);
        Self { blocks: DashMap::new(), groups, client, ready }
    }

    #[must_use]
    pub fn get(&self, chain: &str) -> Option<u64> {
        self.blocks.get(chain).map(|entry| *entry)
    }

    pub fn set(&self, chain: &str, block: u64) {
        self.blocks.insert(chain.to_string(), block);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Queries every primary backend concurrently. Failed chains keep their previous value.
    pub async fn refresh(&self) {
        let lookups = self.groups.primaries().map(|backend| {
            let transport =
                HttpTransport::new(RequestContext::new(Arc::clone(backend)), self.client.clone());
            async move { (backend.chain.clone(), transport.get_block_number().await) }
        });

        for (chain, result) in join_all(lookups).await {
            match result {
                Ok(block) => {
                    tracing::trace!(chain = %chain, block, "block number refreshed");
                    self.set(&chain, block);
                }
                Err(e) => {
                    tracing::warn!(chain = %chain, error = %e, "block number refresh failed");
                }
            }
        }

        self.ready.send_replace(true);
    }

    /// Resolves once the first refresh cycle has completed.
    pub async fn wait_ready(&self) {
        let mut ready = self.ready.subscribe();
        let _ = ready.wait_for(|done| *done).await;
    }

    /// Refreshes immediately, then every `interval` until shutdown.
    pub fn start_with_shutdown(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => cache.refresh().await,
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("block cache shutting down");
                        break;
                    }
                }
            }
        })
    }
}
