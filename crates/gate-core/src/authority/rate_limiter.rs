use crate::config::LimitsConfig;
use ahash::AHashSet;
use dashmap::DashMap;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::broadcast, task::JoinHandle};

/// Sessions are wiped on this period regardless of activity.
pub const SESSION_RESET_PERIOD: Duration = Duration::from_secs(86_400);

/// Per-origin request counters and session registry.
///
/// Counters are windowed: [`RateLimiter::reset_window`] clears them, normally from the
/// task started by [`RateLimiter::start_with_shutdown`]. Checks are strict: an origin may
/// consume exactly `ratelimit` units per window, the next unit is refused.
pub struct RateLimiter {
    counts: DashMap<String, u64>,
    sessions: DashMap<String, AHashSet<String>>,
    all_counts: AtomicU64,
    all_limits: AtomicU64,
    ratelimit: u64,
    concurrency: usize,
    interval: Duration,
}

/// Totals for one counting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowStats {
    pub requests: u64,
    pub limited: u64,
    pub origins: usize,
    pub session_origins: usize,
    pub sessions: usize,
}

impl RateLimiter {
    #[must_use]
    pub fn new(limits: &LimitsConfig) -> Self {
        Self {
            counts: DashMap::new(),
            sessions: DashMap::new(),
            all_counts: AtomicU64::new(0),
            all_limits: AtomicU64::new(0),
            ratelimit: limits.ratelimit,
            concurrency: limits.concurrency,
            interval: Duration::from_secs(limits.interval_seconds),
        }
    }

    /// Adds `score` units to `key`. Returns `false` once the window total exceeds the limit.
    pub fn add_count(&self, key: &str, score: u64) -> bool {
        self.all_counts.fetch_add(score, Ordering::Relaxed);

        let total = {
            let mut entry = self.counts.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(score);
            *entry
        };

        if total > self.ratelimit {
            self.all_limits.fetch_add(score, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Registers `session` under `key`. Returns `false` when the origin holds too many.
    ///
    /// The session stays registered on rejection; callers release it with
    /// [`RateLimiter::remove_session`] on every exit path.
    pub fn add_session(&self, key: &str, session: &str) -> bool {
        let mut entry = self.sessions.entry(key.to_string()).or_default();
        entry.insert(session.to_string());
        entry.len() <= self.concurrency
    }

    /// Releases `session`. Idempotent; drops the origin once it holds no sessions.
    pub fn remove_session(&self, key: &str, session: &str) -> bool {
        if let Some(mut entry) = self.sessions.get_mut(key) {
            entry.remove(session);
        }
        self.sessions.remove_if(key, |_, sessions| sessions.is_empty());
        true
    }

    #[must_use]
    pub fn count(&self, key: &str) -> u64 {
        self.counts.get(key).map_or(0, |entry| *entry)
    }

    #[must_use]
    pub fn session_count(&self, key: &str) -> usize {
        self.sessions.get(key).map_or(0, |entry| entry.len())
    }

    #[must_use]
    pub fn has_sessions(&self, key: &str) -> bool {
        self.sessions.contains_key(key)
    }

    /// Returns the totals of the current window and starts a new one.
    pub fn reset_window(&self) -> WindowStats {
        let stats = WindowStats {
            requests: self.all_counts.swap(0, Ordering::Relaxed),
            limited: self.all_limits.swap(0, Ordering::Relaxed),
            origins: self.counts.len(),
            session_origins: self.sessions.len(),
            sessions: self.sessions.iter().map(|entry| entry.len()).sum(),
        };
        self.counts.clear();
        stats
    }

    pub fn clear_sessions(&self) {
        self.sessions.clear();
    }

    /// Starts the window reset and daily session reset loop.
    ///
    /// Each window's totals are logged before the counters are cleared.
    pub fn start_with_shutdown(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut window = tokio::time::interval_at(
                tokio::time::Instant::now() + limiter.interval,
                limiter.interval,
            );
            let mut daily = tokio::time::interval_at(
                tokio::time::Instant::now() + SESSION_RESET_PERIOD,
                SESSION_RESET_PERIOD,
            );

            loop {
                tokio::select! {
                    _ = window.tick() => {
                        let stats = limiter.reset_window();
                        let seconds = limiter.interval.as_secs().max(1);
                        tracing::info!(
                            requests = stats.requests,
                            requests_per_second = stats.requests / seconds,
                            limited = stats.limited,
                            origins = stats.origins,
                            session_origins = stats.session_origins,
                            sessions = stats.sessions,
                            "rate window closed"
                        );
                    }
                    _ = daily.tick() => {
                        limiter.clear_sessions();
                        tracing::info!("session registry cleared");
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("rate limiter shutting down");
                        break;
                    }
                }
            }
        })
    }
}
