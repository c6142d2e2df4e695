//! TTL'd token cache.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use crate::clock::{Clock, SystemClock};

/// A cached value and its expiry.
#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Concurrency-safe cache of short-lived tokens.
///
/// Lookups treat expired entries as absent but never remove them;
/// reclamation happens in [`remove_expired`](Self::remove_expired),
/// typically driven by the background sweeper. This keeps the read path
/// on the shared lock mode.
pub struct TokenCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    clock: Arc<dyn Clock>,
}

impl TokenCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty cache reading time from the supplied clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Store `value` under `token` for `ttl`, replacing any existing entry.
    pub fn insert(&self, token: &str, value: &str, ttl: Duration) {
        let entry = CacheEntry {
            value: value.to_string(),
            expires_at: self.clock.now() + ttl,
        };
        self.entries.write().insert(token.to_string(), entry);
    }

    /// Look up `token`, treating expired entries as absent.
    ///
    /// An entry expiring exactly now is still served; it becomes a miss
    /// only once its expiry lies strictly in the past.
    pub fn get(&self, token: &str) -> Option<String> {
        let entries = self.entries.read();
        let entry = entries.get(token)?;

        if entry.expires_at < self.clock.now() {
            trace!(token = %token, "Cached token expired");
            return None;
        }

        Some(entry.value.clone())
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn remove_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at >= now);
        before - entries.len()
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Spawn a background task sweeping expired entries every `interval`.
    ///
    /// The task runs until the returned handle is shut down.
    pub fn start_sweeper(cache: Arc<Self>, interval: Duration) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately; consume it so the
            // first sweep happens one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.remove_expired();
                        if removed > 0 {
                            debug!(removed = removed, "Swept expired tokens");
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        info!("Token cache sweeper stopping");
                        break;
                    }
                }
            }
        });

        SweeperHandle { shutdown_tx, task }
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn shutdown(self) {
        // The send only fails if the task already exited.
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}
