//! Per-key request counters.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

/// A concurrency-safe monotone counter per key.
///
/// Used for advisory request accounting alongside the limiter. Increments
/// are lock-free once a key's slot exists; the map handles slot creation
/// when concurrent callers race on a new key.
#[derive(Debug, Default)]
pub struct HitCounter {
    counts: DashMap<String, AtomicU64>,
}

impl HitCounter {
    /// Create an empty counter.
    pub fn new() -> Self {
        Self {
            counts: DashMap::new(),
        }
    }

    /// Increment the count for `key` and return the new value.
    pub fn record(&self, key: &str) -> u64 {
        if let Some(entry) = self.counts.get(key) {
            return entry.fetch_add(1, Ordering::SeqCst) + 1;
        }

        self.counts
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::SeqCst)
            + 1
    }

    /// Current count for `key`, 0 if the key has never been recorded.
    pub fn count(&self, key: &str) -> u64 {
        self.counts
            .get(key)
            .map(|entry| entry.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Number of distinct keys observed.
    pub fn key_count(&self) -> usize {
        self.counts.len()
    }

    /// Drop all counts.
    pub fn clear(&self) {
        self.counts.clear();
    }
}
