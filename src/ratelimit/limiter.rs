//! Token bucket rate limiter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::clock::{Clock, SystemClock};
use crate::config::LimiterSettings;
use crate::error::{Result, TollgateError};

/// Per-key token bucket state.
///
/// Owned exclusively by the limiter's bucket map; both fields are only
/// touched under the map lock, so a reader always sees a consistent pair.
#[derive(Debug, Clone, Copy)]
struct Bucket {
    /// Tokens currently available, in `[0, capacity]`.
    tokens: f64,
    /// When the bucket was last refilled.
    last_refill: Instant,
}

/// A per-key token bucket rate limiter.
///
/// Each key gets an independent budget of `capacity` tokens, replenished
/// continuously at `rate` tokens per second and consumed one token per
/// admitted request. Buckets are created lazily on first sight of a key,
/// starting at full capacity.
///
/// This struct is thread-safe and can be shared across tasks.
pub struct RateLimiter {
    /// Tokens granted per second of elapsed time.
    rate: f64,
    /// Maximum burst size; buckets saturate here.
    capacity: f64,
    /// Bucket state indexed by caller key.
    buckets: RwLock<HashMap<String, Bucket>>,
    /// Time source for refill computations.
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a limiter admitting `requests_per_window` requests per `window`.
    pub fn new(requests_per_window: u64, window: Duration) -> Result<Self> {
        Self::with_clock(requests_per_window, window, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from the supplied clock.
    pub fn with_clock(
        requests_per_window: u64,
        window: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if requests_per_window == 0 {
            return Err(TollgateError::RateLimit(
                "requests_per_window must be positive".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(TollgateError::RateLimit(
                "window must be a positive duration".to_string(),
            ));
        }

        Ok(Self {
            rate: requests_per_window as f64 / window.as_secs_f64(),
            capacity: requests_per_window as f64,
            buckets: RwLock::new(HashMap::new()),
            clock,
        })
    }

    /// Create a limiter from configuration settings.
    pub fn from_settings(settings: &LimiterSettings) -> Result<Self> {
        Self::new(settings.requests_per_window, settings.window())
    }

    /// Decide whether `key` may proceed right now, consuming one token if so.
    ///
    /// Bucket creation, refill, and the decision run as one critical
    /// section, so concurrent calls for the same key serialize and no
    /// admission is lost or double-counted.
    pub fn allow(&self, key: &str) -> bool {
        let mut buckets = self.buckets.write();
        // Read the clock inside the critical section so refills observe
        // timestamps in lock order.
        let now = self.clock.now();

        let bucket = buckets.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Creating new token bucket");
            Bucket {
                tokens: self.capacity,
                last_refill: now,
            }
        });

        // saturating_duration_since clamps a backwards clock to zero
        // elapsed: no refill, no penalty.
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        // Reset unconditionally, even when already saturated: each refill
        // is computed over the most recent interval only.
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            trace!(key = %key, remaining = bucket.tokens, "Request admitted");
            true
        } else {
            debug!(key = %key, tokens = bucket.tokens, "Rate limit exceeded");
            false
        }
    }

    /// Advisory remaining-budget estimate for `key`.
    ///
    /// Projects the refill the next [`allow`](Self::allow) would apply but
    /// stores nothing back and consumes nothing. A key that has never been
    /// seen reports the full quota without materializing a bucket.
    ///
    /// The estimate truncates, so a bucket holding 0.9 tokens reports 0
    /// even though one holding exactly 1.0 is still admissible; never use
    /// this in place of `allow`.
    pub fn tokens_for(&self, key: &str) -> u64 {
        let buckets = self.buckets.read();
        match buckets.get(key) {
            None => self.capacity as u64,
            Some(bucket) => {
                let elapsed = self
                    .clock
                    .now()
                    .saturating_duration_since(bucket.last_refill);
                let projected =
                    (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
                projected as u64
            }
        }
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> u64 {
        self.capacity as u64
    }

    /// Tokens granted per second of elapsed time.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Number of keys with materialized buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Drop all bucket state.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.buckets.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn manual_limiter(
        requests_per_window: u64,
        window: Duration,
    ) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let limiter = RateLimiter::with_clock(requests_per_window, window, clock.clone()).unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_zero_quota_rejected() {
        assert!(RateLimiter::new(0, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_zero_window_rejected() {
        assert!(RateLimiter::new(1, Duration::ZERO).is_err());
    }

    #[test]
    fn test_derived_rate_and_capacity() {
        let limiter = RateLimiter::new(1, Duration::from_secs(5)).unwrap();
        assert_eq!(limiter.rate(), 0.2);
        assert_eq!(limiter.capacity(), 1);
    }

    #[test]
    fn test_from_settings() {
        let settings = LimiterSettings {
            requests_per_window: 10,
            window_secs: 2,
        };
        let limiter = RateLimiter::from_settings(&settings).unwrap();
        assert_eq!(limiter.capacity(), 10);
        assert_eq!(limiter.rate(), 5.0);
    }

    #[test]
    fn test_burst_admits_at_most_capacity() {
        let (limiter, _clock) = manual_limiter(5, Duration::from_secs(60));

        let admitted = (0..20).filter(|_| limiter.allow("client")).count();
        assert_eq!(admitted, 5);

        // Still rejected with no elapsed time.
        assert!(!limiter.allow("client"));
    }

    #[test]
    fn test_new_bucket_starts_full() {
        let (limiter, _clock) = manual_limiter(3, Duration::from_secs(1));
        assert_eq!(limiter.tokens_for("fresh"), 3);
        assert!(limiter.allow("fresh"));
    }

    #[test]
    fn test_refill_convergence() {
        // 10 per 10s: one token per second.
        let (limiter, clock) = manual_limiter(10, Duration::from_secs(10));

        for _ in 0..10 {
            assert!(limiter.allow("client"));
        }
        assert_eq!(limiter.tokens_for("client"), 0);

        clock.advance(Duration::from_secs(3));
        assert_eq!(limiter.tokens_for("client"), 3);

        // Refill saturates at capacity.
        clock.advance(Duration::from_secs(60));
        assert_eq!(limiter.tokens_for("client"), 10);
    }

    #[test]
    fn test_tokens_for_does_not_store_or_consume() {
        let (limiter, clock) = manual_limiter(10, Duration::from_secs(10));
        for _ in 0..10 {
            assert!(limiter.allow("client"));
        }

        clock.advance(Duration::from_secs(3));
        assert_eq!(limiter.tokens_for("client"), 3);
        // A second read projects the same value; nothing was written back.
        assert_eq!(limiter.tokens_for("client"), 3);

        // The next allow applies the same refill and consumes one.
        assert!(limiter.allow("client"));
        assert_eq!(limiter.tokens_for("client"), 2);
    }

    #[test]
    fn test_tokens_for_unknown_key_reports_capacity_without_creating() {
        let (limiter, _clock) = manual_limiter(7, Duration::from_secs(1));
        assert_eq!(limiter.tokens_for("ghost"), 7);
        assert_eq!(limiter.bucket_count(), 0);
    }

    #[test]
    fn test_keys_are_independent() {
        let (limiter, _clock) = manual_limiter(2, Duration::from_secs(60));

        assert!(limiter.allow("a"));
        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));

        // Draining "a" left "b" untouched.
        assert_eq!(limiter.tokens_for("b"), 2);
        assert!(limiter.allow("b"));
    }

    #[test]
    fn test_single_quota_scenario() {
        // 1 request per 5s: rate 0.2/s, capacity 1.
        let (limiter, clock) = manual_limiter(1, Duration::from_secs(5));

        assert!(limiter.allow("u"));
        assert!(!limiter.allow("u"));
        assert_eq!(limiter.tokens_for("u"), 0);

        clock.advance(Duration::from_secs(5));
        assert!(limiter.allow("u"));
    }

    #[test]
    fn test_exact_one_token_is_admitted() {
        // 1 per 4s: rate 0.25/s, exactly representable in binary.
        let (limiter, clock) = manual_limiter(1, Duration::from_secs(4));

        assert!(limiter.allow("u"));
        clock.advance(Duration::from_secs(4));

        // 4s * 0.25/s lands the bucket on exactly 1.0, which must admit.
        assert_eq!(limiter.tokens_for("u"), 1);
        assert!(limiter.allow("u"));
    }

    #[test]
    fn test_fractional_tokens_are_not_admitted() {
        let (limiter, clock) = manual_limiter(1, Duration::from_secs(4));

        assert!(limiter.allow("u"));
        clock.advance(Duration::from_secs(3));

        // 0.75 tokens: reported as 0 and rejected.
        assert_eq!(limiter.tokens_for("u"), 0);
        assert!(!limiter.allow("u"));
    }

    #[test]
    fn test_saturated_bucket_does_not_bank_idle_time() {
        let (limiter, clock) = manual_limiter(2, Duration::from_secs(2));

        // Touch the bucket, then let it sit far past saturation.
        assert!(limiter.allow("u"));
        clock.advance(Duration::from_secs(3600));

        // Saturated at 2 tokens; the idle hour is not banked beyond that.
        assert!(limiter.allow("u"));
        assert!(limiter.allow("u"));
        assert!(!limiter.allow("u"));
    }

    #[test]
    fn test_tokens_for_never_exceeds_capacity() {
        let (limiter, clock) = manual_limiter(4, Duration::from_secs(1));
        assert!(limiter.allow("u"));

        clock.advance(Duration::from_secs(3600));
        assert_eq!(limiter.tokens_for("u"), 4);
    }

    #[test]
    fn test_clear_drops_buckets() {
        let (limiter, _clock) = manual_limiter(1, Duration::from_secs(60));
        assert!(limiter.allow("u"));
        assert_eq!(limiter.bucket_count(), 1);

        limiter.clear();
        assert_eq!(limiter.bucket_count(), 0);

        // Key starts over with a full bucket.
        assert!(limiter.allow("u"));
    }

    #[test]
    fn test_concurrent_allows_admit_exactly_capacity() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(
            // Hour-long window keeps concurrent refill at zero even if the
            // manual clock were advanced between spawns.
            RateLimiter::with_clock(8, Duration::from_secs(3600), clock).unwrap(),
        );

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || u64::from(limiter.allow("shared")))
            })
            .collect();

        let admitted: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 8);
        assert_eq!(limiter.tokens_for("shared"), 0);
    }
}
