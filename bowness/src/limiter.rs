//! Per-entity token-bucket rate limiting.
//!
//! Buckets refill continuously at the configured rate up to the burst
//! capacity. A request reserves one token under the bucket lock; if the
//! bucket is empty the reservation drives the balance negative and the
//! request sleeps for its computed share outside the lock, so waiters are
//! served in reservation order without holding anything. A wait that
//! would exceed the caller's deadline is refused up front and consumes
//! nothing.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// The request was refused because its wait would exceed the deadline.
#[derive(Debug, thiserror::Error)]
#[error("rate limit exceeded")]
pub struct RateLimited;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, rate: f64, burst: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * rate).min(burst);
        self.last_refill = now;
    }
}

/// Token buckets keyed by entity ID, created lazily on first sighting.
///
/// The map only ever grows; it is bounded in practice by the
/// federation's entity count.
#[derive(Debug)]
pub struct EntityRateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    rate: f64,
    burst: f64,
}

impl EntityRateLimiter {
    /// Creates a limiter granting `rate` requests per second with a
    /// burst allowance of `burst` per entity.
    ///
    /// # Panics
    ///
    /// Panics if `rate` is not positive or `burst` is zero; the
    /// configuration layer validates both before construction.
    pub fn new(rate: f64, burst: u32) -> Self {
        assert!(rate > 0.0, "rate must be positive");
        assert!(burst >= 1, "burst must be at least 1");
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate,
            burst: f64::from(burst),
        }
    }

    /// Waits for one token from `entity`'s bucket.
    ///
    /// Returns immediately when a token is available. Otherwise the
    /// computed wait is compared against `max_wait` first: a wait that
    /// would exceed it fails with [`RateLimited`] without consuming a
    /// token; an acceptable wait is reserved and slept through.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimited`] when the wait would exceed `max_wait`.
    pub async fn acquire(
        &self,
        entity: &str,
        max_wait: Option<Duration>,
    ) -> Result<(), RateLimited> {
        let wait = self.reserve(entity, max_wait)?;
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
        Ok(())
    }

    fn reserve(&self, entity: &str, max_wait: Option<Duration>) -> Result<Duration, RateLimited> {
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(entity.to_owned()).or_insert_with(|| Bucket {
            tokens: self.burst,
            last_refill: Instant::now(),
        });

        bucket.refill(self.rate, self.burst);

        let wait = if bucket.tokens >= 1.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
        };

        if let Some(max_wait) = max_wait {
            if wait > max_wait {
                return Err(RateLimited);
            }
        }

        bucket.tokens -= 1.0;
        Ok(wait)
    }
}
