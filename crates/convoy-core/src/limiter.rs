//! Per-key admission control.
//!
//! Over any trailing window at most `limit` calls are admitted for a key;
//! denied calls report how long until the next one would succeed.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after: Duration,
}

impl RateLimitDecision {
    fn allowed() -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
        }
    }
}

#[async_trait::async_trait]
pub trait RateLimiter: Send + Sync {
    async fn allow(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision;
}

/// Admits everything. Used when a deployment opts out of throttling.
pub struct NoopLimiter;

#[async_trait::async_trait]
impl RateLimiter for NoopLimiter {
    async fn allow(&self, _key: &str, _limit: u32, _window: Duration) -> RateLimitDecision {
        RateLimitDecision::allowed()
    }
}

struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter: capacity `limit`, refilled at `limit / window`.
pub struct TokenBucketLimiter {
    buckets: Mutex<HashMap<String, TokenBucket>>,
}

impl TokenBucketLimiter {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn allow(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        // A zero limit or window means the key is not throttled.
        if limit == 0 || window.is_zero() {
            return RateLimitDecision::allowed();
        }

        let capacity = limit as f64;
        let refill_per_sec = capacity / window.as_secs_f64();
        let now = Instant::now();

        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(key.to_string()).or_insert(TokenBucket {
            tokens: capacity,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * refill_per_sec).min(capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            RateLimitDecision::allowed()
        } else {
            let missing = 1.0 - bucket.tokens;
            RateLimitDecision {
                allowed: false,
                retry_after: Duration::from_secs_f64(missing / refill_per_sec),
            }
        }
    }
}
