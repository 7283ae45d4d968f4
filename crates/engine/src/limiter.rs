//! Token bucket shared by every worker of a job.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dubsync_synthesis::CallGate;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Paces synthesis calls to `requests_per_minute`, allowing `burst`
/// back-to-back calls after an idle period.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    per_second: f64,
    admitted: AtomicU64,
    waited_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = config.burst.max(1) as f64;
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            per_second: config.requests_per_minute.max(1) as f64 / 60.0,
            admitted: AtomicU64::new(0),
            waited_ms: AtomicU64::new(0),
        }
    }

    /// Take a token without waiting. Returns how long to wait otherwise.
    fn try_take(&self) -> Result<(), Duration> {
        let mut bucket = self.bucket.lock().expect("limiter mutex poisoned");
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.per_second).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - bucket.tokens) / self.per_second))
        }
    }

    pub async fn acquire(&self) {
        let started = Instant::now();
        while let Err(wait) = self.try_take() {
            tokio::time::sleep(wait).await;
        }
        self.admitted.fetch_add(1, Ordering::Relaxed);
        let waited = started.elapsed().as_millis() as u64;
        if waited > 0 {
            self.waited_ms.fetch_add(waited, Ordering::Relaxed);
            tracing::trace!(waited_ms = waited, "rate_limiter_waited");
        }
    }

    pub fn admitted(&self) -> u64 {
        self.admitted.load(Ordering::Relaxed)
    }

    /// Total time callers spent blocked.
    pub fn waited(&self) -> Duration {
        Duration::from_millis(self.waited_ms.load(Ordering::Relaxed))
    }
}

#[async_trait]
impl CallGate for RateLimiter {
    async fn admit(&self) {
        self.acquire().await;
    }
}
