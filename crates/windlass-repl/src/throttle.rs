//! Fetch-rate throttling shared by all processors of one source cluster.
//!
//! A token bucket caps the long-poll RPC rate toward a source cluster. The
//! refill rate is re-read from a dynamic-config callback on every refill, so
//! operators can retune QPS without restarting the fetcher.

use crate::error::ReplicationError;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// Current time in microseconds since the Unix epoch.
pub(crate) fn current_time_us() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Token bucket for one throttle dimension.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill_us: u64,
}

impl TokenBucket {
    /// Create a bucket with the given capacity and refill rate (tokens/sec).
    pub fn new(capacity: f64, rate_per_sec: f64, now_us: u64) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate: rate_per_sec / 1_000_000.0,
            last_refill_us: now_us,
        }
    }

    /// Try to consume `amount` tokens. Refills first based on elapsed time.
    pub fn try_consume(&mut self, amount: f64, now_us: u64) -> bool {
        self.refill(now_us);
        if self.tokens >= amount {
            self.tokens -= amount;
            true
        } else {
            false
        }
    }

    /// Microseconds until `amount` tokens will be available, zero if already.
    pub fn wait_us(&self, amount: f64) -> u64 {
        if self.tokens >= amount || self.refill_rate <= 0.0 {
            return 0;
        }
        ((amount - self.tokens) / self.refill_rate).ceil() as u64
    }

    /// Change the refill rate (tokens/sec), keeping accumulated tokens.
    pub fn set_rate(&mut self, rate_per_sec: f64) {
        self.refill_rate = rate_per_sec / 1_000_000.0;
        self.capacity = self.capacity.max(rate_per_sec);
    }

    fn refill(&mut self, now_us: u64) {
        let elapsed_us = now_us.saturating_sub(self.last_refill_us);
        if elapsed_us > 0 {
            self.tokens = (self.tokens + elapsed_us as f64 * self.refill_rate).min(self.capacity);
            self.last_refill_us = now_us;
        }
    }
}

/// Rate limiter whose QPS is re-read from a callback on every acquisition.
///
/// Shared via `Arc` by every consumer throttling against the same source
/// cluster; tokens are drawn from a single bucket.
pub struct DynamicRateLimiter {
    rate_fn: Box<dyn Fn() -> f64 + Send + Sync>,
    bucket: Mutex<TokenBucket>,
}

impl DynamicRateLimiter {
    /// Create a limiter from a dynamic rate callback (tokens/sec).
    pub fn new(rate_fn: impl Fn() -> f64 + Send + Sync + 'static) -> Self {
        let rate = rate_fn();
        let bucket = Mutex::new(TokenBucket::new(rate.max(1.0), rate, current_time_us()));
        Self {
            rate_fn: Box::new(rate_fn),
            bucket,
        }
    }

    /// Create a limiter with a fixed rate (tokens/sec).
    pub fn fixed(rate_per_sec: f64) -> Self {
        Self::new(move || rate_per_sec)
    }

    /// Consume one token without waiting. Returns false when the bucket is empty.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
        bucket.set_rate((self.rate_fn)());
        bucket.try_consume(1.0, current_time_us())
    }

    /// Wait for one token, aborting with `Shutdown` when the signal flips.
    pub async fn acquire(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), ReplicationError> {
        loop {
            let wait_us = {
                let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());
                bucket.set_rate((self.rate_fn)());
                if bucket.try_consume(1.0, current_time_us()) {
                    return Ok(());
                }
                bucket.wait_us(1.0).max(1_000)
            };
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Err(ReplicationError::Shutdown);
                    }
                }
                _ = tokio::time::sleep(Duration::from_micros(wait_us)) => {}
            }
        }
    }
}

impl std::fmt::Debug for DynamicRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicRateLimiter").finish_non_exhaustive()
    }
}
