use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Per-connection bandwidth limiter using a token bucket.
///
/// The bucket holds at most one second worth of tokens. [`consume`] may
/// drive the bucket negative so that a single large chunk is admitted
/// immediately and paid for by the following writes.
///
/// [`consume`]: BandwidthLimiter::consume
#[derive(Clone)]
pub struct BandwidthLimiter {
    inner: Arc<Mutex<BandwidthLimiterInner>>,
}

struct BandwidthLimiterInner {
    bytes_per_second: u64,
    tokens: f64,
    last_update: Instant,
}

impl BandwidthLimiter {
    pub fn new(bytes_per_second: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(BandwidthLimiterInner {
                bytes_per_second,
                tokens: bytes_per_second as f64,
                last_update: Instant::now(),
            })),
        }
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.inner.lock().bytes_per_second
    }

    /// Try to consume tokens, returns true if allowed
    pub fn try_consume(&self, bytes: u64) -> bool {
        let mut inner = self.inner.lock();
        inner.refill_tokens(Instant::now());

        if inner.tokens >= bytes as f64 {
            inner.tokens -= bytes as f64;
            true
        } else {
            false
        }
    }

    /// Take `bytes` tokens and sleep until the bucket has paid them back.
    pub async fn consume(&self, bytes: u64) {
        let wait = self.reserve(bytes, Instant::now());
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Update bandwidth limit
    pub fn set_limit(&self, bytes_per_second: u64) {
        let mut inner = self.inner.lock();
        inner.refill_tokens(Instant::now());
        inner.bytes_per_second = bytes_per_second;
        inner.tokens = inner.tokens.min(bytes_per_second as f64);
    }

    fn reserve(&self, bytes: u64, now: Instant) -> Duration {
        let mut inner = self.inner.lock();
        if inner.bytes_per_second == 0 {
            return Duration::ZERO;
        }
        inner.refill_tokens(now);
        inner.tokens -= bytes as f64;

        if inner.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-inner.tokens / inner.bytes_per_second as f64)
        }
    }
}

impl BandwidthLimiterInner {
    fn refill_tokens(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_update);
        let new_tokens = elapsed.as_secs_f64() * self.bytes_per_second as f64;

        self.tokens = (self.tokens + new_tokens).min(self.bytes_per_second as f64);
        self.last_update = now;
    }
}
