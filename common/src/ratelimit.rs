use std::time::Instant;

/// A refill-by-elapsed-time token bucket, capped at `rate_per_sec * burst_seconds`.
///
/// Shared by `AdaptiveSampler`'s per-(rule,key) sampling decision and by
/// `RateLimitedLogger` (`log::RateLimitedLogger`), which is the same
/// algorithm applied to "lines per second" instead of "items per second".
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    rate_per_sec: f64,
    burst_seconds: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(rate_per_sec: f64, burst_seconds: f64) -> Self {
        TokenBucket {
            tokens: rate_per_sec * burst_seconds,
            rate_per_sec,
            burst_seconds,
            last_refill: Instant::now(),
        }
    }

    pub fn rate_per_sec(&self) -> f64 {
        self.rate_per_sec
    }

    pub fn set_rate_per_sec(&mut self, rate: f64) {
        self.rate_per_sec = rate;
    }

    fn capacity(&self) -> f64 {
        self.rate_per_sec * self.burst_seconds
    }

    /// Refills based on elapsed wall time, then attempts to take one token.
    /// Returns true (and consumes a token) iff at least one token was available.
    pub fn try_acquire(&mut self) -> bool {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    pub fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.last_refill = now;
        let cap = self.capacity();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(cap);
    }

    pub fn tokens(&self) -> f64 {
        self.tokens
    }
}
