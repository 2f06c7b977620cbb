use std::sync::Mutex;

use tracing::warn;

use crate::ratelimit::TokenBucket;

/// Bounds log output to <=10 lines/sec per processor so a sustained downstream
/// failure can't flood the log. Built on the same `TokenBucket` as
/// `AdaptiveSampler`; dropped lines are silently discarded (never queued).
pub struct RateLimitedLogger {
    processor: &'static str,
    bucket: Mutex<TokenBucket>,
}

impl RateLimitedLogger {
    pub fn new(processor: &'static str) -> Self {
        RateLimitedLogger::with_rate(processor, 10.0)
    }

    pub fn with_rate(processor: &'static str, lines_per_sec: f64) -> Self {
        RateLimitedLogger {
            processor,
            bucket: Mutex::new(TokenBucket::new(lines_per_sec, 1.0)),
        }
    }

    pub fn warn(&self, message: &str) {
        if self.bucket.lock().unwrap().try_acquire() {
            warn!(processor = self.processor, "{}", message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_lines_past_the_budget() {
        let logger = RateLimitedLogger::with_rate("test.processor", 2.0);
        // capacity is rate*burst_seconds(1.0) = 2 tokens
        assert!(logger.bucket.lock().unwrap().try_acquire());
        assert!(logger.bucket.lock().unwrap().try_acquire());
        assert!(!logger.bucket.lock().unwrap().try_acquire());
    }
}
