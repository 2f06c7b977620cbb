//! Per-`(rule, key)` token bucket state, bounded by a global capacity with
//! LRU eviction. Reuses `common::cache::TtlLruCache` -- the same "size-capped,
//! LRU-evicting" primitive `PlanAttributeExtractor` and `QueryCorrelator` use
//! -- with an effectively-unbounded TTL, since original spec §4.3 only calls
//! for a capacity bound, not a time-based expiry: "evicted buckets are
//! treated as fresh on re-entry" describes LRU pressure, not staleness.

use std::time::Duration;

use common::cache::TtlLruCache;
use common::ratelimit::TokenBucket;

const EFFECTIVELY_UNBOUNDED: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

pub struct BucketTable {
    cache: TtlLruCache<(String, String), TokenBucket>,
}

impl BucketTable {
    pub fn new(capacity: usize) -> Self {
        BucketTable { cache: TtlLruCache::new(capacity, EFFECTIVELY_UNBOUNDED) }
    }

    /// Attempts to consume one token from the bucket for `(rule_id, key)`,
    /// creating a fresh bucket (full burst capacity) if none exists yet --
    /// whether because this is the first sighting of `key` or because it was
    /// LRU-evicted. `sampled` is the caller's already-evaluated
    /// `rand() <= sample_on_match` decision: a token is only actually spent
    /// when both the token and the random draw allow the item through,
    /// matching original spec §4.3 step 3 exactly.
    pub fn try_consume(&self, rule_id: &str, key: &str, rate_per_sec: f64, burst_seconds: f64, sampled: bool) -> bool {
        let cache_key = (rule_id.to_string(), key.to_string());
        let mut bucket = self.cache.get_or_insert_with(cache_key.clone(), || TokenBucket::new(rate_per_sec, burst_seconds));

        bucket.set_rate_per_sec(rate_per_sec);
        bucket.refill();
        let has_token = bucket.tokens() >= 1.0;
        let accepted = has_token && sampled && bucket.try_acquire();

        self.cache.insert(cache_key, bucket);
        accepted
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_bucket_grants_burst_then_throttles() {
        let table = BucketTable::new(10);
        let mut accepted = 0;
        for _ in 0..25 {
            if table.try_consume("rule-a", "db1", 10.0, 2.0, true) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 20);
    }

    #[test]
    fn unsampled_draw_never_spends_a_token() {
        let table = BucketTable::new(10);
        for _ in 0..5 {
            assert!(!table.try_consume("rule-a", "db1", 10.0, 2.0, false));
        }
        // all burst tokens should still be available since none were spent.
        let mut accepted = 0;
        for _ in 0..20 {
            if table.try_consume("rule-a", "db1", 10.0, 2.0, true) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 20);
    }

    #[test]
    fn evicted_bucket_is_fresh_on_re_entry() {
        let table = BucketTable::new(1);
        assert!(table.try_consume("rule-a", "db1", 10.0, 2.0, true));
        // overflow capacity of 1 -- evicts db1's bucket.
        table.try_consume("rule-a", "db2", 10.0, 2.0, true);
        assert_eq!(table.len(), 1);
        // db1 re-enters with a full burst, not a starved state.
        assert!(table.try_consume("rule-a", "db1", 10.0, 2.0, true));
    }
}
