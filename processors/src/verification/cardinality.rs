//! Approximate per-`(metric_name, attribute_name)` cardinality protection.
//! Each tracked key gets its own `HyperLogLog` sketch; once the estimated
//! unique-value count crosses `max_unique_values`, new values are coarsened
//! or dropped per config rather than let the attribute's cardinality grow
//! without bound downstream.

use dashmap::DashMap;

use common::config::{CardinalityConfig, OverflowAction};
use common::hyperloglog::HyperLogLog;

pub struct CardinalityGuard {
    config: CardinalityConfig,
    sketches: DashMap<(String, String), HyperLogLog>,
}

/// What the caller should do with the attribute value it just checked.
pub enum Verdict {
    Keep,
    Coarsen,
    Drop,
}

impl CardinalityGuard {
    pub fn new(config: CardinalityConfig) -> Self {
        CardinalityGuard { config, sketches: DashMap::new() }
    }

    /// Records `value` under `(metric_name, attribute_name)` and reports
    /// whether the caller should keep it as-is, coarsen it, or drop it. The
    /// value is recorded in the sketch either way -- cardinality tracking
    /// needs the full value stream to keep its estimate honest, even for
    /// values this call coarsens or drops.
    pub fn observe(&self, metric_name: &str, attribute_name: &str, value: &str) -> Verdict {
        let key = (metric_name.to_string(), attribute_name.to_string());
        let mut sketch = self.sketches.entry(key).or_insert_with(HyperLogLog::new);
        sketch.insert(&value);
        let estimate = sketch.estimate();

        if estimate <= self.config.max_unique_values {
            Verdict::Keep
        } else {
            match self.config.overflow_action {
                OverflowAction::Coarsen => Verdict::Coarsen,
                OverflowAction::Drop => Verdict::Drop,
            }
        }
    }
}

/// A coarse bucket label for an overflowing high-cardinality value: stable
/// for a given input, but collapses the value space down to 64 buckets.
pub fn coarsen(value: &str) -> String {
    use std::hash::{Hash, Hasher};
    let mut hasher = fnv::FnvHasher::default();
    value.hash(&mut hasher);
    format!("bucket:{}", hasher.finish() % 64)
}
