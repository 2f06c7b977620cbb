//! Last-mile defense against downstream-ingest rejections: truncates
//! oversized attribute values, sanitizes non-conforming keys and metric
//! names, and caps attribute count per item. Runs last in the chain.

use once_cell::sync::Lazy;
use regex::Regex;

use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::{Hash, Hasher};

use common::batch::{AttributeValue as AV, Batch, Item, ItemData};
use common::config::NrErrorMonitorConfig;
use common::error::CResult;
use common::host::Host;
use common::processor::{CancellationToken, Processor};

/// Matches a single disallowed character run, so `sanitize_name` can replace
/// each offending character with `_` in one pass instead of scanning twice.
static DISALLOWED_NAME_CHAR: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9_.]").unwrap());

pub struct NrErrorMonitor {
    config: NrErrorMonitorConfig,
}

impl NrErrorMonitor {
    pub fn new(config: NrErrorMonitorConfig) -> Self {
        NrErrorMonitor { config }
    }

    /// Sanitizes an attribute key or metric name to match
    /// `[A-Za-z_][A-Za-z0-9_.]*`: disallowed characters become `_`, and a
    /// leading digit gets an `_` prefix.
    fn sanitize_name(name: &str) -> (String, bool) {
        let mut sanitized = DISALLOWED_NAME_CHAR.replace_all(name, "_").into_owned();
        let mut changed = sanitized != name;

        if sanitized.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            sanitized.insert(0, '_');
            changed = true;
        }
        if sanitized.is_empty() {
            sanitized.push('_');
            changed = true;
        }

        (sanitized, changed)
    }

    fn truncate_value(&self, value: &str) -> (String, bool) {
        if value.len() <= self.config.max_attr_bytes {
            return (value.to_string(), false);
        }
        // Truncate on a char boundary, reserving room for the 3-byte `…`
        // suffix so the result never exceeds `max_attr_bytes`.
        let mut end = self.config.max_attr_bytes.saturating_sub("…".len());
        while end > 0 && !value.is_char_boundary(end) {
            end -= 1;
        }
        (format!("{}…", &value[..end]), true)
    }

    fn truncate_metric_name(&self, name: &str) -> (String, bool) {
        if name.len() <= self.config.max_metric_name_bytes {
            return (name.to_string(), false);
        }
        let mut hasher = FnvHasher::default();
        name.hash(&mut hasher);
        let suffix = format!("_{:x}", hasher.finish() & 0xFFFF_FFFF);
        let keep = self.config.max_metric_name_bytes.saturating_sub(suffix.len());
        let mut end = keep.min(name.len());
        while end > 0 && !name.is_char_boundary(end) {
            end -= 1;
        }
        (format!("{}{}", &name[..end], suffix), true)
    }

    /// Returns counts `(truncated, sanitized, dropped_attrs)` for one item,
    /// and whether the item itself must be dropped (an empty sanitized
    /// metric name -- the only invariant this processor can't repair).
    fn process_item(&self, item: &mut Item) -> (u64, u64, u64, bool) {
        let mut truncated = 0u64;
        let mut sanitized = 0u64;
        let mut dropped_attrs = 0u64;

        let mut rekeyed: Vec<(String, String, AV)> = Vec::new();
        for (key, value) in item.attributes.drain() {
            let (sanitized_key, key_changed) = Self::sanitize_name(&key);
            if key_changed {
                sanitized += 1;
            }

            let value = match value {
                AV::String(s) => {
                    let (truncated_value, changed) = self.truncate_value(&s);
                    if changed {
                        truncated += 1;
                    }
                    AV::String(truncated_value)
                }
                other => other,
            };

            rekeyed.push((key, sanitized_key, value));
        }

        // Attributes per item <= max_attrs_per_item; excess dropped
        // deterministically in sorted-key order so the same oversized item
        // always drops the same keys regardless of map iteration order.
        rekeyed.sort_by(|a, b| a.1.cmp(&b.1));
        if rekeyed.len() > self.config.max_attrs_per_item {
            dropped_attrs += (rekeyed.len() - self.config.max_attrs_per_item) as u64;
            rekeyed.truncate(self.config.max_attrs_per_item);
        }

        for (_original_key, sanitized_key, value) in rekeyed {
            item.attributes.insert(sanitized_key, value);
        }

        let drop_item = if let ItemData::Metric(metric) = &mut item.data {
            let (sanitized_name, name_changed) = Self::sanitize_name(&metric.name);
            let (final_name, len_changed) = self.truncate_metric_name(&sanitized_name);
            if name_changed {
                sanitized += 1;
            }
            if len_changed {
                truncated += 1;
            }
            metric.name = final_name;
            metric.name.is_empty()
        } else {
            false
        };

        (truncated, sanitized, dropped_attrs, drop_item)
    }
}

#[async_trait]
impl Processor for NrErrorMonitor {
    fn name(&self) -> &'static str {
        "nrerror_monitor"
    }

    async fn consume_batch(&self, ctx: &CancellationToken, batch: &mut Batch, host: &dyn Host) -> CResult<()> {
        let mut truncated_total = 0u64;
        let mut sanitized_total = 0u64;
        let mut dropped_attrs_total = 0u64;
        let mut dropped_items_total = 0u64;

        batch.retain_items(|_resource, item| {
            if item.is_self_metric() {
                return true;
            }
            let (truncated, sanitized, dropped_attrs, drop_item) = self.process_item(item);
            truncated_total += truncated;
            sanitized_total += sanitized;
            dropped_attrs_total += dropped_attrs;
            if drop_item {
                dropped_items_total += 1;
            }
            !drop_item
        });

        ctx.check()?;

        host.metrics().incr_counter("nrerrormon.truncated", truncated_total as f64);
        host.metrics().incr_counter("nrerrormon.sanitized", sanitized_total as f64);
        host.metrics().incr_counter("nrerrormon.dropped_attrs", dropped_attrs_total as f64);
        host.metrics().incr_counter("nrerrormon.dropped_items", dropped_items_total as f64);

        Ok(())
    }
}
