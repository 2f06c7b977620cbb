//! Parses a query execution plan (PostgreSQL JSON or MySQL `EXPLAIN
//! FORMAT=TREE` text) and attaches derived `plan.*` attributes, including
//! regression detection against a per-fingerprint history.
//!
//! Grounded on `plan_json`/`plan_text` above; the `Processor` wiring follows
//! `common::processor::Processor`'s contract of "mutate in place, never
//! return an error except on cancellation or a genuine internal invariant
//! violation."

pub mod plan_json;
pub mod plan_text;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::{Hash, Hasher};

use common::batch::Batch;
use common::cache::TtlLruCache;
use common::config::PlanAttributeExtractorConfig;
use common::error::CResult;
use common::host::Host;
use common::processor::{CancellationToken, Processor};
use common::tokenizer;

use plan_json::{ParseError, PlanNode};

pub struct PlanAttributeExtractor {
    config: PlanAttributeExtractorConfig,
    regression: TtlLruCache<u64, u64>,
}

impl PlanAttributeExtractor {
    pub fn new(config: PlanAttributeExtractorConfig) -> Self {
        let regression = TtlLruCache::new(config.cache_size, Duration::from_secs(config.regression_ttl_secs));
        PlanAttributeExtractor { config, regression }
    }
}

/// `plan.depth`: the number of edges from root to the deepest leaf. A
/// single-node plan has depth 0.
fn depth(node: &PlanNode) -> u64 {
    node.children.iter().map(depth).max().map(|d| d + 1).unwrap_or(0)
}

/// Collects operator names across the whole tree, deduplicated and sorted,
/// then bounded to 16 and comma-joined (original spec's Open Question D:
/// the source hints at a joined string but doesn't name a separator or
/// ordering; this suite picks sorted-then-bounded so the result is
/// deterministic regardless of traversal order -- see `SPEC_FULL.md` §D).
fn collect_ops(node: &PlanNode, out: &mut Vec<String>) {
    out.push(node.op.clone());
    for child in &node.children {
        collect_ops(child, out);
    }
}

fn plan_ops(node: &PlanNode) -> String {
    let mut ops = Vec::new();
    collect_ops(node, &mut ops);
    ops.sort();
    ops.dedup();
    ops.truncate(16);
    ops.join(",")
}

fn has_seq_scan(node: &PlanNode) -> bool {
    let lowered = node.op.to_lowercase();
    if lowered.contains("seq scan") || lowered.contains("sequential scan") || lowered.contains("table scan") {
        return true;
    }
    node.children.iter().any(has_seq_scan)
}

/// Hashes the plan's *structure* -- operator names and child ordering --
/// while deliberately excluding cost/rows/width estimates. Those fluctuate
/// between successive `EXPLAIN`s of the same query as table statistics
/// drift, so hashing them would make `plan.changed=true` fire on every
/// run instead of only on genuine structural changes (a sequential scan
/// replacing an index scan, say). This also satisfies the testable
/// property that structurally identical plans with differing cost/row
/// estimates still yield the same `plan.hash` (original spec §8, item 8).
fn structural_hash(node: &PlanNode, hasher: &mut FnvHasher) {
    node.op.hash(hasher);
    node.children.len().hash(hasher);
    for child in &node.children {
        structural_hash(child, hasher);
    }
}

fn plan_hash(node: &PlanNode) -> u64 {
    let mut hasher = FnvHasher::default();
    structural_hash(node, &mut hasher);
    hasher.finish()
}

impl PlanAttributeExtractor {
    /// Parses whichever plan representation is present, threading `deadline`
    /// into the recursive walk/line-scan so a plan that's merely slow to
    /// parse -- not just one handed in after the deadline already passed --
    /// is still caught and reported as `plan.parse_error=timeout` (original
    /// spec §4.1's `parse_timeout`).
    fn parse_plan(&self, json: Option<&str>, text: Option<&str>, deadline: Instant) -> Result<PlanNode, &'static str> {
        let result = if let Some(json) = json {
            plan_json::parse(json, deadline)
        } else if let Some(text) = text {
            plan_text::parse(text, deadline)
        } else {
            return Err("missing");
        };

        result.map_err(|err| match err {
            ParseError::Timeout => "timeout",
            ParseError::Malformed => "unparseable",
        })
    }

    fn process_item(&self, statement: &str, json: Option<&str>, text: Option<&str>) -> Vec<(&'static str, common::batch::AttributeValue)> {
        use common::batch::AttributeValue as AV;

        let raw_len = json.map(str::len).or_else(|| text.map(str::len)).unwrap_or(0);
        if raw_len > self.config.max_plan_bytes {
            return vec![("plan.parse_error", AV::String("oversize".into()))];
        }

        let deadline = Instant::now() + Duration::from_millis(self.config.parse_timeout_ms);
        let node = match self.parse_plan(json, text, deadline) {
            Ok(node) => node,
            Err(kind) => return vec![("plan.parse_error", AV::String(kind.into()))],
        };

        let hash = plan_hash(&node);
        let fingerprint = tokenizer::fingerprint(statement);

        let mut attrs = vec![
            ("plan.total_cost", AV::Float(node.cost)),
            ("plan.rows_estimate", AV::Float(node.rows)),
            ("plan.depth", AV::Int(depth(&node) as i64)),
            ("plan.ops", AV::String(plan_ops(&node))),
            ("plan.has_seq_scan", AV::Bool(has_seq_scan(&node))),
            ("plan.hash", AV::Int(hash as i64)),
            ("plan.fingerprint_stable", AV::Bool(true)),
        ];

        let previous = self.regression.get(&fingerprint);
        self.regression.insert(fingerprint, hash);
        if let Some(prev_hash) = previous {
            if prev_hash != hash {
                attrs.push(("plan.changed", AV::Bool(true)));
                attrs.push(("plan.prev_hash", AV::Int(prev_hash as i64)));
            }
        }

        attrs
    }
}

#[async_trait]
impl Processor for PlanAttributeExtractor {
    fn name(&self) -> &'static str {
        "plan_attribute_extractor"
    }

    async fn consume_batch(&self, ctx: &CancellationToken, batch: &mut Batch, host: &dyn Host) -> CResult<()> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut parse_errors: u64 = 0;
        let mut processed: u64 = 0;

        batch.for_each_item_mut(|_resource, item| {
            let statement = item.attr_str("db.statement").map(str::to_string);
            let json = item.attr_str("db.plan.json").map(str::to_string);
            let text = item.attr_str("db.plan.text").map(str::to_string);

            let (Some(statement), true) = (statement, json.is_some() || text.is_some()) else {
                return;
            };

            for (key, value) in self.process_item(&statement, json.as_deref(), text.as_deref()) {
                if key == "plan.parse_error" {
                    parse_errors += 1;
                }
                item.set_attr(key, value);
            }
            processed += 1;
        });

        ctx.check()?;

        host.metrics().incr_counter("planattrextractor.processed", processed as f64);
        if parse_errors > 0 {
            host.metrics().incr_counter("planattrextractor.parse_errors", parse_errors as f64);
        }

        Ok(())
    }
}
