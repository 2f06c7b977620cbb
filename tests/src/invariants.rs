//! Property tests from original spec §8, items 1, 2, 3, 4, 6, 7, 8. The six
//! concrete end-to-end scenarios live in their own files next to this one;
//! these tests instead exercise the invariants that must hold for *any*
//! input, not just the worked examples.

use std::time::Duration;

use common::batch::{AttributeValue as AV, Attributes, Batch, Item, LogRecord, MetricDataPoint, MetricKind, Resource, Scope, Severity};
use common::config::{AdaptiveSamplerConfig, CircuitBreakerConfig, CostControlConfig, CostControlThresholds, DefaultAction, RuleConfig, SuiteConfig};
use common::host::SimpleHost;
use common::processor::{CancellationToken, Processor};
use once_cell::sync::Lazy;
use pipeline::ProcessorChain;
use processors::adaptive_sampler::AdaptiveSampler;
use regex::Regex;

static NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.]*$").unwrap());

fn generous_config() -> SuiteConfig {
    let mut config = SuiteConfig::default();
    config.cost_control.monthly_budget_bytes = 100 * 1024 * 1024 * 1024;
    config
}

/// Property 1: for every surviving item, attribute values are <= 4095 bytes
/// and attribute keys / metric names match `[A-Za-z_][A-Za-z0-9_.]*`.
#[tokio::test]
async fn every_surviving_item_respects_name_and_length_bounds() {
    let chain = ProcessorChain::new(generous_config()).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut item = Item::new_metric(
        0,
        MetricDataPoint { name: "9 bad metric name!!".into(), unit: "ms".into(), kind: MetricKind::Gauge, value: 1.0, bucket_counts: vec![] },
    );
    item.set_attr("weird key!", "a".repeat(6000));
    item.set_attr("db.system", "postgresql");

    let mut attrs = Attributes::new();
    attrs.insert("db.name".into(), "appdb".into());
    attrs.insert("host.name".into(), "db-1".into());

    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: attrs, scopes: vec![Scope { name: String::new(), version: String::new(), items: vec![item] }] });

    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    for resource in &batch.resources {
        for scope in &resource.scopes {
            for item in &scope.items {
                if item.is_self_metric() {
                    continue;
                }
                for (key, value) in &item.attributes {
                    assert!(NAME_RE.is_match(key), "attribute key {key:?} violates the name pattern");
                    if let AV::String(s) = value {
                        assert!(s.len() <= 4095, "attribute {key:?} is {} bytes", s.len());
                    }
                }
                if let common::batch::ItemData::Metric(m) = &item.data {
                    assert!(NAME_RE.is_match(&m.name), "metric name {:?} violates the name pattern", m.name);
                }
            }
        }
    }
}

/// Property 2: two items with syntactically distinct but structurally equal
/// SQL get the same `db.query.fingerprint`, whether or not the upstream
/// receiver already tagged one of them.
#[tokio::test]
async fn identical_normalized_sql_yields_equal_fingerprint() {
    let chain = ProcessorChain::new(generous_config()).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut attrs_a = Attributes::new();
    attrs_a.insert("db.name".into(), "appdb".into());
    attrs_a.insert("db.system".into(), "postgresql".into());
    attrs_a.insert("host.name".into(), "db-1".into());

    let mut item_a = Item::new_log(0, LogRecord { body: String::new(), severity: Severity::Info });
    item_a.set_attr("db.statement", "SELECT * FROM t WHERE id = 42 AND name = 'x'");
    item_a.set_attr("db.system", "postgresql");

    let mut item_b = Item::new_log(1, LogRecord { body: String::new(), severity: Severity::Info });
    item_b.set_attr("db.statement", "select  *  from t where id=99 and name='yyyyyy'");
    item_b.set_attr("db.system", "postgresql");

    let mut batch = Batch::new();
    batch.resources.push(Resource {
        attributes: attrs_a,
        scopes: vec![Scope { name: String::new(), version: String::new(), items: vec![item_a, item_b] }],
    });

    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    assert_eq!(batch.item_count(), 2);
    let items = &batch.resources[0].scopes[0].items;
    assert_eq!(items[0].attr("db.query.fingerprint"), items[1].attr("db.query.fingerprint"));
}

/// Property 3: over a saturating burst of input sharing one `(rule, key)`,
/// AdaptiveSampler never emits more than `max_rate + max_rate*burst_seconds`
/// items within the first second.
#[tokio::test]
async fn sampler_never_exceeds_rate_plus_burst_under_saturation() {
    let config = AdaptiveSamplerConfig {
        rules: vec![RuleConfig {
            name: "hot".into(),
            predicate: "db.name == \"appdb\"".into(),
            key_attribute: "db.name".into(),
            min_rate: 20.0,
            max_rate: 20.0,
            target_budget_per_sec: 20.0,
            burst_seconds: 2.0,
            sample_on_match: 1.0,
            priority: 0,
        }],
        default_action: DefaultAction::Keep,
        rng_seed: 7,
        adjust_interval_secs: 3600,
    };
    let sampler = AdaptiveSampler::new(config).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut scope = Scope::default();
    for i in 0..2000u64 {
        let mut item = Item::new_log(i, LogRecord { body: "x".into(), severity: Severity::Info });
        item.set_attr("db.name", "appdb");
        scope.items.push(item);
    }
    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: Attributes::new(), scopes: vec![scope] });

    sampler.consume_batch(&ctx, &mut batch, &host).await.unwrap();

    let max_allowed = 20.0 * 1.0 + 20.0 * 2.0;
    assert!(batch.item_count() as f64 <= max_allowed, "expected at most {max_allowed}, got {}", batch.item_count());
}

/// Property 4: once `failure_threshold` consecutive downstream failures are
/// reported for a database, the breaker drops every item for that database
/// for at least `open_duration` -- checked here by confirming the drop holds
/// well before `open_duration` elapses, and that a single probe item is let
/// through only after it does.
#[tokio::test]
async fn circuit_breaker_drops_for_at_least_open_duration() {
    let mut config = generous_config();
    config.circuit_breaker = CircuitBreakerConfig { failure_threshold: 4, open_duration_secs: 1, max_open_duration_secs: 60, half_open_probes: 1 };
    let chain = ProcessorChain::new(config).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    for _ in 0..4 {
        chain.circuit_breaker().report_outcome("appdb", false);
    }

    let mut attrs = Attributes::new();
    attrs.insert("db.name".into(), "appdb".into());

    let make_batch = |n: usize| {
        let mut scope = Scope::default();
        for i in 0..n {
            scope.items.push(Item::new_log(i as u64, LogRecord { body: "x".into(), severity: Severity::Info }));
        }
        let mut batch = Batch::new();
        batch.resources.push(Resource { attributes: attrs.clone(), scopes: vec![scope] });
        batch
    };

    // immediately after tripping, well inside open_duration: everything drops.
    let mut immediate = make_batch(10);
    chain.run_batch(&ctx, &mut immediate, &host).await.unwrap();
    assert_eq!(immediate.item_count(), 0);

    // still inside the 1s open window.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let mut still_open = make_batch(10);
    chain.run_batch(&ctx, &mut still_open, &host).await.unwrap();
    assert_eq!(still_open.item_count(), 0);

    // past open_duration: exactly one half-open probe gets through.
    tokio::time::sleep(Duration::from_millis(900)).await;
    let mut after_open = make_batch(10);
    chain.run_batch(&ctx, &mut after_open, &host).await.unwrap();
    assert_eq!(after_open.item_count(), 1);
}

/// Property 6: CostControl's emergency mode, once entered, persists until
/// utilization drops back below the hysteresis band -- which in this
/// suite's fixed-window-with-reset model only happens at a window boundary.
/// A short window that resets to zero bytes must bring the mode back to
/// `normal` on the batch after the reset.
#[tokio::test]
async fn emergency_mode_persists_until_utilization_drops_then_exits() {
    let config = CostControlConfig {
        // same ~1.6MB window budget as the cost-emergency scenario test, but
        // re-derived for a 1s window instead of a 3600s one so the test can
        // observe a window reset without sleeping an hour.
        monthly_budget_bytes: 4_147_200_000_000,
        window_secs: 1,
        thresholds: CostControlThresholds::default(),
        critical_predicate: None,
        non_essential_attributes: vec![],
        cooldown_secs: 60,
    };
    let cc = processors::cost_control::CostControl::new(config).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let big_batch = |payload_len: usize, count: usize| {
        let mut scope = Scope::default();
        for _ in 0..count {
            let mut item = Item::new_log(0, LogRecord { body: String::new(), severity: Severity::Info });
            item.set_attr("payload", "x".repeat(payload_len));
            scope.items.push(item);
        }
        let mut batch = Batch::new();
        batch.resources.push(Resource { attributes: Attributes::new(), scopes: vec![scope] });
        batch
    };

    let mut heavy = big_batch(4096, 400);
    cc.consume_batch(&ctx, &mut heavy, &host).await.unwrap();
    assert_eq!(cc.current_mode(), "emergency");

    // still well inside the 1s window: mode must not have de-escalated.
    let mut still_heavy = big_batch(1, 1);
    cc.consume_batch(&ctx, &mut still_heavy, &host).await.unwrap();
    assert_eq!(cc.current_mode(), "emergency");

    // past the window boundary: bytes reset to zero, utilization drops below
    // every threshold's hysteresis band, and the mode exits to normal.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let mut light = big_batch(1, 1);
    cc.consume_batch(&ctx, &mut light, &host).await.unwrap();
    assert_eq!(cc.current_mode(), "normal");
}

/// Property 7: an item dropped by an earlier processor in the chain never
/// reappears downstream. Here AdaptiveSampler drops everything for a
/// database; Verification/CostControl/NRErrorMonitor must never see it
/// (observable as the final item count staying at zero).
#[tokio::test]
async fn dropping_is_monotonic_across_the_chain() {
    let mut config = generous_config();
    config.adaptive_sampler = AdaptiveSamplerConfig {
        rules: vec![RuleConfig {
            name: "drop-all".into(),
            predicate: "db.name == \"appdb\"".into(),
            key_attribute: "db.name".into(),
            min_rate: 0.0,
            max_rate: 0.0,
            target_budget_per_sec: 0.0,
            burst_seconds: 0.0,
            sample_on_match: 1.0,
            priority: 0,
        }],
        default_action: DefaultAction::Keep,
        rng_seed: 1,
        adjust_interval_secs: 3600,
    };
    let chain = ProcessorChain::new(config).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut attrs = Attributes::new();
    attrs.insert("db.name".into(), "appdb".into());
    attrs.insert("db.system".into(), "postgresql".into());
    attrs.insert("host.name".into(), "db-1".into());

    let mut item = Item::new_log(0, LogRecord { body: "user jane@example.com logged in".into(), severity: Severity::Info });
    item.set_attr("db.system", "postgresql");

    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: attrs, scopes: vec![Scope { name: String::new(), version: String::new(), items: vec![item] }] });

    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    assert_eq!(batch.item_count(), 0);
    // the dropped item's PII never reaches Verification's counters, because
    // it never reaches Verification at all.
    assert_eq!(host.metrics().get("verification.dropped.pii"), None);
}

/// Property 8: PlanAttributeExtractor yields an identical `plan.hash` for
/// structurally identical plans even when cost/row estimates differ between
/// runs, which is what keeps `plan.changed` from firing on harmless
/// statistics drift.
#[tokio::test]
async fn structurally_identical_plans_yield_equal_hash() {
    let chain = ProcessorChain::new(generous_config()).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let plan_a = r#"{"Plan": {"Node Type": "Seq Scan", "Total Cost": 4.2, "Plan Rows": 1}}"#;
    let plan_b = r#"{"Plan": {"Node Type": "Seq Scan", "Total Cost": 910.0, "Plan Rows": 50000}}"#;

    let make_batch = |plan: &str| {
        let mut item = Item::new_metric(0, MetricDataPoint { name: "db.query.duration".into(), unit: "ms".into(), kind: MetricKind::Gauge, value: 1.0, bucket_counts: vec![] });
        item.set_attr("db.statement", "SELECT 1");
        item.set_attr("db.plan.json", plan);
        let mut batch = Batch::new();
        batch.resources.push(Resource { attributes: Attributes::new(), scopes: vec![Scope { name: String::new(), version: String::new(), items: vec![item] }] });
        batch
    };

    let mut batch_a = make_batch(plan_a);
    let mut batch_b = make_batch(plan_b);
    chain.run_batch(&ctx, &mut batch_a, &host).await.unwrap();
    chain.run_batch(&ctx, &mut batch_b, &host).await.unwrap();

    let hash_a = batch_a.resources[0].scopes[0].items[0].attr("plan.hash").and_then(AV::as_int);
    let hash_b = batch_b.resources[0].scopes[0].items[0].attr("plan.hash").and_then(AV::as_int);
    assert!(hash_a.is_some());
    assert_eq!(hash_a, hash_b);
}
