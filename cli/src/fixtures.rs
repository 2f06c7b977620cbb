//! Small deterministic `Batch` builders for the `replay` subcommand, mirroring
//! the six concrete end-to-end scenarios: fingerprint passthrough, plan
//! regression, sampling budget, circuit trips, PII redaction, cost
//! emergency. Reused verbatim by the `tests` crate so the CLI and the
//! integration tests exercise the same fixtures.

use common::batch::{Attributes, Batch, Item, LogRecord, MetricDataPoint, MetricKind, Resource, Scope, Severity};

fn single_item_batch(resource_attrs: Attributes, item: Item) -> Batch {
    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: resource_attrs, scopes: vec![Scope { name: "db-intel-cli".into(), version: "0.1.0".into(), items: vec![item] }] });
    batch
}

fn resource_attrs(db_name: &str) -> Attributes {
    let mut attrs = Attributes::new();
    attrs.insert("db.name".into(), db_name.into());
    attrs.insert("db.system".into(), "postgresql".into());
    attrs.insert("host.name".into(), "db-1".into());
    attrs
}

/// Scenario 1: a log item carrying `db.statement`, expected to come out with
/// a stable `db.query.fingerprint`/`db.query.id`.
pub fn fingerprint_passthrough() -> Batch {
    let mut item = Item::new_log(0, LogRecord { body: "query executed".into(), severity: Severity::Info });
    item.set_attr("db.statement", "SELECT * FROM t WHERE id = 42 AND name = 'x'");
    single_item_batch(resource_attrs("appdb"), item)
}

/// Scenario 2: two metric items for the same statement, 10 seconds apart,
/// with structurally different plans (a sequential scan replacing an index
/// scan). The second should come out `plan.changed=true`.
pub fn plan_regression() -> Batch {
    let statement = "SELECT * FROM orders WHERE customer_id = 7";
    let plan_v1 = r#"{"Plan": {"Node Type": "Index Scan", "Total Cost": 4.2, "Plan Rows": 1}}"#;
    let plan_v2 = r#"{"Plan": {"Node Type": "Seq Scan", "Total Cost": 910.0, "Plan Rows": 50000}}"#;

    let mut item1 = Item::new_metric(0, MetricDataPoint { name: "db.query.duration".into(), unit: "ms".into(), kind: MetricKind::Gauge, value: 1.1, bucket_counts: vec![] });
    item1.set_attr("db.statement", statement);
    item1.set_attr("db.plan.json", plan_v1);

    let mut item2 = Item::new_metric(10_000_000_000, MetricDataPoint { name: "db.query.duration".into(), unit: "ms".into(), kind: MetricKind::Gauge, value: 812.4, bucket_counts: vec![] });
    item2.set_attr("db.statement", statement);
    item2.set_attr("db.plan.json", plan_v2);

    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: resource_attrs("appdb"), scopes: vec![Scope { name: "db-intel-cli".into(), version: "0.1.0".into(), items: vec![item1, item2] }] });
    batch
}

/// Scenario 3: 1,000 items sharing one `db.query.fingerprint`, to be run
/// through a rule capped at `max_rate=10/s, burst_seconds=2` -- expect at
/// most 30 survivors (10*1 + 10*2) when fed within one second.
pub fn sampling_budget() -> Batch {
    let mut scope = Scope { name: "db-intel-cli".into(), version: "0.1.0".into(), items: Vec::with_capacity(1000) };
    for i in 0..1000u64 {
        let mut item = Item::new_log(i, LogRecord { body: "slow query".into(), severity: Severity::Warn });
        item.set_attr("db.query.fingerprint", 424_242_i64);
        item.set_attr("db.statement", "SELECT * FROM hot_table WHERE id = ?");
        scope.items.push(item);
    }
    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: resource_attrs("appdb"), scopes: vec![scope] });
    batch
}

/// Scenario 4: 100 items for one database, to be replayed after the caller
/// has driven the breaker open via `CircuitBreaker::report_outcome`
/// (`failure_threshold` consecutive failures). All 100 are expected to drop.
pub fn circuit_trip_candidates() -> Batch {
    let mut scope = Scope { name: "db-intel-cli".into(), version: "0.1.0".into(), items: Vec::with_capacity(100) };
    for i in 0..100u64 {
        let item = Item::new_log(i, LogRecord { body: "after outage".into(), severity: Severity::Info });
        scope.items.push(item);
    }
    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: resource_attrs("flaky-db"), scopes: vec![scope] });
    batch
}

/// Scenario 5: an item whose `query` attribute carries an email and an SSN,
/// expected to survive Verification with both substrings redacted.
pub fn pii_redaction() -> Batch {
    let mut item = Item::new_log(0, LogRecord { body: String::new(), severity: Severity::Info });
    item.set_attr("query", "SELECT * FROM u WHERE email='a@b.com' AND ssn='123-45-6789'");
    single_item_batch(resource_attrs("appdb"), item)
}

/// Scenario 6: enough items to push ~1.5MiB through a window prorated to
/// 1MiB, expected to trip `costcontrol.mode="emergency"` and drop everything
/// that doesn't match the configured `critical_predicate`.
pub fn cost_emergency() -> Batch {
    let payload = "x".repeat(4000);
    let mut scope = Scope { name: "db-intel-cli".into(), version: "0.1.0".into(), items: Vec::with_capacity(400) };
    for i in 0..400u64 {
        let mut item = Item::new_log(i, LogRecord { body: "bulk payload".into(), severity: Severity::Info });
        item.set_attr("payload", payload.clone());
        item.set_attr("priority", if i % 50 == 0 { "critical" } else { "normal" });
        scope.items.push(item);
    }
    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: resource_attrs("appdb"), scopes: vec![scope] });
    batch
}

/// Looks up a named fixture by the `replay` subcommand's argument. Returns
/// `None` for anything not in the fixed scenario set -- callers fall back to
/// reading the argument as a JSON file path instead.
pub fn named(name: &str) -> Option<Batch> {
    match name {
        "fingerprint-passthrough" => Some(fingerprint_passthrough()),
        "plan-regression" => Some(plan_regression()),
        "sampling-budget" => Some(sampling_budget()),
        "circuit-trip" => Some(circuit_trip_candidates()),
        "pii-redaction" => Some(pii_redaction()),
        "cost-emergency" => Some(cost_emergency()),
        _ => None,
    }
}
