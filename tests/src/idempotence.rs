//! Round-trip / idempotence properties from original spec §8: running
//! Verification twice on its own output is a no-op on surviving items,
//! NRErrorMonitor is idempotent on already-compliant input, and tokenizer
//! fingerprinting is idempotent on already-normalized SQL.

use common::batch::{Attributes, Batch, Item, ItemData, LogRecord, MetricDataPoint, MetricKind, Resource, Scope, Severity};
use common::config::{NrErrorMonitorConfig, VerificationConfig};
use common::host::SimpleHost;
use common::processor::{CancellationToken, Processor};
use common::tokenizer::{fingerprint, normalize};
use processors::nrerror_monitor::NrErrorMonitor;
use processors::verification::Verification;

fn wrap(resource_attrs: Attributes, item: Item) -> Batch {
    let mut batch = Batch::new();
    batch.resources.push(Resource { attributes: resource_attrs, scopes: vec![Scope { name: String::new(), version: String::new(), items: vec![item] }] });
    batch
}

/// Running Verification on its own output a second time leaves the
/// surviving item byte-for-byte unchanged: PII is already redacted (no
/// fresh matches), required fields are already present, and cardinality
/// bookkeeping has already observed the value.
#[tokio::test]
async fn verification_is_a_no_op_on_its_own_output() {
    let verification = Verification::new(VerificationConfig::default()).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut resource_attrs = Attributes::new();
    resource_attrs.insert("db.name".into(), "appdb".into());
    resource_attrs.insert("host.name".into(), "db-1".into());

    let mut item = Item::new_log(0, LogRecord { body: "contact jane@example.com for details".into(), severity: Severity::Info });
    item.set_attr("db.system", "postgresql");

    let mut batch = wrap(resource_attrs, item);
    verification.consume_batch(&ctx, &mut batch, &host).await.unwrap();
    assert_eq!(batch.item_count(), 1);
    let once = batch.resources[0].scopes[0].items[0].clone();

    verification.consume_batch(&ctx, &mut batch, &host).await.unwrap();
    assert_eq!(batch.item_count(), 1);
    let twice = batch.resources[0].scopes[0].items[0].clone();

    assert_eq!(once, twice);
}

/// NRErrorMonitor run twice on input that's already compliant (short
/// values, clean names, few attributes) makes no further changes the
/// second time.
#[tokio::test]
async fn nrerror_monitor_is_idempotent_on_compliant_input() {
    let monitor = NrErrorMonitor::new(NrErrorMonitorConfig::default());
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut item = Item::new_metric(0, MetricDataPoint { name: "db.query.duration".into(), unit: "ms".into(), kind: MetricKind::Gauge, value: 12.5, bucket_counts: vec![] });
    item.set_attr("db.name", "appdb");
    item.set_attr("db.system", "postgresql");

    let mut batch = wrap(Attributes::new(), item);
    monitor.consume_batch(&ctx, &mut batch, &host).await.unwrap();
    let once = batch.resources[0].scopes[0].items[0].clone();

    monitor.consume_batch(&ctx, &mut batch, &host).await.unwrap();
    let twice = batch.resources[0].scopes[0].items[0].clone();

    assert_eq!(once, twice);
}

/// NRErrorMonitor run twice on non-compliant input converges after the
/// first pass: sanitized keys, truncated values, and a sanitized metric name
/// are all already compliant, so the second pass changes nothing further.
#[tokio::test]
async fn nrerror_monitor_converges_after_one_pass_on_noncompliant_input() {
    let config = NrErrorMonitorConfig { max_attr_bytes: 16, max_attrs_per_item: 4, max_metric_name_bytes: 24 };
    let monitor = NrErrorMonitor::new(config);
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut item = Item::new_metric(
        0,
        MetricDataPoint { name: "9 this metric name! is way too long for the limit".into(), unit: "ms".into(), kind: MetricKind::Gauge, value: 1.0, bucket_counts: vec![] },
    );
    item.set_attr("1 bad key!", "a".repeat(100));
    item.set_attr("another key", "b");

    let mut batch = wrap(Attributes::new(), item);
    monitor.consume_batch(&ctx, &mut batch, &host).await.unwrap();
    let once = batch.resources[0].scopes[0].items[0].clone();

    monitor.consume_batch(&ctx, &mut batch, &host).await.unwrap();
    let twice = batch.resources[0].scopes[0].items[0].clone();

    assert_eq!(once, twice);

    for key in once.attributes.keys() {
        assert!(key.chars().next().map(|c| !c.is_ascii_digit()).unwrap_or(true));
    }
    if let ItemData::Metric(m) = &once.data {
        assert!(m.name.len() <= 24);
    } else {
        panic!("expected metric item");
    }
}

/// Tokenization is idempotent: normalizing an already-normalized statement
/// changes nothing, so its fingerprint matches the original's.
#[tokio::test]
async fn tokenizer_fingerprinting_is_idempotent() {
    let sql = "SELECT * FROM orders WHERE customer_id = 7 AND status IN (1, 2, 3)";
    let normalized_once = normalize(sql);
    let normalized_twice = normalize(&normalized_once);

    assert_eq!(normalized_once, normalized_twice);
    assert_eq!(fingerprint(sql), fingerprint(&normalized_once));
}
