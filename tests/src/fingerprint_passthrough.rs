use common::config::SuiteConfig;
use common::host::SimpleHost;
use common::processor::CancellationToken;
use common::tokenizer::{fingerprint, short_query_id};
use pipeline::ProcessorChain;

/// Scenario 1 (original spec §8): a log item carrying `db.statement` survives
/// with a stable `db.query.fingerprint` and `db.query.id` derived from it.
#[tokio::test]
async fn basic_fingerprint_and_passthrough() {
    let chain = ProcessorChain::new(SuiteConfig::default()).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut batch = cli::fixtures::fingerprint_passthrough();
    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    assert_eq!(batch.item_count(), 1);
    let item = &batch.resources[0].scopes[0].items[0];

    let expected_fp = fingerprint("select * from t where id = ? and name = ?");
    assert_eq!(item.attr("db.query.fingerprint").and_then(|v| v.as_int()), Some(expected_fp as i64));
    assert_eq!(item.attr_str("db.query.id"), Some(short_query_id(expected_fp).as_str()));
}
