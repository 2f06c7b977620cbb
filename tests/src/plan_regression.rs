use common::config::SuiteConfig;
use common::host::SimpleHost;
use common::processor::CancellationToken;
use pipeline::ProcessorChain;

/// Scenario 2 (original spec §8): two metric items for the same statement,
/// the second with a structurally different plan, must come out with
/// `plan.changed=true` and `plan.prev_hash` equal to the first item's hash.
#[tokio::test]
async fn plan_regression_is_flagged_on_structural_change() {
    let chain = ProcessorChain::new(SuiteConfig::default()).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut batch = cli::fixtures::plan_regression();
    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    assert_eq!(batch.item_count(), 2);
    let items = &batch.resources[0].scopes[0].items;

    let hash1 = items[0].attr("plan.hash").and_then(|v| v.as_int()).expect("first item has a plan hash");
    assert_eq!(items[0].attr("plan.changed"), None);

    assert_eq!(items[1].attr("plan.changed").and_then(|v| match v { common::batch::AttributeValue::Bool(b) => Some(*b), _ => None }), Some(true));
    assert_eq!(items[1].attr("plan.prev_hash").and_then(|v| v.as_int()), Some(hash1));
}
