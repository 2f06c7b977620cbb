use common::batch::AttributeValue;
use common::config::SuiteConfig;
use common::host::SimpleHost;
use common::processor::CancellationToken;
use pipeline::ProcessorChain;

/// Scenario 5 (original spec §8): an item carrying an email and an SSN in a
/// single attribute survives Verification with both substrings redacted and
/// neither literal value present anywhere in the surviving attributes.
#[tokio::test]
async fn pii_is_redacted_and_the_item_survives() {
    let chain = ProcessorChain::new(SuiteConfig::default()).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut batch = cli::fixtures::pii_redaction();
    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    assert_eq!(batch.item_count(), 1);
    let item = &batch.resources[0].scopes[0].items[0];
    let AttributeValue::String(query) = item.attr("query").unwrap() else { panic!("expected string attribute") };

    assert!(query.contains("[REDACTED:email]"));
    assert!(query.contains("[REDACTED:ssn]"));
    assert!(!query.contains("a@b.com"));
    assert!(!query.contains("123-45-6789"));
}
