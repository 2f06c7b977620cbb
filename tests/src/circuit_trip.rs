use common::config::{CircuitBreakerConfig, SuiteConfig};
use common::host::SimpleHost;
use common::processor::CancellationToken;
use pipeline::ProcessorChain;

/// Scenario 4 (original spec §8): after `failure_threshold` consecutive
/// downstream failures for a database, the next batch of items for that
/// database is dropped entirely while the breaker is open.
#[tokio::test]
async fn circuit_trips_and_drops_all_items_for_the_database() {
    let mut config = SuiteConfig::default();
    config.circuit_breaker = CircuitBreakerConfig { failure_threshold: 5, open_duration_secs: 30, max_open_duration_secs: 300, half_open_probes: 1 };

    let chain = ProcessorChain::new(config).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    for _ in 0..5 {
        chain.circuit_breaker().report_outcome("flaky-db", false);
    }

    let mut batch = cli::fixtures::circuit_trip_candidates();
    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    assert_eq!(batch.item_count(), 0);
}
