use common::config::{AdaptiveSamplerConfig, DefaultAction, RuleConfig, SuiteConfig};
use common::host::SimpleHost;
use common::processor::CancellationToken;
use pipeline::ProcessorChain;

/// Scenario 3 (original spec §8): a rule capped at `max_rate=10/s,
/// burst_seconds=2` fed 1,000 items sharing one key within one second must
/// emit no more than `max_rate*1 + max_rate*burst_seconds = 30`.
#[tokio::test]
async fn sampling_stays_within_rate_plus_burst() {
    let mut config = SuiteConfig::default();
    config.adaptive_sampler = AdaptiveSamplerConfig {
        rules: vec![RuleConfig {
            name: "hot-fingerprint".into(),
            predicate: "db.query.fingerprint == 424242".into(),
            key_attribute: "db.query.fingerprint".into(),
            min_rate: 10.0,
            max_rate: 10.0,
            target_budget_per_sec: 10.0,
            burst_seconds: 2.0,
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

    let mut batch = cli::fixtures::sampling_budget();
    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    assert!(batch.item_count() <= 30, "expected at most 30 survivors, got {}", batch.item_count());
}
