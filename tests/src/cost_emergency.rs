use common::config::{CostControlConfig, CostControlThresholds, SuiteConfig};
use common::host::{Host, SimpleHost};
use common::processor::CancellationToken;
use pipeline::ProcessorChain;

/// Scenario 6 (original spec §8): `monthly_budget_bytes` prorated so a
/// ~1.5MB batch pushes utilization past `emergency` (0.95) but short of
/// `circuit` (1.10). Only items matching `critical_predicate` survive, and
/// `costcontrol.mode.emergency` is set.
#[tokio::test]
async fn cost_emergency_drops_everything_but_critical_items() {
    let mut config = SuiteConfig::default();
    config.cost_control = CostControlConfig {
        // `cli::fixtures::cost_emergency` emits 400 items that each pick up
        // `db.name`/`db.system`/`host.name` via Verification's synthesize
        // policy before reaching this processor, landing at ~4129-4131 bytes
        // each (~1.65MB total); this budget prorates to a ~1.6MB window,
        // giving a utilization of ~1.03 -- past `emergency` (0.95) but short
        // of `circuit` (1.10).
        monthly_budget_bytes: 1_155_000_000,
        window_secs: 3600,
        thresholds: CostControlThresholds::default(),
        critical_predicate: Some(r#"priority == "critical""#.to_string()),
        non_essential_attributes: vec![],
        cooldown_secs: 60,
    };

    let chain = ProcessorChain::new(config).unwrap();
    let host = SimpleHost::new();
    let ctx = CancellationToken::new();

    let mut batch = cli::fixtures::cost_emergency();
    chain.run_batch(&ctx, &mut batch, &host).await.unwrap();

    // every surviving item must be tagged `priority=critical`.
    for resource in &batch.resources {
        for scope in &resource.scopes {
            for item in &scope.items {
                assert_eq!(item.attr_str("priority"), Some("critical"));
            }
        }
    }
    assert!(batch.item_count() > 0, "expected at least the critical items to survive");
    assert!(batch.item_count() < 400, "expected non-critical items to be dropped");

    assert_eq!(host.metrics().get("costcontrol.mode.emergency"), Some(1.0));
    assert!(host.metrics().get("costcontrol.utilization").unwrap_or(0.0) > 0.95);
}
