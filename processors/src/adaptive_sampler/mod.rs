//! Reduces item volume per-rule while retaining high-signal items, via a
//! token-bucket sampler whose rate is periodically nudged toward a
//! configured target throughput.

pub mod bucket;
pub mod predicate;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use common::batch::{Attributes, Batch};
use common::config::{AdaptiveSamplerConfig, DefaultAction, RuleConfig};
use common::error::{CResult, CoreError};
use common::host::Host;
use common::knob::SamplerRateKnob;
use common::processor::{CancellationToken, Processor};

use bucket::BucketTable;
use predicate::Predicate;

/// The gain applied to the proportional controller's rate adjustment, and
/// the smoothing factor for the observed-rate EMA. Neither is named in the
/// distilled spec (original spec's Open Question D); this suite fixes both
/// constants so the controller's behavior is reproducible across runs -- see
/// `SPEC_FULL.md` §D for the rationale.
const CONTROLLER_GAIN: f64 = 0.5;
const EMA_ALPHA: f64 = 0.3;

struct RuleRuntime {
    name: String,
    predicate: Predicate,
    key_attribute: String,
    min_rate: f64,
    max_rate: f64,
    target_budget_per_sec: f64,
    burst_seconds: f64,
    sample_on_match: f64,
    priority: i32,
    current_rate: Mutex<f64>,
    ema_accept_rate: Mutex<f64>,
    accepted_since_adjust: AtomicU64,
    last_adjust: Mutex<Instant>,
}

impl RuleRuntime {
    fn compile(config: &RuleConfig) -> Result<Self, CoreError> {
        let predicate = Predicate::compile(&config.predicate)?;
        if config.min_rate > config.max_rate {
            return Err(CoreError::Config(format!("rule {:?}: min_rate > max_rate", config.name)));
        }
        let initial_rate = config.target_budget_per_sec.clamp(config.min_rate, config.max_rate);
        Ok(RuleRuntime {
            name: config.name.clone(),
            predicate,
            key_attribute: config.key_attribute.clone(),
            min_rate: config.min_rate,
            max_rate: config.max_rate,
            target_budget_per_sec: config.target_budget_per_sec,
            burst_seconds: config.burst_seconds,
            sample_on_match: config.sample_on_match,
            priority: config.priority,
            current_rate: Mutex::new(initial_rate),
            ema_accept_rate: Mutex::new(config.target_budget_per_sec),
            accepted_since_adjust: AtomicU64::new(0),
            last_adjust: Mutex::new(Instant::now()),
        })
    }

    /// Proportional controller: nudges `current_rate` toward
    /// `target_budget_per_sec` based on the EMA-smoothed observed accept
    /// rate, clamped to `[min_rate, max_rate]`.
    fn maybe_adjust(&self, adjust_interval: Duration) {
        let mut last_adjust = self.last_adjust.lock().unwrap();
        let elapsed = last_adjust.elapsed();
        if elapsed < adjust_interval {
            return;
        }

        let accepted = self.accepted_since_adjust.swap(0, Ordering::Relaxed) as f64;
        let observed_rate = accepted / elapsed.as_secs_f64().max(0.001);

        let mut ema = self.ema_accept_rate.lock().unwrap();
        *ema = EMA_ALPHA * observed_rate + (1.0 - EMA_ALPHA) * *ema;

        let error = self.target_budget_per_sec - *ema;
        let mut rate = self.current_rate.lock().unwrap();
        *rate = (*rate + CONTROLLER_GAIN * error).clamp(self.min_rate, self.max_rate);

        *last_adjust = Instant::now();
    }
}

pub struct AdaptiveSampler {
    rules: Vec<RuleRuntime>,
    default_action: DefaultAction,
    adjust_interval: Duration,
    buckets: BucketTable,
    rng: Mutex<StdRng>,
    /// Driven by `CostControl` via `SamplerRateKnob` (original spec §4.6's
    /// "control knob"): `1.0` is unthrottled, `0.75` matches the 25%
    /// reduction applied at the `throttle` cost threshold.
    rate_multiplier: Mutex<f64>,
}

impl AdaptiveSampler {
    pub fn new(config: AdaptiveSamplerConfig) -> Result<Self, CoreError> {
        let mut rules: Vec<RuleRuntime> = config.rules.iter().map(RuleRuntime::compile).collect::<Result<_, _>>()?;
        // Stable sort: first matching rule "by priority, then order" (original spec §4.3).
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));

        Ok(AdaptiveSampler {
            rules,
            default_action: config.default_action,
            adjust_interval: Duration::from_secs(config.adjust_interval_secs),
            buckets: BucketTable::new(10_000),
            rng: Mutex::new(StdRng::seed_from_u64(config.rng_seed)),
            rate_multiplier: Mutex::new(1.0),
        })
    }

    fn merged_attributes(resource_attrs: &Attributes, item_attrs: &Attributes) -> Attributes {
        let mut merged = resource_attrs.clone();
        merged.extend(item_attrs.clone());
        merged
    }

    /// Returns `true` to keep the item, `false` to drop it.
    fn decide(&self, attrs: &Attributes) -> bool {
        for rule in &self.rules {
            if !rule.predicate.evaluate(attrs) {
                continue;
            }

            rule.maybe_adjust(self.adjust_interval);

            let key = attrs.get(&rule.key_attribute).map(|v| v.display()).unwrap_or_default();
            let rate = *rule.current_rate.lock().unwrap() * *self.rate_multiplier.lock().unwrap();
            let draw: f64 = self.rng.lock().unwrap().gen_range(0.0..1.0);
            let sampled = draw <= rule.sample_on_match;

            let accepted = self.buckets.try_consume(&rule.name, &key, rate, rule.burst_seconds, sampled);
            if accepted {
                rule.accepted_since_adjust.fetch_add(1, Ordering::Relaxed);
            }
            return accepted;
        }

        matches!(self.default_action, DefaultAction::Keep)
    }
}

impl SamplerRateKnob for AdaptiveSampler {
    fn set_rate_multiplier(&self, multiplier: f64) {
        *self.rate_multiplier.lock().unwrap() = multiplier;
    }

    fn rate_multiplier(&self) -> f64 {
        *self.rate_multiplier.lock().unwrap()
    }
}

#[async_trait]
impl Processor for AdaptiveSampler {
    fn name(&self) -> &'static str {
        "adaptive_sampler"
    }

    async fn consume_batch(&self, ctx: &CancellationToken, batch: &mut Batch, host: &dyn Host) -> CResult<()> {
        let mut dropped: u64 = 0;
        let mut kept: u64 = 0;

        batch.retain_items(|resource, item| {
            if item.is_self_metric() {
                kept += 1;
                return true;
            }
            let merged = Self::merged_attributes(&resource.attributes, &item.attributes);
            let keep = self.decide(&merged);
            if keep {
                kept += 1;
            } else {
                dropped += 1;
            }
            keep
        });

        ctx.check()?;

        host.metrics().incr_counter("adaptivesampler.kept", kept as f64);
        host.metrics().incr_counter("adaptivesampler.dropped", dropped as f64);
        host.metrics().set_gauge("adaptivesampler.bucket_count", self.buckets.len() as f64);

        Ok(())
    }
}
