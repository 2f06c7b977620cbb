//! Keeps downstream cost within a configured monthly budget, proportionally
//! throttling as thresholds are crossed: throttle the sampler, drop
//! non-essential attributes, enter emergency mode, and finally open a cost
//! circuit that drops everything for a cooldown (original spec §4.6).
//!
//! State is a single `Mutex`-guarded window plus an `AtomicU8` mode so
//! concurrent readers (tests, the CLI harness) can cheaply snapshot the
//! current mode without taking the lock -- the same "uncontended fast path,
//! short critical section on transition" shape `circuit_breaker` uses.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;

use common::batch::{Attributes, Batch};
use common::config::CostControlConfig;
use common::error::CResult;
use common::host::Host;
use common::hyperloglog::HyperLogLog;
use common::knob::SamplerRateKnob;
use common::processor::{CancellationToken, Processor};

use crate::adaptive_sampler::predicate::Predicate;

/// Average seconds in a calendar month, used to prorate `monthly_budget_bytes`
/// down to the configured window. Not exact (months vary 28-31 days); the
/// estimator in original spec §4.6 is explicitly approximate, and a fixed
/// constant keeps the proration stable across runs.
const SECONDS_PER_MONTH: f64 = 30.0 * 24.0 * 3600.0;

const MODE_NORMAL: u8 = 0;
const MODE_THROTTLE: u8 = 1;
const MODE_DROP_ATTRS: u8 = 2;
const MODE_EMERGENCY: u8 = 3;
const MODE_CIRCUIT: u8 = 4;

fn mode_name(mode: u8) -> &'static str {
    match mode {
        MODE_NORMAL => "normal",
        MODE_THROTTLE => "throttle",
        MODE_DROP_ATTRS => "drop_attrs",
        MODE_EMERGENCY => "emergency",
        MODE_CIRCUIT => "circuit",
        _ => unreachable!(),
    }
}

struct WindowState {
    bytes: u64,
    items: u64,
    window_start: Instant,
    distinct_values: HyperLogLog,
    circuit_opened_at: Option<Instant>,
}

impl WindowState {
    fn new() -> Self {
        WindowState { bytes: 0, items: 0, window_start: Instant::now(), distinct_values: HyperLogLog::new(), circuit_opened_at: None }
    }

    fn reset(&mut self) {
        self.bytes = 0;
        self.items = 0;
        self.window_start = Instant::now();
        self.distinct_values = HyperLogLog::new();
    }
}

pub struct CostControl {
    config: CostControlConfig,
    window_budget_bytes: f64,
    window: Duration,
    critical_predicate: Option<Predicate>,
    sampler_knob: Option<Arc<dyn SamplerRateKnob>>,
    mode: AtomicU8,
    state: Mutex<WindowState>,
}

impl CostControl {
    pub fn new(config: CostControlConfig) -> Result<Self, common::error::CoreError> {
        let critical_predicate = config.critical_predicate.as_deref().map(Predicate::compile).transpose()?;
        let window_budget_bytes = config.monthly_budget_bytes as f64 * config.window_secs as f64 / SECONDS_PER_MONTH;
        Ok(CostControl {
            window_budget_bytes,
            window: Duration::from_secs(config.window_secs),
            critical_predicate,
            sampler_knob: None,
            mode: AtomicU8::new(MODE_NORMAL),
            state: Mutex::new(WindowState::new()),
            config,
        })
    }

    /// Wires the sampler-rate control knob this processor drives at the
    /// `throttle` threshold (original spec §4.6's "via a control knob").
    /// `pipeline::chain` calls this once at construction time; it's separate
    /// from `new` so `CostControl` doesn't need to know `AdaptiveSampler`'s
    /// concrete type at compile time.
    pub fn with_sampler_knob(mut self, knob: Arc<dyn SamplerRateKnob>) -> Self {
        self.sampler_knob = Some(knob);
        self
    }

    pub fn current_mode(&self) -> &'static str {
        mode_name(self.mode.load(Ordering::Acquire))
    }

    pub fn utilization(&self) -> f64 {
        let state = self.state.lock().unwrap();
        state.bytes as f64 / self.window_budget_bytes.max(1.0)
    }

    /// Crosses a cumulative threshold up, or de-escalates only once
    /// utilization falls below `threshold - hysteresis` -- this is what
    /// makes emergency mode "persist until utilization < 0.9 and then always
    /// exit" (original spec §8, testable property 6) instead of flapping at
    /// the raw 0.95 boundary.
    fn next_mode(&self, current: u8, utilization: f64) -> u8 {
        let t = &self.config.thresholds;
        let h = t.hysteresis;

        if utilization >= t.circuit {
            return MODE_CIRCUIT;
        }
        if utilization >= t.emergency || (current >= MODE_EMERGENCY && utilization >= t.emergency - h) {
            return MODE_EMERGENCY;
        }
        if utilization >= t.drop_attrs || (current >= MODE_DROP_ATTRS && utilization >= t.drop_attrs - h) {
            return MODE_DROP_ATTRS;
        }
        if utilization >= t.throttle || (current >= MODE_THROTTLE && utilization >= t.throttle - h) {
            return MODE_THROTTLE;
        }
        MODE_NORMAL
    }

    fn merged_attributes(resource_attrs: &Attributes, item_attrs: &Attributes) -> Attributes {
        let mut merged = resource_attrs.clone();
        merged.extend(item_attrs.clone());
        merged
    }

    fn is_critical(&self, attrs: &Attributes) -> bool {
        match &self.critical_predicate {
            Some(predicate) => predicate.evaluate(attrs),
            // Open Question default (original spec §9): nothing is critical
            // except self-metrics, which bypass this check entirely.
            None => false,
        }
    }

    /// Applies the action for `mode`, returning `(dropped_attrs, dropped_items)`.
    /// Actions are cumulative: emergency implies drop-attrs and throttle too.
    fn apply_mode(&self, mode: u8, batch: &mut Batch) -> (u64, u64) {
        let mut dropped_attrs = 0u64;
        let mut dropped_items = 0u64;

        if mode == MODE_CIRCUIT {
            batch.retain_items(|_resource, item| {
                if item.is_self_metric() {
                    return true;
                }
                dropped_items += 1;
                false
            });
            return (dropped_attrs, dropped_items);
        }

        if mode == MODE_EMERGENCY {
            batch.retain_items(|resource, item| {
                if item.is_self_metric() {
                    return true;
                }
                let merged = Self::merged_attributes(&resource.attributes, &item.attributes);
                let keep = self.is_critical(&merged);
                if !keep {
                    dropped_items += 1;
                }
                keep
            });
        }

        if mode >= MODE_DROP_ATTRS && !self.config.non_essential_attributes.is_empty() {
            batch.for_each_item_mut(|_resource_attrs, item| {
                if item.is_self_metric() {
                    return;
                }
                for key in &self.config.non_essential_attributes {
                    if item.attributes.remove(key).is_some() {
                        dropped_attrs += 1;
                    }
                }
            });
        }

        if let Some(knob) = &self.sampler_knob {
            if mode >= MODE_THROTTLE {
                knob.set_rate_multiplier(0.75);
            } else {
                knob.set_rate_multiplier(1.0);
            }
        }

        (dropped_attrs, dropped_items)
    }
}

#[async_trait]
impl Processor for CostControl {
    fn name(&self) -> &'static str {
        "cost_control"
    }

    async fn consume_batch(&self, ctx: &CancellationToken, batch: &mut Batch, host: &dyn Host) -> CResult<()> {
        let mode;
        let utilization;

        {
            let mut state = self.state.lock().unwrap();

            if state.window_start.elapsed() >= self.window {
                state.reset();
            }

            if let Some(opened_at) = state.circuit_opened_at {
                if opened_at.elapsed() < Duration::from_secs(self.config.cooldown_secs) {
                    drop(state);
                    self.mode.store(MODE_CIRCUIT, Ordering::Release);
                    let (_attrs, items) = self.apply_mode(MODE_CIRCUIT, batch);
                    ctx.check()?;
                    if items > 0 {
                        host.metrics().incr_counter("costcontrol.dropped_items", items as f64);
                    }
                    host.metrics().set_gauge("costcontrol.utilization", self.utilization());
                    return Ok(());
                } else {
                    state.circuit_opened_at = None;
                }
            }

            for resource in &batch.resources {
                for scope in &resource.scopes {
                    for item in &scope.items {
                        if item.is_self_metric() {
                            continue;
                        }
                        state.bytes += item.estimated_bytes() as u64;
                        state.items += 1;
                        for (key, value) in &item.attributes {
                            state.distinct_values.insert(&format!("{key}={}", value.display()));
                        }
                    }
                }
            }

            utilization = state.bytes as f64 / self.window_budget_bytes.max(1.0);
            let current = self.mode.load(Ordering::Acquire);
            mode = self.next_mode(current, utilization);
            self.mode.store(mode, Ordering::Release);

            if mode == MODE_CIRCUIT && current != MODE_CIRCUIT {
                state.circuit_opened_at = Some(Instant::now());
            }
        }

        let (dropped_attrs, dropped_items) = self.apply_mode(mode, batch);

        ctx.check()?;

        host.metrics().set_gauge("costcontrol.utilization", utilization);
        host.metrics().set_gauge(&format!("costcontrol.mode.{}", mode_name(mode)), 1.0);
        if dropped_attrs > 0 {
            host.metrics().incr_counter("costcontrol.dropped_attrs", dropped_attrs as f64);
        }
        if dropped_items > 0 {
            host.metrics().incr_counter("costcontrol.dropped_items", dropped_items as f64);
        }

        Ok(())
    }
}
