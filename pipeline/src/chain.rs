//! Wires the seven processors into the fixed pipeline order from original
//! spec §2: `PlanAttributeExtractor -> QueryCorrelator -> AdaptiveSampler ->
//! CircuitBreaker -> Verification -> CostControl -> NRErrorMonitor`.
//!
//! This is the one place in the workspace that's allowed to know two
//! processors' concrete types at once: `CostControl` needs a handle on
//! `AdaptiveSampler`'s rate knob (original spec §4.6), and callers need a
//! handle on `CircuitBreaker` to report downstream export outcomes (original
//! spec §4.4). Everywhere else, processors only interact through `Batch`.

use std::collections::HashMap;
use std::sync::Arc;

use common::batch::{Batch, MetricDataPoint, MetricKind as BatchMetricKind};
use common::config::SuiteConfig;
use common::error::CResult;
use common::host::{Host, MetricKind as HostMetricKind};
use common::knob::SamplerRateKnob;
use common::processor::{CancellationToken, Processor, ShutdownHandle};
use common::time_util::now_nanos;

use processors::adaptive_sampler::AdaptiveSampler;
use processors::circuit_breaker::CircuitBreaker;
use processors::cost_control::CostControl;
use processors::nrerror_monitor::NrErrorMonitor;
use processors::plan_attr_extractor::PlanAttributeExtractor;
use processors::query_correlator::QueryCorrelator;
use processors::verification::Verification;

pub struct ProcessorChain {
    processors: Vec<Arc<dyn Processor>>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl ProcessorChain {
    pub fn new(config: SuiteConfig) -> CResult<Self> {
        let plan_attr_extractor = Arc::new(PlanAttributeExtractor::new(config.plan_attribute_extractor));
        let query_correlator = Arc::new(QueryCorrelator::new(config.query_correlator));
        let adaptive_sampler = Arc::new(AdaptiveSampler::new(config.adaptive_sampler)?);
        let circuit_breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker));
        let verification = Arc::new(Verification::new(config.verification)?);

        let sampler_knob: Arc<dyn SamplerRateKnob> = adaptive_sampler.clone();
        let cost_control = Arc::new(CostControl::new(config.cost_control)?.with_sampler_knob(sampler_knob));

        let nrerror_monitor = Arc::new(NrErrorMonitor::new(config.nrerror_monitor));

        let processors: Vec<Arc<dyn Processor>> = vec![
            plan_attr_extractor,
            query_correlator,
            adaptive_sampler,
            circuit_breaker.clone(),
            verification,
            cost_control,
            nrerror_monitor,
        ];

        Ok(ProcessorChain { processors, circuit_breaker })
    }

    /// The shared breaker handle: exporters (out of scope per original spec
    /// §1) call `report_outcome` on this after each export attempt.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    pub async fn start_all(&self, host: &dyn Host) -> CResult<()> {
        for processor in &self.processors {
            processor.start(host).await?;
        }
        Ok(())
    }

    /// Runs every processor in the fixed pipeline order, checking the
    /// cancellation token between each (original spec §5's "check it between
    /// major sub-steps"). A processor's own internal error only propagates
    /// here on `Canceled` or an unmet invariant; everything else is handled
    /// by dropping/mutating items and returning `Ok`.
    ///
    /// After each stage, whatever counters/gauges that stage just touched are
    /// injected into `batch` as `nr.self=true` items (original spec §6/§9's
    /// self-observability loop) so downstream exporters actually see them,
    /// rather than only the in-process `MetricRegistry` a test or the CLI can
    /// read back.
    pub async fn run_batch(&self, ctx: &CancellationToken, batch: &mut common::batch::Batch, host: &dyn Host) -> CResult<()> {
        for processor in &self.processors {
            if let Err(e) = ctx.check() {
                tracing::debug!(processor = processor.name(), "cancellation observed before stage");
                return Err(e);
            }
            let before = host.metrics().snapshot_with_kind();
            processor.consume_batch(ctx, batch, host).await?;
            let after = host.metrics().snapshot_with_kind();
            emit_self_metrics(batch, processor.name(), &before, &after);
        }
        Ok(())
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle::new(self.processors.clone())
    }
}

/// Diffs `before`/`after` metric-registry snapshots and appends one
/// self-metric item per entry that changed, tagged with the owning
/// processor's name. Counters only ever grow, so "changed" also catches the
/// first observation of a brand-new counter/gauge.
fn emit_self_metrics(batch: &mut Batch, processor: &str, before: &HashMap<String, (HostMetricKind, f64)>, after: &HashMap<String, (HostMetricKind, f64)>) {
    let now = now_nanos();
    for (name, (kind, value)) in after {
        if before.get(name) == Some(&(*kind, *value)) {
            continue;
        }
        let metric_kind = match kind {
            HostMetricKind::Counter => BatchMetricKind::Sum,
            HostMetricKind::Gauge => BatchMetricKind::Gauge,
        };
        batch.push_self_metric(
            processor,
            MetricDataPoint { name: name.clone(), unit: "1".into(), kind: metric_kind, value: *value, bucket_counts: vec![] },
            now,
        );
    }
}
