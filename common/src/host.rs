use std::collections::HashMap;
use std::sync::Mutex;

/// A counter or gauge registered by a processor. Values are `f64` so both
/// integer counters and fractional gauges (e.g. `costcontrol.utilization`)
/// fit the same registry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricKind {
    Counter,
    Gauge,
}

#[derive(Debug, Default)]
struct MetricEntry {
    kind: Option<MetricKind>,
    value: f64,
}

/// An in-memory metric registry handed to processors via `Host`. Production
/// hosts would forward these into the shared telemetry pipeline (see
/// `Batch::push_self_metric`); this registry additionally lets the CLI
/// harness and tests read back what a processor recorded.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    entries: Mutex<HashMap<String, MetricEntry>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        MetricRegistry::default()
    }

    pub fn incr_counter(&self, name: &str, delta: f64) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(name.to_string()).or_default();
        entry.kind = Some(MetricKind::Counter);
        entry.value += delta;
    }

    pub fn set_gauge(&self, name: &str, value: f64) {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(name.to_string()).or_default();
        entry.kind = Some(MetricKind::Gauge);
        entry.value = value;
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.entries.lock().unwrap().get(name).map(|e| e.value)
    }

    pub fn snapshot(&self) -> HashMap<String, f64> {
        self.entries.lock().unwrap().iter().map(|(k, v)| (k.clone(), v.value)).collect()
    }

    /// Same as `snapshot`, but keeps the counter/gauge distinction so a
    /// caller can translate entries into `MetricDataPoint`s without guessing
    /// their kind (used by `pipeline::chain` to emit self-observability items).
    pub fn snapshot_with_kind(&self) -> HashMap<String, (MetricKind, f64)> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(k, v)| v.kind.map(|kind| (k.clone(), (kind, v.value))))
            .collect()
    }
}

/// Feature detection: lets a processor ask "does this source support X"
/// without depending on a concrete receiver implementation. Original spec §6
/// names this as one of the host's "optional extension lookups".
pub trait FeatureGate: Send + Sync {
    fn supports(&self, feature: &str) -> bool;
}

/// A `FeatureGate` that reports every feature as supported; the default for
/// the CLI harness and for tests that don't care about feature negotiation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysSupported;

impl FeatureGate for AlwaysSupported {
    fn supports(&self, _feature: &str) -> bool {
        true
    }
}

/// Exposed to every processor's `Start`/`ConsumeBatch` call: logging, metric
/// registration, and feature detection. Processors never retain a reference
/// to the host past the call that handed it to them.
pub trait Host: Send + Sync {
    fn metrics(&self) -> &MetricRegistry;
    fn features(&self) -> &dyn FeatureGate;
}

/// The suite's own `Host` implementation, backing the CLI harness and tests.
/// `pipeline::HostImpl` wraps this with the concrete chain wiring.
pub struct SimpleHost {
    metrics: MetricRegistry,
    features: Box<dyn FeatureGate>,
}

impl SimpleHost {
    pub fn new() -> Self {
        SimpleHost { metrics: MetricRegistry::new(), features: Box::new(AlwaysSupported) }
    }

    pub fn with_features(features: Box<dyn FeatureGate>) -> Self {
        SimpleHost { metrics: MetricRegistry::new(), features }
    }
}

impl Default for SimpleHost {
    fn default() -> Self {
        SimpleHost::new()
    }
}

impl Host for SimpleHost {
    fn metrics(&self) -> &MetricRegistry {
        &self.metrics
    }

    fn features(&self) -> &dyn FeatureGate {
        self.features.as_ref()
    }
}
