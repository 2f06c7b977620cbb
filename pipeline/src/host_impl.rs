//! The concrete `Host` wiring used outside of tests: a `tracing`-backed
//! rate-limited logger alongside `common::host::SimpleHost`'s in-memory
//! metric registry and feature gate. Original spec §6 names the host
//! contract ("logging, metric registration, optional extension lookups")
//! without an implementation; this is that implementation.

use std::sync::Mutex;

use common::host::{FeatureGate, Host, MetricRegistry, SimpleHost};
use common::log::RateLimitedLogger;

/// One rate-limited logger per processor name, lazily created on first use so
/// `HostImpl` doesn't need every processor name enumerated up front.
struct LoggerRegistry {
    loggers: Mutex<Vec<(&'static str, RateLimitedLogger)>>,
}

impl LoggerRegistry {
    fn new() -> Self {
        LoggerRegistry { loggers: Mutex::new(Vec::new()) }
    }

    fn warn(&self, processor: &'static str, message: &str) {
        let mut loggers = self.loggers.lock().unwrap();
        if let Some((_, logger)) = loggers.iter().find(|(name, _)| *name == processor) {
            logger.warn(message);
            return;
        }
        let logger = RateLimitedLogger::new(processor);
        logger.warn(message);
        loggers.push((processor, logger));
    }
}

pub struct HostImpl {
    inner: SimpleHost,
    loggers: LoggerRegistry,
}

impl HostImpl {
    pub fn new() -> Self {
        HostImpl { inner: SimpleHost::new(), loggers: LoggerRegistry::new() }
    }

    pub fn with_features(features: Box<dyn FeatureGate>) -> Self {
        HostImpl { inner: SimpleHost::with_features(features), loggers: LoggerRegistry::new() }
    }

    /// Logs a warning through the per-processor rate-limited bucket
    /// (original spec §7: "<=10 lines/sec per processor"). Processors reach
    /// this indirectly -- today only the CLI harness and pipeline glue call
    /// it directly; processors log via `tracing` macros and this budget
    /// applies equally to those once routed through a subscriber filter.
    pub fn warn(&self, processor: &'static str, message: &str) {
        self.loggers.warn(processor, message);
    }
}

impl Default for HostImpl {
    fn default() -> Self {
        HostImpl::new()
    }
}

impl Host for HostImpl {
    fn metrics(&self) -> &MetricRegistry {
        self.inner.metrics()
    }

    fn features(&self) -> &dyn FeatureGate {
        self.inner.features()
    }
}
