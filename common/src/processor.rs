use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::future::join_all;

use crate::batch::Batch;
use crate::error::{CResult, CoreError};
use crate::host::Host;

/// Declares whether a processor mutates the batch it is handed. Non-mutating
/// processors (none in this suite, but the contract allows for them) let the
/// pipeline runtime skip a defensive clone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub mutates_data: bool,
}

/// Cooperative cancellation: checked between per-resource / per-scope
/// boundaries, never polled in a busy loop. Cloning shares the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    canceled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> CResult<()> {
        if self.is_canceled() {
            Err(CoreError::Canceled)
        } else {
            Ok(())
        }
    }
}

/// The uniform contract every processor in the chain implements. Processors do
/// not know about each other; they compose purely through `Batch` semantics
/// (original spec §2).
#[async_trait]
pub trait Processor: Send + Sync {
    fn name(&self) -> &'static str;

    fn capabilities(&self) -> Capabilities {
        Capabilities { mutates_data: true }
    }

    async fn start(&self, host: &dyn Host) -> CResult<()> {
        let _ = host;
        Ok(())
    }

    /// Processes the batch in place. Returns `Ok(())` on best-effort success
    /// even if items were dropped; returns `Err` only on `Canceled` or when an
    /// internal invariant cannot be met (original spec §7).
    async fn consume_batch(&self, ctx: &CancellationToken, batch: &mut Batch, host: &dyn Host) -> CResult<()>;

    /// Flushes counters and releases LRU maps. Idempotent.
    async fn shutdown(&self, host: &dyn Host) -> CResult<()> {
        let _ = host;
        Ok(())
    }
}

/// Runs every registered processor's `shutdown` concurrently and returns the
/// first error encountered, mirroring the teacher's `ShutdownHandle`.
pub struct ShutdownHandle {
    processors: Vec<Arc<dyn Processor>>,
}

impl ShutdownHandle {
    pub fn new(processors: Vec<Arc<dyn Processor>>) -> Self {
        ShutdownHandle { processors }
    }

    pub async fn shutdown_all(&self, host: &dyn Host) -> CResult<()> {
        let futures = self.processors.iter().map(|p| p.shutdown(host));
        let results = join_all(futures).await;
        results.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
    }
}
