use thiserror::Error;

/// Error taxonomy shared by every processor in the chain.
///
/// `ConsumeBatch` only ever returns `Canceled` or an error that means one of
/// its own invariants could not be met; everything else (drops, budget
/// overruns, parse failures) is handled item-locally and surfaced as a
/// self-metric instead, per the suite's error handling design.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Fatal at startup: invalid predicate, unknown config key, conflicting rules.
    #[error("config error: {0}")]
    Config(String),

    /// Item-local: plan or SQL unparseable. Never propagated out of `ConsumeBatch`;
    /// the offending item is passed through with a diagnostic attribute instead.
    #[error("parse error: {0}")]
    Parse(String),

    /// Batch-scoped, non-fatal: CostControl dropped items because a budget was exceeded.
    #[error("budget exceeded: {0}")]
    BudgetExceeded(String),

    /// Item-local drop, with the reason recorded for the `{processor,reason}` self-metric.
    #[error("dropped: {reason}")]
    Dropped { reason: String },

    /// Pipeline-scoped: forwarded back from an export attempt so CircuitBreaker can observe it.
    #[error("downstream error: {0}")]
    Downstream(String),

    /// The cancellation token observed between sub-steps was set; the partial batch is discarded.
    #[error("canceled")]
    Canceled,
}

impl CoreError {
    pub fn dropped(reason: impl Into<String>) -> Self {
        CoreError::Dropped { reason: reason.into() }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, CoreError::Canceled)
    }
}

pub type CResult<T> = Result<T, CoreError>;
