pub mod adaptive_sampler;
pub mod circuit_breaker;
pub mod cost_control;
pub mod nrerror_monitor;
pub mod plan_attr_extractor;
pub mod query_correlator;
pub mod verification;
