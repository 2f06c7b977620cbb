pub mod tracing_factory;
pub mod rate_limited;

pub use rate_limited::RateLimitedLogger;
pub use tracing_factory::{LoggingOptions, OutputType, init_logging};
