pub mod chain;
pub mod host_impl;

pub use chain::ProcessorChain;
pub use host_impl::HostImpl;
