//! Utility modules for kgc-engine

pub mod pool_monitor;
pub mod retry;
pub mod text;

pub use pool_monitor::{begin_monitored, MonitoredTransaction};
pub use retry::{retry_with_backoff, RetryPolicy};
