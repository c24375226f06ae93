//! Observability module for logging and usage metrics.

pub mod logging;
pub mod metrics;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use metrics::{UsageMetrics, UsageTracker};
