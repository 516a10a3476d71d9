//! Event Observers
//!
//! Observers subscribe to the EventBus:
//! - `logging`: structured logging via tracing
//! - `metrics`: Prometheus-compatible counters

pub mod logging;
pub mod metrics;

pub use logging::LoggingObserver;
pub use metrics::{Metrics, MetricsObserver};
