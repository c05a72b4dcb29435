//! Metrics sink implementations

mod memory;
#[cfg(feature = "prometheus")]
mod prometheus;

pub use memory::{InMemoryMetrics, MetricKey};
#[cfg(feature = "prometheus")]
pub use self::prometheus::PrometheusMetrics;
