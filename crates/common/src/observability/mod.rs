//! Observability primitives for the resilience layer
//!
//! - [`traits`]: the [`MetricsSink`] abstraction every component emits through
//! - [`metrics`]: sink implementations (in-memory, Prometheus)
//! - [`logging`]: `tracing-subscriber` initialisation for binaries and tests
//!
//! Emission is best-effort: sinks never return errors to the caller, so a
//! broken metrics backend cannot fail an outbound call.

pub mod metrics;
pub mod traits;

#[cfg(feature = "observability")]
pub mod logging;

#[cfg(feature = "observability")]
pub use logging::{init_tracing, try_init_tracing};
#[cfg(feature = "prometheus")]
pub use metrics::PrometheusMetrics;
pub use metrics::{InMemoryMetrics, MetricKey};
pub use traits::{noop_metrics, MetricsSink, NoopMetrics, SharedMetrics};
