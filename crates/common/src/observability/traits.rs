//! Metrics sink abstraction
//!
//! Components hold a [`SharedMetrics`] handle and emit counters, gauges and
//! histograms with string tags. Implementations decide where the data goes.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Destination for counters, gauges and histogram observations
///
/// All methods are infallible; implementations swallow backend errors.
pub trait MetricsSink: Send + Sync + Debug {
    /// Add `value` to the counter `name`
    fn increment(&self, name: &str, value: u64, tags: &[(&str, &str)]);

    /// Set the gauge `name` to `value`
    fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]);

    /// Record one histogram observation
    fn histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]);

    /// Record a duration as a histogram observation in seconds
    fn timing(&self, name: &str, elapsed: Duration, tags: &[(&str, &str)]) {
        self.histogram(name, elapsed.as_secs_f64(), tags);
    }
}

/// Shared handle to a metrics sink
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Sink that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _value: u64, _tags: &[(&str, &str)]) {}

    fn gauge(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}

    fn histogram(&self, _name: &str, _value: f64, _tags: &[(&str, &str)]) {}
}

/// Default sink used when a component is built without one
pub fn noop_metrics() -> SharedMetrics {
    Arc::new(NoopMetrics)
}
