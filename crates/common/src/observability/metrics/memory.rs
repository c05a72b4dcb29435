//! In-memory metrics sink for tests and health endpoints

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::observability::traits::MetricsSink;

/// Metric identity: name plus tags sorted by key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MetricKey {
    /// Metric name
    pub name: String,
    /// Tags sorted by key
    pub tags: Vec<(String, String)>,
}

impl MetricKey {
    fn new(name: &str, tags: &[(&str, &str)]) -> Self {
        let mut tags: Vec<(String, String)> =
            tags.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        tags.sort();
        Self { name: name.to_string(), tags }
    }

    fn matches(&self, name: &str, tags: &[(&str, &str)]) -> bool {
        self.name == name
            && tags.iter().all(|(k, v)| self.tags.iter().any(|(tk, tv)| tk == k && tv == v))
    }
}

#[derive(Debug, Default)]
struct Recorded {
    counters: HashMap<MetricKey, u64>,
    gauges: HashMap<MetricKey, f64>,
    histograms: HashMap<MetricKey, Vec<f64>>,
}

/// Sink that keeps every emitted value in memory
///
/// Lookups take a tag filter: a recorded series matches when it carries every
/// filter tag, so `counter("x", &[])` sums all series of `x`.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    recorded: Mutex<Recorded>,
}

impl InMemoryMetrics {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of all counter series named `name` matching `tags`
    pub fn counter(&self, name: &str, tags: &[(&str, &str)]) -> u64 {
        self.recorded
            .lock()
            .counters
            .iter()
            .filter(|(key, _)| key.matches(name, tags))
            .map(|(_, value)| *value)
            .sum()
    }

    /// Latest value of the first gauge series matching `tags`
    pub fn gauge_value(&self, name: &str, tags: &[(&str, &str)]) -> Option<f64> {
        self.recorded
            .lock()
            .gauges
            .iter()
            .find(|(key, _)| key.matches(name, tags))
            .map(|(_, value)| *value)
    }

    /// All histogram observations named `name` matching `tags`
    pub fn observations(&self, name: &str, tags: &[(&str, &str)]) -> Vec<f64> {
        self.recorded
            .lock()
            .histograms
            .iter()
            .filter(|(key, _)| key.matches(name, tags))
            .flat_map(|(_, values)| values.iter().copied())
            .collect()
    }

    /// Every counter series recorded so far
    pub fn counters(&self) -> HashMap<MetricKey, u64> {
        self.recorded.lock().counters.clone()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        *self.recorded.lock() = Recorded::default();
    }
}

impl MetricsSink for InMemoryMetrics {
    fn increment(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        *self.recorded.lock().counters.entry(MetricKey::new(name, tags)).or_insert(0) += value;
    }

    fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.recorded.lock().gauges.insert(MetricKey::new(name, tags), value);
    }

    fn histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.recorded.lock().histograms.entry(MetricKey::new(name, tags)).or_default().push(value);
    }
}
