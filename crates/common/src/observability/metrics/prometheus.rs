//! Prometheus-backed metrics sink
//!
//! Metric families are created lazily on first emission and registered with
//! the sink's own [`Registry`]. Tag keys become label names, so every
//! emission of a given metric must use the same tag keys.

use dashmap::DashMap;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use tracing::warn;

use crate::observability::traits::MetricsSink;

/// [`MetricsSink`] that records into a Prometheus [`Registry`]
#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    counters: DashMap<String, CounterVec>,
    gauges: DashMap<String, GaugeVec>,
    histograms: DashMap<String, HistogramVec>,
}

impl std::fmt::Debug for PrometheusMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrometheusMetrics")
            .field("counters", &self.counters.len())
            .field("gauges", &self.gauges.len())
            .field("histograms", &self.histograms.len())
            .finish_non_exhaustive()
    }
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new(Registry::new())
    }
}

impl PrometheusMetrics {
    /// Create a sink that registers into `registry`
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            counters: DashMap::new(),
            gauges: DashMap::new(),
            histograms: DashMap::new(),
        }
    }

    /// Underlying registry, for wiring into an exporter
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all registered families in the text exposition format
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(error) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            warn!(%error, "failed to encode prometheus metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    fn split(tags: &[(&str, &str)]) -> (Vec<String>, Vec<String>) {
        let mut sorted = tags.to_vec();
        sorted.sort_unstable();
        sorted.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).unzip()
    }

    fn counter_vec(&self, name: &str, labels: &[String]) -> Option<CounterVec> {
        if let Some(existing) = self.counters.get(name) {
            return Some(existing.clone());
        }
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let vec = CounterVec::new(Opts::new(name, name), &label_refs)
            .and_then(|vec| self.registry.register(Box::new(vec.clone())).map(|()| vec));
        match vec {
            Ok(vec) => Some(self.counters.entry(name.to_string()).or_insert(vec).clone()),
            Err(error) => {
                warn!(metric = name, %error, "failed to register counter");
                None
            }
        }
    }

    fn gauge_vec(&self, name: &str, labels: &[String]) -> Option<GaugeVec> {
        if let Some(existing) = self.gauges.get(name) {
            return Some(existing.clone());
        }
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let vec = GaugeVec::new(Opts::new(name, name), &label_refs)
            .and_then(|vec| self.registry.register(Box::new(vec.clone())).map(|()| vec));
        match vec {
            Ok(vec) => Some(self.gauges.entry(name.to_string()).or_insert(vec).clone()),
            Err(error) => {
                warn!(metric = name, %error, "failed to register gauge");
                None
            }
        }
    }

    fn histogram_vec(&self, name: &str, labels: &[String]) -> Option<HistogramVec> {
        if let Some(existing) = self.histograms.get(name) {
            return Some(existing.clone());
        }
        let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        let vec = HistogramVec::new(HistogramOpts::new(name, name), &label_refs)
            .and_then(|vec| self.registry.register(Box::new(vec.clone())).map(|()| vec));
        match vec {
            Ok(vec) => Some(self.histograms.entry(name.to_string()).or_insert(vec).clone()),
            Err(error) => {
                warn!(metric = name, %error, "failed to register histogram");
                None
            }
        }
    }
}

impl MetricsSink for PrometheusMetrics {
    fn increment(&self, name: &str, value: u64, tags: &[(&str, &str)]) {
        let (labels, values) = Self::split(tags);
        let Some(vec) = self.counter_vec(name, &labels) else { return };
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        match vec.get_metric_with_label_values(&values) {
            #[allow(clippy::cast_precision_loss)]
            Ok(counter) => counter.inc_by(value as f64),
            Err(error) => warn!(metric = name, %error, "counter label mismatch"),
        }
    }

    fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        let (labels, values) = Self::split(tags);
        let Some(vec) = self.gauge_vec(name, &labels) else { return };
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        match vec.get_metric_with_label_values(&values) {
            Ok(gauge) => gauge.set(value),
            Err(error) => warn!(metric = name, %error, "gauge label mismatch"),
        }
    }

    fn histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        let (labels, values) = Self::split(tags);
        let Some(vec) = self.histogram_vec(name, &labels) else { return };
        let values: Vec<&str> = values.iter().map(String::as_str).collect();
        match vec.get_metric_with_label_values(&values) {
            Ok(histogram) => histogram.observe(value),
            Err(error) => warn!(metric = name, %error, "histogram label mismatch"),
        }
    }
}
