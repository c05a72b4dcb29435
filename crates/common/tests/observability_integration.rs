//! Integration tests for the observability module.
//!
//! Validates that resilience components report through any `MetricsSink`,
//! that the Prometheus sink renders their series, and that tracing
//! initialisation is idempotent-safe.

#![cfg(all(feature = "runtime", feature = "prometheus"))]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use trialflow_common::observability::{try_init_tracing, MetricsSink, PrometheusMetrics, SharedMetrics};
use trialflow_common::resilience::{
    BatchConfig, BatchProcessor, CircuitBreaker, CircuitBreakerConfig, ConcurrencyLimiter, LimiterConfig,
    LimiterRegistry, MockClock,
};

type Emitted = Arc<Mutex<Vec<(String, String, f64)>>>;

/// Sink recording every emission as (kind, name, value).
#[derive(Debug, Default, Clone)]
struct RecordingSink {
    emitted: Emitted,
}

impl RecordingSink {
    fn names(&self, kind: &str) -> Vec<String> {
        self.emitted
            .lock()
            .expect("recording mutex poisoned")
            .iter()
            .filter(|(k, _, _)| k == kind)
            .map(|(_, name, _)| name.clone())
            .collect()
    }

    fn record(&self, kind: &str, name: &str, value: f64) {
        self.emitted.lock().expect("recording mutex poisoned").push((kind.to_string(), name.to_string(), value));
    }
}

impl MetricsSink for RecordingSink {
    fn increment(&self, name: &str, value: u64, _tags: &[(&str, &str)]) {
        #[allow(clippy::cast_precision_loss)]
        self.record("counter", name, value as f64);
    }

    fn gauge(&self, name: &str, value: f64, _tags: &[(&str, &str)]) {
        self.record("gauge", name, value);
    }

    fn histogram(&self, name: &str, value: f64, _tags: &[(&str, &str)]) {
        self.record("histogram", name, value);
    }
}

#[derive(Debug, thiserror::Error)]
#[error("upstream unavailable")]
struct Unavailable;

/// Validates a custom sink receives breaker and limiter emissions.
///
/// Assertions:
/// - Ensures the open transition emits the state gauge value 2.
/// - Confirms limiter acquisitions and releases are both reported.
#[test]
fn test_custom_sink_receives_component_metrics() {
    let sink = RecordingSink::default();
    let shared: SharedMetrics = Arc::new(sink.clone());

    let config = CircuitBreakerConfig::builder().name("pubmed").failure_threshold(1).build().expect("valid");
    let breaker = CircuitBreaker::with_metrics(config, MockClock::new(), Arc::clone(&shared)).expect("valid");
    let _ = breaker.call(|| Err::<(), _>(Unavailable));

    let limiter = ConcurrencyLimiter::with_metrics("pubmed", 1, shared).expect("valid");
    drop(limiter.acquire());

    let counters = sink.names("counter");
    assert!(counters.iter().any(|name| name == "circuit_breaker_open_events"));
    assert!(counters.iter().any(|name| name == "semaphore_acquisitions_total"));
    assert!(counters.iter().any(|name| name == "semaphore_releases_total"));

    let last_state = sink
        .emitted
        .lock()
        .expect("recording mutex poisoned")
        .iter()
        .rev()
        .find(|(kind, name, _)| kind == "gauge" && name == "circuit_breaker_state")
        .map(|(_, _, value)| *value);
    assert_eq!(last_state, Some(2.0));
}

/// Validates the Prometheus sink renders series from live components.
///
/// Assertions:
/// - Ensures breaker counters carry the breaker name label.
/// - Ensures batch histograms and limiter gauges are exported.
#[tokio::test]
async fn test_prometheus_renders_component_series() {
    let prometheus = Arc::new(PrometheusMetrics::default());
    let shared: SharedMetrics = prometheus.clone();

    let breaker = CircuitBreaker::with_metrics(CircuitBreakerConfig::named("trials"), MockClock::new(), Arc::clone(&shared))
        .expect("valid");
    for _ in 0..3 {
        breaker.call(|| Ok::<_, Unavailable>(())).expect("closed breaker passes calls");
    }

    let registry = LimiterRegistry::new(LimiterConfig::default()).expect("valid").with_metrics(Arc::clone(&shared));
    let processor = BatchProcessor::from_registry(BatchConfig::for_service("trials", "fetch"), &registry)
        .expect("valid")
        .with_metrics(shared);
    processor
        .process_batch(vec![1_u32, 2, 3], |n| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok::<_, Unavailable>(n)
        })
        .await
        .expect("batch succeeds");

    let rendered = prometheus.render();
    assert!(rendered.contains(r#"circuit_breaker_total_calls{name="trials"} 3"#), "{rendered}");
    assert!(rendered.contains(r#"circuit_breaker_state{name="trials"} 0"#), "{rendered}");
    assert!(rendered.contains("batch_processor_duration_bucket"), "{rendered}");
    assert!(rendered.contains(r#"semaphore_current_value{service="trials"} 10"#), "{rendered}");
}

#[test]
fn test_tracing_init_only_once() {
    let _first = try_init_tracing("trialflow_common=debug");
    assert!(try_init_tracing("trialflow_common=debug").is_err());
}
