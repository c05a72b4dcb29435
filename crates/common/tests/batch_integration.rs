//! Integration tests for the batch processor
//!
//! Runs batches over a shared limiter registry, with the settings loader
//! building the processors.

#![cfg(all(feature = "runtime", feature = "test-utils"))]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use trialflow_common::observability::InMemoryMetrics;
use trialflow_common::resilience::batch::metric_names;
use trialflow_common::resilience::{BatchConfig, BatchError, BatchProcessor, LimiterRegistry, ResilienceSettings};
use trialflow_common::testing::{assert_approx_eq, ScriptedError};

/// Validates a mixed batch keeps order and isolates failures.
///
/// Assertions:
/// - Ensures every successful item keeps its position.
/// - Confirms failing items get the handler's placeholder.
/// - Confirms the error rate reflects the failures.
#[tokio::test(start_paused = true)]
async fn test_mixed_batch_with_placeholders() {
    let registry = LimiterRegistry::default();
    let metrics = Arc::new(InMemoryMetrics::new());
    let config = BatchConfig { max_batch_size: 4, ..BatchConfig::for_service("clinicaltrials", "details") };
    let processor = BatchProcessor::from_registry(config, &registry).expect("valid").with_metrics(metrics.clone());

    let ids: Vec<String> = (1..=9).map(|n| format!("NCT{n:08}")).collect();
    let results = processor
        .process_batch_with_handler(
            ids.clone(),
            |id| async move {
                let n: u64 = id[3..].parse().expect("numeric suffix");
                tokio::time::sleep(Duration::from_millis(200 - n * 20)).await;
                if n % 3 == 0 {
                    Err(ScriptedError::Transient { call: n as usize })
                } else {
                    Ok(format!("{id}: found"))
                }
            },
            |id, _err| async move { format!("{id}: unavailable") },
        )
        .await
        .expect("handler absorbs failures");

    assert_eq!(results.len(), ids.len());
    for (id, result) in ids.iter().zip(&results) {
        assert!(result.starts_with(id.as_str()), "{result} out of order");
    }
    assert_eq!(results[2], "NCT00000003: unavailable");
    assert_eq!(results[3], "NCT00000004: found");

    let stats = processor.stats();
    assert_eq!(stats.total_errors, 3);
    assert_eq!(stats.total_processed, 9);
    assert_approx_eq(processor.error_rate(), 3.0 / 9.0, 1e-9);
    assert_eq!(metrics.counter(metric_names::ERRORS, &[("service", "clinicaltrials")]), 3);
    assert_eq!(metrics.observations(metric_names::SINGLE_BATCH_DURATION, &[]).len(), 3);
    assert_eq!(registry.limiter("clinicaltrials").available_permits(), 5);
}

#[tokio::test]
async fn test_failure_without_handler_reports_index() {
    let registry = LimiterRegistry::default();
    let processor = BatchProcessor::from_registry(BatchConfig::for_service("llm", "summarize"), &registry)
        .expect("valid");
    let calls = Arc::new(AtomicUsize::new(0));

    let err = processor
        .process_batch(vec!["a", "b", "bad", "d"], |item| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if item == "bad" {
                    Err(ScriptedError::Permanent { call: 3 })
                } else {
                    Ok(item.len())
                }
            }
        })
        .await
        .expect_err("bad item aborts the call");

    assert!(matches!(err, BatchError::Item { index: 2, .. }));
    assert_eq!(processor.stats().batch_count, 0);
    assert_eq!(registry.limiter("llm").available_permits(), 10);
}

/// Validates settings-built processors adapt from their configured target.
///
/// Assertions:
/// - Ensures slow rounds shrink the size down to the minimum and not below.
#[tokio::test(start_paused = true)]
async fn test_settings_built_processor_adapts() {
    let settings = ResilienceSettings::from_toml_str(
        "[batch]\nmax_batch_size = 10\nmin_batch_size = 4\ntarget_latency = 1\n",
    )
    .expect("valid settings");
    let registry = LimiterRegistry::new(settings.limiter.clone()).expect("valid");
    let processor = settings.batch_processor("clinicaltrials", "search", &registry).expect("valid");

    let mut sizes = Vec::new();
    for _ in 0..4 {
        processor
            .process_batch((0..10).collect::<Vec<u32>>(), |n| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, ScriptedError>(n)
            })
            .await
            .expect("succeeds");
        sizes.push(processor.current_batch_size());
    }

    assert_eq!(sizes, vec![8, 6, 4, 4]);
}
