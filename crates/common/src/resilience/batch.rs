//! Adaptive batch processing
//!
//! [`BatchProcessor`] splits a list of items into contiguous sub-batches and
//! runs them concurrently, at most `max_concurrent` at a time. Each sub-batch
//! holds one permit of the processor's [`ConcurrencyLimiter`] while its items
//! run concurrently. Results always come back in input order.
//!
//! After each call the per-item latency (call duration divided by item count)
//! enters a bounded rolling window. The sub-batch size shrinks when the
//! window average is above the target latency and grows when it is well
//! below it.
//!
//! ```rust,ignore
//! let processor = BatchProcessor::new(BatchConfig::for_service("trials", "fetch"), limiter)?;
//! let studies = processor
//!     .process_batch_with_handler(ids, fetch_study, |_, _| async { Study::missing() })
//!     .await?;
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures::future;
use futures::stream::{self, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::concurrency::{ConcurrencyLimiter, LimiterPermit, LimiterRegistry};
use super::error::PermitTimeout;
use crate::error::{ConfigError, ConfigResult, ErrorClassification, ErrorSeverity};
use crate::observability::{noop_metrics, SharedMetrics};
use crate::utils::short_type_name;

/// Metric names emitted by batch processors
pub mod metric_names {
    /// Calls to `process_batch`
    pub const BATCHES: &str = "batch_processor_batches_total";
    /// Sub-batch size used by a call
    pub const BATCH_SIZE: &str = "batch_processor_batch_size";
    /// Failed items
    pub const ERRORS: &str = "batch_processor_errors_total";
    /// Whole-call duration in seconds
    pub const DURATION: &str = "batch_processor_duration";
    /// Throughput of a call
    pub const ITEMS_PER_SECOND: &str = "batch_processor_items_per_second";
    /// Duration of one sub-batch in seconds
    pub const SINGLE_BATCH_DURATION: &str = "batch_processor_single_batch_duration";
}

/// Errors returned by [`BatchProcessor::process_batch`]
#[derive(Debug, Error)]
pub enum BatchError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    /// An item failed and no error handler was supplied
    #[error("Batch item {index} failed: {source}")]
    Item {
        /// Position of the item in the input
        index: usize,
        /// The item's error
        #[source]
        source: E,
    },

    /// A sub-batch could not get a limiter permit in time
    #[error(transparent)]
    Permit(#[from] PermitTimeout),
}

impl<E> ErrorClassification for BatchError<E>
where
    E: std::error::Error + ErrorClassification + Send + Sync + 'static,
{
    fn is_retryable(&self) -> bool {
        match self {
            Self::Item { source, .. } => source.is_retryable(),
            Self::Permit(err) => err.is_retryable(),
        }
    }

    fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Item { source, .. } => source.severity(),
            Self::Permit(err) => err.severity(),
        }
    }
}

/// Batch processor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Service name used for metric tags
    pub service: String,
    /// Operation name used for metric tags
    pub operation: String,
    /// Largest sub-batch size; also the starting size
    pub max_batch_size: usize,
    /// Smallest sub-batch size adaptive sizing may pick
    pub min_batch_size: usize,
    /// Sub-batches allowed to run at once
    pub max_concurrent: usize,
    /// Adjust the sub-batch size from observed latency
    pub adaptive_sizing: bool,
    /// Per-item latency the sizing aims for
    #[serde(with = "crate::utils::duration_millis")]
    pub target_latency: Duration,
    /// Multiplier applied when latency is above target
    pub shrink_factor: f64,
    /// Multiplier applied when latency is well below target
    pub grow_factor: f64,
    /// Fraction of the target below which the size grows
    pub grow_threshold: f64,
    /// Latency samples kept in the rolling window
    pub latency_window: usize,
    /// Wait bound for a sub-batch's limiter permit
    #[serde(with = "crate::utils::option_duration_millis")]
    pub acquire_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            service: "default".to_string(),
            operation: "batch_process".to_string(),
            max_batch_size: 10,
            min_batch_size: 1,
            max_concurrent: 5,
            adaptive_sizing: true,
            target_latency: Duration::from_millis(1000),
            shrink_factor: 0.8,
            grow_factor: 1.2,
            grow_threshold: 0.5,
            latency_window: 10,
            acquire_timeout: None,
        }
    }
}

impl BatchConfig {
    /// Defaults tagged with `service` and `operation`
    pub fn for_service(service: impl Into<String>, operation: impl Into<String>) -> Self {
        Self { service: service.into(), operation: operation.into(), ..Self::default() }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error when a size or factor is out of range.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_batch_size == 0 {
            return Err(ConfigError::invalid("min_batch_size must be greater than 0"));
        }
        if self.max_batch_size < self.min_batch_size {
            return Err(ConfigError::invalid("max_batch_size must be at least min_batch_size"));
        }
        if self.max_concurrent == 0 {
            return Err(ConfigError::invalid("max_concurrent must be greater than 0"));
        }
        if !(self.shrink_factor > 0.0 && self.shrink_factor <= 1.0) {
            return Err(ConfigError::invalid("shrink_factor must be in (0, 1]"));
        }
        if !(self.grow_factor >= 1.0 && self.grow_factor.is_finite()) {
            return Err(ConfigError::invalid("grow_factor must be at least 1"));
        }
        if !(self.grow_threshold > 0.0 && self.grow_threshold <= 1.0) {
            return Err(ConfigError::invalid("grow_threshold must be in (0, 1]"));
        }
        if self.latency_window == 0 {
            return Err(ConfigError::invalid("latency_window must be greater than 0"));
        }
        Ok(())
    }
}

/// Snapshot of a processor's counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStats {
    /// Items processed by completed calls
    pub total_processed: u64,
    /// Items that failed
    pub total_errors: u64,
    /// Completed calls
    pub batch_count: u64,
    /// Sub-batch size the next call starts from
    pub current_batch_size: usize,
    /// `total_errors / max(total_processed, 1)`
    pub error_rate: f64,
    /// Rolling average per-item latency in milliseconds
    pub avg_latency_ms: f64,
}

#[derive(Debug)]
struct AdaptiveState {
    current_batch_size: usize,
    latencies: VecDeque<f64>,
    total_processed: u64,
    total_errors: u64,
    batch_count: u64,
}

impl AdaptiveState {
    #[allow(clippy::cast_precision_loss)]
    fn average_latency(&self) -> Option<f64> {
        if self.latencies.is_empty() {
            return None;
        }
        Some(self.latencies.iter().sum::<f64>() / self.latencies.len() as f64)
    }
}

/// Runs items through an async processor in adaptive, order-preserving
/// sub-batches
pub struct BatchProcessor {
    config: BatchConfig,
    limiter: ConcurrencyLimiter,
    state: Mutex<AdaptiveState>,
    metrics: SharedMetrics,
}

impl fmt::Debug for BatchProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchProcessor")
            .field("config", &self.config)
            .field("limiter", &self.limiter)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl BatchProcessor {
    /// Processor whose sub-batches take permits from `limiter`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: BatchConfig, limiter: ConcurrencyLimiter) -> ConfigResult<Self> {
        config.validate()?;
        let state = AdaptiveState {
            current_batch_size: config.max_batch_size,
            latencies: VecDeque::with_capacity(config.latency_window),
            total_processed: 0,
            total_errors: 0,
            batch_count: 0,
        };
        Ok(Self { config, limiter, state: Mutex::new(state), metrics: noop_metrics() })
    }

    /// Processor using the registry's limiter for the configured service
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn from_registry(config: BatchConfig, registry: &LimiterRegistry) -> ConfigResult<Self> {
        let limiter = registry.limiter(&config.service);
        Self::new(config, limiter)
    }

    /// Emit batch metrics into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Processor configuration
    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Sub-batch size the next call will use (before capping by item count)
    pub fn current_batch_size(&self) -> usize {
        self.state.lock().current_batch_size
    }

    /// Failed items over processed items
    #[allow(clippy::cast_precision_loss)]
    pub fn error_rate(&self) -> f64 {
        let state = self.state.lock();
        state.total_errors as f64 / state.total_processed.max(1) as f64
    }

    /// Snapshot of the counters and sizing state
    #[allow(clippy::cast_precision_loss)]
    pub fn stats(&self) -> BatchStats {
        let state = self.state.lock();
        BatchStats {
            total_processed: state.total_processed,
            total_errors: state.total_errors,
            batch_count: state.batch_count,
            current_batch_size: state.current_batch_size,
            error_rate: state.total_errors as f64 / state.total_processed.max(1) as f64,
            avg_latency_ms: state.average_latency().unwrap_or(0.0),
        }
    }

    /// Process every item, failing the call on the first item error
    ///
    /// Returns an empty vector without calling `processor` when `items` is
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Item`] for the first failing item in input
    /// order. The failing item's sub-batch runs to completion; sub-batches
    /// not yet finished are dropped. Returns [`BatchError::Permit`]
    /// when a sub-batch times out waiting for its permit.
    #[instrument(
        level = "debug",
        skip_all,
        fields(service = %self.config.service, operation = %self.config.operation, items = items.len())
    )]
    pub async fn process_batch<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        processor: F,
    ) -> Result<Vec<R>, BatchError<E>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run(items, processor).await
    }

    /// Process every item, substituting `error_handler`'s result for items
    /// that fail
    ///
    /// One item's failure never affects its siblings.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::Permit`] when a sub-batch times out waiting for
    /// its permit.
    #[instrument(
        level = "debug",
        skip_all,
        fields(service = %self.config.service, operation = %self.config.operation, items = items.len())
    )]
    pub async fn process_batch_with_handler<T, R, E, F, Fut, H, HFut>(
        &self,
        items: Vec<T>,
        processor: F,
        error_handler: H,
    ) -> Result<Vec<R>, BatchError<E>>
    where
        T: Clone,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        H: Fn(T, E) -> HFut,
        HFut: Future<Output = R>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let processor = &processor;
        let error_handler = &error_handler;
        self.run(items, move |item: T| {
            let original = item.clone();
            let attempt = processor(item);
            async move {
                match attempt.await {
                    Ok(result) => Ok(result),
                    Err(err) => {
                        self.record_item_error::<E>();
                        warn!(
                            service = %self.config.service,
                            operation = %self.config.operation,
                            error = %err,
                            "batch item failed, using error handler"
                        );
                        Ok::<R, E>(error_handler(original, err).await)
                    }
                }
            }
        })
        .await
    }

    async fn run<T, R, E, G, GFut>(&self, items: Vec<T>, process_item: G) -> Result<Vec<R>, BatchError<E>>
    where
        G: Fn(T) -> GFut,
        GFut: Future<Output = Result<R, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let total_items = items.len();
        let batch_size = self.current_batch_size().min(total_items);
        let tags = self.tags();

        info!(
            service = %self.config.service,
            operation = %self.config.operation,
            total_items,
            batch_size,
            max_concurrent = self.config.max_concurrent,
            "starting batch processing"
        );
        self.metrics.increment(metric_names::BATCHES, 1, &tags);
        #[allow(clippy::cast_precision_loss)]
        self.metrics.gauge(metric_names::BATCH_SIZE, batch_size as f64, &tags);

        let mut indexed = items.into_iter().enumerate().peekable();
        let mut sub_batches = Vec::with_capacity(total_items.div_ceil(batch_size));
        while indexed.peek().is_some() {
            sub_batches.push(indexed.by_ref().take(batch_size).collect::<Vec<_>>());
        }
        let sub_batch_count = sub_batches.len();

        let process_item = &process_item;
        let per_batch: Vec<Vec<R>> = stream::iter(sub_batches.into_iter().enumerate())
            .map(|(batch_idx, batch)| self.run_sub_batch(batch_idx, batch, process_item))
            .buffered(self.config.max_concurrent)
            .try_collect()
            .await?;

        let elapsed = started.elapsed();
        self.record_call(total_items, elapsed);

        let secs = elapsed.as_secs_f64();
        #[allow(clippy::cast_precision_loss)]
        let items_per_second = if secs > 0.0 { total_items as f64 / secs } else { f64::INFINITY };
        self.metrics.timing(metric_names::DURATION, elapsed, &tags);
        if items_per_second.is_finite() {
            self.metrics.histogram(metric_names::ITEMS_PER_SECOND, items_per_second, &tags);
        }
        info!(
            service = %self.config.service,
            operation = %self.config.operation,
            total_items,
            duration_ms = elapsed.as_millis(),
            sub_batches = sub_batch_count,
            "batch processing completed"
        );

        Ok(per_batch.into_iter().flatten().collect())
    }

    async fn run_sub_batch<T, R, E, G, GFut>(
        &self,
        batch_idx: usize,
        batch: Vec<(usize, T)>,
        process_item: &G,
    ) -> Result<Vec<R>, BatchError<E>>
    where
        G: Fn(T) -> GFut,
        GFut: Future<Output = Result<R, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = Instant::now();
        let _permit = self.acquire_permit().await?;

        let items = batch.into_iter().map(|(index, item)| {
            let pending = process_item(item);
            async move {
                pending.await.map_err(|source| {
                    self.record_item_error::<E>();
                    error!(
                        service = %self.config.service,
                        operation = %self.config.operation,
                        batch_idx,
                        index,
                        error = %source,
                        "batch item failed"
                    );
                    BatchError::Item { index, source }
                })
            }
        });
        // Settle the whole sub-batch so the reported error is the lowest index
        let results = future::join_all(items).await;

        self.metrics.timing(metric_names::SINGLE_BATCH_DURATION, started.elapsed(), &self.tags());
        results.into_iter().collect()
    }

    async fn acquire_permit(&self) -> Result<LimiterPermit, PermitTimeout> {
        match self.config.acquire_timeout {
            Some(timeout) => self.limiter.acquire_async_timeout(timeout).await,
            None => Ok(self.limiter.acquire_async().await),
        }
    }

    fn record_item_error<E>(&self) {
        self.state.lock().total_errors += 1;
        let error_type = short_type_name::<E>();
        let tags = [
            ("service", self.config.service.as_str()),
            ("operation", self.config.operation.as_str()),
            ("error_type", error_type),
        ];
        self.metrics.increment(metric_names::ERRORS, 1, &tags);
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn record_call(&self, item_count: usize, elapsed: Duration) {
        let mut state = self.state.lock();
        state.total_processed += item_count as u64;
        state.batch_count += 1;

        if !self.config.adaptive_sizing {
            return;
        }

        let per_item_ms = elapsed.as_secs_f64() * 1000.0 / item_count as f64;
        if state.latencies.len() == self.config.latency_window {
            state.latencies.pop_front();
        }
        state.latencies.push_back(per_item_ms);

        let Some(avg_latency_ms) = state.average_latency() else {
            return;
        };
        let target_ms = self.config.target_latency.as_secs_f64() * 1000.0;
        let current = state.current_batch_size;

        let next = if avg_latency_ms > target_ms {
            ((current as f64 * self.config.shrink_factor).floor() as usize).max(self.config.min_batch_size)
        } else if avg_latency_ms < target_ms * self.config.grow_threshold {
            ((current as f64 * self.config.grow_factor).ceil() as usize).min(self.config.max_batch_size)
        } else {
            current
        };
        state.current_batch_size = next.clamp(self.config.min_batch_size, self.config.max_batch_size);

        if state.current_batch_size != current {
            debug!(
                service = %self.config.service,
                operation = %self.config.operation,
                from = current,
                to = state.current_batch_size,
                avg_latency_ms,
                target_ms,
                "adjusted batch size"
            );
        }
    }

    fn tags(&self) -> [(&str, &str); 2] {
        [("service", self.config.service.as_str()), ("operation", self.config.operation.as_str())]
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for ordering, error isolation and adaptive sizing.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::observability::InMemoryMetrics;

    #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
    #[error("item {0} rejected")]
    struct Rejected(u32);

    fn processor(config: BatchConfig) -> BatchProcessor {
        let limiter = ConcurrencyLimiter::new(config.service.clone(), 10).expect("valid limit");
        BatchProcessor::new(config, limiter).expect("valid config")
    }

    fn slow_config(target_ms: u64) -> BatchConfig {
        BatchConfig {
            target_latency: Duration::from_millis(target_ms),
            ..BatchConfig::for_service("trials", "fetch")
        }
    }

    #[test]
    fn test_config_validation() {
        assert!(BatchConfig::default().validate().is_ok());
        let inverted = BatchConfig { min_batch_size: 5, max_batch_size: 2, ..BatchConfig::default() };
        assert!(inverted.validate().is_err());
        let no_window = BatchConfig { latency_window: 0, ..BatchConfig::default() };
        assert!(no_window.validate().is_err());
        let bad_shrink = BatchConfig { shrink_factor: 1.5, ..BatchConfig::default() };
        assert!(bad_shrink.validate().is_err());
    }

    #[tokio::test]
    async fn test_empty_input_skips_processor() {
        let processor = processor(BatchConfig::default());
        let calls = AtomicUsize::new(0);

        let results = processor
            .process_batch(Vec::<u32>::new(), |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { Ok::<_, Rejected>(n) }
            })
            .await
            .expect("empty input succeeds");

        assert!(results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(processor.stats().batch_count, 0);
    }

    /// Validates results keep input order when later items finish first.
    ///
    /// Assertions:
    /// - Ensures results match the input order exactly.
    /// - Confirms counters reflect one call over all items.
    #[tokio::test(start_paused = true)]
    async fn test_results_preserve_input_order() {
        let config = BatchConfig { max_batch_size: 3, ..BatchConfig::for_service("trials", "fetch") };
        let processor = processor(config);
        let items: Vec<u64> = (0..10).collect();

        let results = processor
            .process_batch(items.clone(), |n| async move {
                tokio::time::sleep(Duration::from_millis(100 - n * 10)).await;
                Ok::<_, Rejected>(n * 2)
            })
            .await
            .expect("all items succeed");

        assert_eq!(results, items.iter().map(|n| n * 2).collect::<Vec<_>>());
        let stats = processor.stats();
        assert_eq!(stats.total_processed, 10);
        assert_eq!(stats.batch_count, 1);
        assert_eq!(stats.total_errors, 0);
    }

    #[tokio::test]
    async fn test_error_handler_isolates_failures() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let processor = processor(BatchConfig::for_service("trials", "fetch")).with_metrics(metrics.clone());

        let results = processor
            .process_batch_with_handler(
                vec![1_u32, 2, 3, 4],
                |n| async move { if n % 2 == 0 { Err(Rejected(n)) } else { Ok(format!("ok-{n}")) } },
                |n, err| async move { format!("fallback-{n}: {err}") },
            )
            .await
            .expect("handler absorbs failures");

        assert_eq!(results, vec![
            "ok-1".to_string(),
            "fallback-2: item 2 rejected".to_string(),
            "ok-3".to_string(),
            "fallback-4: item 4 rejected".to_string(),
        ]);
        assert_eq!(processor.stats().total_errors, 2);
        assert!((processor.error_rate() - 0.5).abs() < f64::EPSILON);
        assert_eq!(metrics.counter(metric_names::ERRORS, &[("error_type", "Rejected")]), 2);
        assert_eq!(metrics.counter(metric_names::BATCHES, &[("service", "trials")]), 1);
    }

    #[tokio::test]
    async fn test_without_handler_first_failure_aborts() {
        let config = BatchConfig { max_batch_size: 2, ..BatchConfig::for_service("trials", "fetch") };
        let processor = processor(config);

        let err = processor
            .process_batch(vec![0_u32, 1, 2, 3, 4], |n| async move {
                if n == 3 { Err(Rejected(n)) } else { Ok(n) }
            })
            .await
            .expect_err("item 3 fails");

        match err {
            BatchError::Item { index, source } => {
                assert_eq!(index, 3);
                assert_eq!(source, Rejected(3));
            }
            BatchError::Permit(other) => panic!("unexpected permit error: {other}"),
        }
        assert_eq!(processor.stats().total_errors, 1);
        assert_eq!(processor.stats().total_processed, 0);
    }

    /// Validates the reported item is the first failure in input order.
    ///
    /// Assertions:
    /// - Ensures a slow failure at index 0 wins over a fast one at index 1.
    /// - Confirms both failures are counted.
    #[tokio::test(start_paused = true)]
    async fn test_item_error_reports_lowest_failing_index() {
        let config = BatchConfig { max_batch_size: 3, ..BatchConfig::for_service("trials", "fetch") };
        let processor = processor(config);

        let err = processor
            .process_batch(vec![0_u32, 1, 2], |n| async move {
                match n {
                    0 => {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Err(Rejected(n))
                    }
                    1 => {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        Err(Rejected(n))
                    }
                    _ => Ok(n),
                }
            })
            .await
            .expect_err("items 0 and 1 fail");

        match err {
            BatchError::Item { index, source } => {
                assert_eq!(index, 0);
                assert_eq!(source, Rejected(0));
            }
            BatchError::Permit(other) => panic!("unexpected permit error: {other}"),
        }
        assert_eq!(processor.stats().total_errors, 2);
    }

    /// Validates slow calls shrink the batch size and fast calls grow it back.
    ///
    /// Assertions:
    /// - Ensures a slow call shrinks 10 to 8.
    /// - Ensures a fast call grows 8 back to 10 with a one-sample window.
    #[tokio::test(start_paused = true)]
    async fn test_adaptive_shrink_then_grow() {
        let config = BatchConfig { latency_window: 1, ..slow_config(5) };
        let processor = processor(config);

        processor
            .process_batch((0..10).collect(), |n: u32| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, Rejected>(n)
            })
            .await
            .expect("slow call succeeds");
        assert_eq!(processor.current_batch_size(), 8);

        processor
            .process_batch((0..10).collect(), |n: u32| async move { Ok::<_, Rejected>(n) })
            .await
            .expect("fast call succeeds");
        assert_eq!(processor.current_batch_size(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_size_never_below_minimum() {
        let config = BatchConfig { min_batch_size: 3, ..slow_config(1) };
        let processor = processor(config);

        for _ in 0..10 {
            processor
                .process_batch(vec![1_u32, 2], |n| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, Rejected>(n)
                })
                .await
                .expect("call succeeds");
        }
        assert_eq!(processor.current_batch_size(), 3);
        assert!(processor.stats().avg_latency_ms > 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_sizing_holds_size() {
        let config = BatchConfig { adaptive_sizing: false, ..slow_config(1) };
        let processor = processor(config);

        processor
            .process_batch(vec![1_u32, 2, 3], |n| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, Rejected>(n)
            })
            .await
            .expect("call succeeds");
        assert_eq!(processor.current_batch_size(), 10);
        assert!((processor.stats().avg_latency_ms - 0.0).abs() < f64::EPSILON);
    }

    /// Validates each sub-batch holds one limiter permit.
    ///
    /// Assertions:
    /// - Ensures two sub-batches serialize on a single-permit limiter.
    #[tokio::test(start_paused = true)]
    async fn test_sub_batches_share_limiter() {
        let limiter = ConcurrencyLimiter::new("trials", 1).expect("valid limit");
        let config = BatchConfig { max_batch_size: 2, ..BatchConfig::for_service("trials", "fetch") };
        let processor = BatchProcessor::new(config, limiter.clone()).expect("valid config");
        let started = Instant::now();

        let results = processor
            .process_batch(vec![1_u32, 2, 3, 4], |n| async move {
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok::<_, Rejected>(n)
            })
            .await
            .expect("call succeeds");

        assert_eq!(results, vec![1, 2, 3, 4]);
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert_eq!(limiter.available_permits(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_timeout_surfaces() {
        let limiter = ConcurrencyLimiter::new("trials", 1).expect("valid limit");
        let _held = limiter.acquire_async().await;
        let config = BatchConfig {
            acquire_timeout: Some(Duration::from_millis(50)),
            ..BatchConfig::for_service("trials", "fetch")
        };
        let processor = BatchProcessor::new(config, limiter).expect("valid config");

        let err = processor
            .process_batch(vec![1_u32], |n| async move { Ok::<_, Rejected>(n) })
            .await
            .expect_err("no permit free");
        assert!(matches!(err, BatchError::Permit(PermitTimeout { ref key, .. }) if key == "trials"));
    }
}
