//! Per-key concurrency limiting
//!
//! A [`ConcurrencyLimiter`] wraps a `tokio::sync::Semaphore` and serves
//! blocking and async callers from the same permit pool. Async waiters queue
//! in FIFO order. Blocking callers without a timeout join the same queue;
//! blocking callers with a timeout poll until their deadline. Permits are
//! returned when the [`LimiterPermit`] guard drops, so every exit path
//! releases, panics and cancelled futures included.
//!
//! [`LimiterRegistry`] creates one limiter per service key on first use with
//! the limit configured for that key, and hands out the same instance to later
//! callers. Resetting a key replaces its limiter outright; callers still
//! waiting on the old instance keep waiting there.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, instrument, warn};

use super::error::{PermitTimeout, ResilienceError, ResilienceResult};
use crate::error::{ConfigError, ConfigResult};
use crate::observability::{noop_metrics, SharedMetrics};

/// Metric names emitted by limiters
pub mod metric_names {
    /// Permits handed out
    pub const ACQUISITIONS: &str = "semaphore_acquisitions_total";
    /// Permits returned
    pub const RELEASES: &str = "semaphore_releases_total";
    /// Permits currently available
    pub const CURRENT_VALUE: &str = "semaphore_current_value";
}

const POLL_INTERVAL_MAX: Duration = Duration::from_millis(5);

struct LimiterShared {
    key: String,
    limit: usize,
    semaphore: Arc<Semaphore>,
    waiters: AtomicUsize,
    metrics: SharedMetrics,
}

/// Counting semaphore for one service key
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    shared: Arc<LimiterShared>,
}

impl fmt::Debug for ConcurrencyLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrencyLimiter")
            .field("key", &self.shared.key)
            .field("limit", &self.shared.limit)
            .field("available", &self.available_permits())
            .field("waiters", &self.waiters())
            .finish()
    }
}

impl ConcurrencyLimiter {
    /// Limiter with `limit` permits
    ///
    /// # Errors
    ///
    /// Returns an error when `limit` is zero.
    pub fn new(key: impl Into<String>, limit: usize) -> ConfigResult<Self> {
        Self::with_metrics(key, limit, noop_metrics())
    }

    /// Limiter emitting acquisition metrics into `metrics`
    ///
    /// # Errors
    ///
    /// Returns an error when `limit` is zero or above
    /// [`Semaphore::MAX_PERMITS`].
    pub fn with_metrics(
        key: impl Into<String>,
        limit: usize,
        metrics: SharedMetrics,
    ) -> ConfigResult<Self> {
        let key = key.into();
        validate_limit(&key, limit)?;
        Ok(Self::build(key, limit, metrics))
    }

    /// Limiter from an already validated limit
    fn build(key: String, limit: usize, metrics: SharedMetrics) -> Self {
        Self {
            shared: Arc::new(LimiterShared {
                key,
                limit,
                semaphore: Arc::new(Semaphore::new(limit)),
                waiters: AtomicUsize::new(0),
                metrics,
            }),
        }
    }

    /// Service key
    pub fn key(&self) -> &str {
        &self.shared.key
    }

    /// Configured permit count
    pub fn limit(&self) -> usize {
        self.shared.limit
    }

    /// Permits not currently held
    pub fn available_permits(&self) -> usize {
        self.shared.semaphore.available_permits()
    }

    /// Callers currently waiting for a permit
    pub fn waiters(&self) -> usize {
        self.shared.waiters.load(Ordering::Acquire)
    }

    /// Take a permit if one is free
    pub fn try_acquire(&self) -> Option<LimiterPermit> {
        let permit = Arc::clone(&self.shared.semaphore).try_acquire_owned().ok()?;
        Some(self.granted(permit))
    }

    /// Block the current thread until a permit is free
    ///
    /// Must not be called from inside an async task; use
    /// [`ConcurrencyLimiter::acquire_async`] there.
    pub fn acquire(&self) -> LimiterPermit {
        if let Some(permit) = self.try_acquire() {
            return permit;
        }
        let _waiting = WaitingGuard::enter(self);
        match futures::executor::block_on(Arc::clone(&self.shared.semaphore).acquire_owned()) {
            Ok(permit) => self.granted(permit),
            // The semaphore is owned here and never closed
            Err(_) => unreachable!("limiter semaphore closed"),
        }
    }

    /// Block the current thread for at most `timeout` waiting for a permit
    ///
    /// # Errors
    ///
    /// Returns [`PermitTimeout`] when no permit became free in time.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<LimiterPermit, PermitTimeout> {
        if let Some(permit) = self.try_acquire() {
            return Ok(permit);
        }
        let started = Instant::now();
        let _waiting = WaitingGuard::enter(self);
        let mut interval = Duration::from_micros(100);
        loop {
            let remaining = timeout.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                return Err(self.timed_out(started.elapsed()));
            }
            std::thread::sleep(interval.min(remaining));
            if let Some(permit) = self.try_acquire() {
                return Ok(permit);
            }
            interval = (interval * 2).min(POLL_INTERVAL_MAX);
        }
    }

    /// Wait asynchronously until a permit is free
    pub async fn acquire_async(&self) -> LimiterPermit {
        if let Some(permit) = self.try_acquire() {
            return permit;
        }
        let _waiting = WaitingGuard::enter(self);
        match Arc::clone(&self.shared.semaphore).acquire_owned().await {
            Ok(permit) => self.granted(permit),
            // The semaphore is owned here and never closed
            Err(_) => unreachable!("limiter semaphore closed"),
        }
    }

    /// Wait asynchronously for at most `timeout`
    ///
    /// # Errors
    ///
    /// Returns [`PermitTimeout`] when no permit became free in time.
    pub async fn acquire_async_timeout(
        &self,
        timeout: Duration,
    ) -> Result<LimiterPermit, PermitTimeout> {
        let started = tokio::time::Instant::now();
        match tokio::time::timeout(timeout, self.acquire_async()).await {
            Ok(permit) => Ok(permit),
            Err(_) => Err(self.timed_out(started.elapsed())),
        }
    }

    fn granted(&self, permit: OwnedSemaphorePermit) -> LimiterPermit {
        let available = self.available_permits();
        let tags = [("service", self.key())];
        self.shared.metrics.increment(metric_names::ACQUISITIONS, 1, &tags);
        #[allow(clippy::cast_precision_loss)]
        self.shared.metrics.gauge(metric_names::CURRENT_VALUE, available as f64, &tags);
        debug!(service = %self.key(), available, "permit acquired");
        LimiterPermit { limiter: self.clone(), permit: Some(permit) }
    }

    fn released(&self) {
        let available = self.available_permits();
        let tags = [("service", self.key())];
        self.shared.metrics.increment(metric_names::RELEASES, 1, &tags);
        #[allow(clippy::cast_precision_loss)]
        self.shared.metrics.gauge(metric_names::CURRENT_VALUE, available as f64, &tags);
        debug!(service = %self.key(), available, "permit released");
    }

    fn timed_out(&self, waited: Duration) -> PermitTimeout {
        warn!(service = %self.key(), waited_ms = waited.as_millis(), "timed out waiting for permit");
        PermitTimeout { key: self.key().to_string(), waited }
    }
}

fn validate_limit(key: &str, limit: usize) -> ConfigResult<()> {
    if limit == 0 {
        return Err(ConfigError::invalid(format!("limit for '{key}' must be greater than 0")));
    }
    if limit > Semaphore::MAX_PERMITS {
        return Err(ConfigError::invalid(format!(
            "limit for '{key}' must not exceed {}",
            Semaphore::MAX_PERMITS
        )));
    }
    Ok(())
}

/// Counts a caller as a waiter until it gets a permit or gives up
struct WaitingGuard<'a> {
    limiter: &'a ConcurrencyLimiter,
}

impl<'a> WaitingGuard<'a> {
    fn enter(limiter: &'a ConcurrencyLimiter) -> Self {
        limiter.shared.waiters.fetch_add(1, Ordering::AcqRel);
        Self { limiter }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.limiter.shared.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

/// A held permit; returned to its limiter on drop
#[must_use = "the permit is released as soon as it is dropped"]
pub struct LimiterPermit {
    limiter: ConcurrencyLimiter,
    permit: Option<OwnedSemaphorePermit>,
}

impl LimiterPermit {
    /// Key of the limiter this permit belongs to
    pub fn key(&self) -> &str {
        self.limiter.key()
    }
}

impl fmt::Debug for LimiterPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterPermit").field("key", &self.key()).finish()
    }
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.limiter.released();
    }
}

/// Limits per service key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimiterConfig {
    /// Limit for keys without an explicit entry
    pub default_limit: usize,
    /// Per-service limits
    pub service_limits: HashMap<String, usize>,
    /// Timeout applied by the registry's scoped helpers
    #[serde(with = "crate::utils::option_duration_millis")]
    pub acquire_timeout: Option<Duration>,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            default_limit: 10,
            service_limits: HashMap::from([
                ("clinicaltrials".to_string(), 5),
                ("anthropic".to_string(), 5),
            ]),
            acquire_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl LimiterConfig {
    /// Limit configured for `key`
    pub fn limit_for(&self, key: &str) -> usize {
        self.service_limits.get(key).copied().unwrap_or(self.default_limit)
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error when any limit is zero or too large.
    pub fn validate(&self) -> ConfigResult<()> {
        validate_limit("default_limit", self.default_limit)?;
        self.service_limits.iter().try_for_each(|(key, limit)| validate_limit(key, *limit))
    }
}

/// Health snapshot of one limiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LimiterSnapshot {
    /// Configured permit count
    pub limit: usize,
    /// Permits not currently held
    pub available: usize,
    /// Callers waiting for a permit
    pub waiters: usize,
    /// True when no permit is free
    pub locked: bool,
}

/// Lazily created limiters keyed by service
pub struct LimiterRegistry {
    config: LimiterConfig,
    limiters: DashMap<String, ConcurrencyLimiter>,
    metrics: SharedMetrics,
}

impl fmt::Debug for LimiterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimiterRegistry")
            .field("config", &self.config)
            .field("keys", &self.limiters.len())
            .finish()
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self {
            config: LimiterConfig::default(),
            limiters: DashMap::new(),
            metrics: noop_metrics(),
        }
    }
}

impl LimiterRegistry {
    /// Registry using `config` for limits
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: LimiterConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, limiters: DashMap::new(), metrics: noop_metrics() })
    }

    /// Emit limiter metrics into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Registry configuration
    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Limiter for `key`, created with the configured limit on first use
    pub fn limiter(&self, key: &str) -> ConcurrencyLimiter {
        if let Some(existing) = self.limiters.get(key) {
            return existing.value().clone();
        }
        let limit = self.config.limit_for(key);
        self.get_or_insert(key, limit)
    }

    /// Limiter for `key`, created with `limit` if it does not exist yet
    ///
    /// An existing limiter keeps its original limit; use
    /// [`LimiterRegistry::reset`] to change it.
    ///
    /// # Errors
    ///
    /// Returns an error when `limit` is zero.
    pub fn limiter_with_limit(&self, key: &str, limit: usize) -> ConfigResult<ConcurrencyLimiter> {
        validate_limit(key, limit)?;
        Ok(self.get_or_insert(key, limit))
    }

    /// Drop the limiter for `key`, recreating it with `new_limit` if given
    ///
    /// Waiters and permit holders of the old limiter are not migrated.
    ///
    /// # Errors
    ///
    /// Returns an error when `new_limit` is zero.
    pub fn reset(&self, key: &str, new_limit: Option<usize>) -> ConfigResult<()> {
        if self.limiters.remove(key).is_some() {
            info!(service = key, ?new_limit, "limiter reset");
        }
        if let Some(limit) = new_limit {
            let limiter = ConcurrencyLimiter::with_metrics(key, limit, Arc::clone(&self.metrics))?;
            self.limiters.insert(key.to_string(), limiter);
        }
        Ok(())
    }

    /// Drop every limiter
    pub fn clear(&self) {
        self.limiters.clear();
        info!("all limiters cleared");
    }

    /// Keys with a live limiter, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.limiters.iter().map(|entry| entry.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Health snapshot of every live limiter
    pub fn snapshot(&self) -> HashMap<String, LimiterSnapshot> {
        self.limiters
            .iter()
            .map(|entry| {
                let limiter = entry.value();
                let available = limiter.available_permits();
                (entry.key().clone(), LimiterSnapshot {
                    limit: limiter.limit(),
                    available,
                    waiters: limiter.waiters(),
                    locked: available == 0,
                })
            })
            .collect()
    }

    /// Run an async operation while holding a permit for `key`
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::PermitTimeout`] when the configured acquire
    /// timeout passes, or [`ResilienceError::Operation`] with the
    /// operation's error.
    #[instrument(level = "debug", skip(self, operation))]
    pub async fn run<F, Fut, T, E>(&self, key: &str, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let limiter = self.limiter(key);
        let _permit = match self.config.acquire_timeout {
            Some(timeout) => limiter.acquire_async_timeout(timeout).await?,
            None => limiter.acquire_async().await,
        };
        operation().await.map_err(|source| ResilienceError::Operation { source })
    }

    /// Run a blocking operation while holding a permit for `key`
    ///
    /// # Errors
    ///
    /// Same as [`LimiterRegistry::run`].
    #[instrument(level = "debug", skip(self, operation))]
    pub fn run_blocking<F, T, E>(&self, key: &str, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let limiter = self.limiter(key);
        let _permit = match self.config.acquire_timeout {
            Some(timeout) => limiter.acquire_timeout(timeout)?,
            None => limiter.acquire(),
        };
        operation().map_err(|source| ResilienceError::Operation { source })
    }

    /// `limit` must already be validated
    fn get_or_insert(&self, key: &str, limit: usize) -> ConcurrencyLimiter {
        self.limiters
            .entry(key.to_string())
            .or_insert_with(|| {
                info!(service = key, limit, "creating limiter");
                ConcurrencyLimiter::build(key.to_string(), limit, Arc::clone(&self.metrics))
            })
            .value()
            .clone()
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for permit accounting, waiters and registry lookups.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::observability::InMemoryMetrics;

    #[derive(Debug, thiserror::Error)]
    #[error("downstream failed")]
    struct Downstream;

    #[test]
    fn test_zero_limit_rejected() {
        assert!(ConcurrencyLimiter::new("trials", 0).is_err());
        let registry = LimiterRegistry::default();
        assert!(registry.limiter_with_limit("trials", 0).is_err());
    }

    #[test]
    fn test_permit_released_on_drop() {
        let limiter = ConcurrencyLimiter::new("trials", 2).expect("valid");
        let first = limiter.acquire();
        let second = limiter.try_acquire().expect("second permit free");
        assert_eq!(limiter.available_permits(), 0);
        assert!(limiter.try_acquire().is_none());

        drop(first);
        assert_eq!(limiter.available_permits(), 1);
        drop(second);
        assert_eq!(limiter.available_permits(), 2);
    }

    #[test]
    fn test_blocking_timeout_reports_key() {
        let limiter = ConcurrencyLimiter::new("llm", 1).expect("valid");
        let _held = limiter.acquire();

        let err = limiter.acquire_timeout(Duration::from_millis(20)).expect_err("no permit free");
        assert_eq!(err.key, "llm");
        assert!(err.waited >= Duration::from_millis(20));
        assert_eq!(limiter.waiters(), 0);
    }

    #[test]
    fn test_blocking_waiter_wakes_on_release() {
        let limiter = ConcurrencyLimiter::new("trials", 1).expect("valid");
        let held = limiter.acquire();

        let worker = {
            let limiter = limiter.clone();
            std::thread::spawn(move || {
                let _permit = limiter.acquire();
                "done"
            })
        };
        while limiter.waiters() == 0 {
            std::thread::yield_now();
        }
        drop(held);

        assert_eq!(worker.join().expect("worker should finish"), "done");
        assert_eq!(limiter.available_permits(), 1);
    }

    /// Validates limit 2 with five 100ms holders takes three rounds.
    ///
    /// Assertions:
    /// - Ensures elapsed time is at least 300ms and under 500ms.
    /// - Ensures at most 2 holders ran at once.
    #[tokio::test(start_paused = true)]
    async fn test_limit_two_five_callers() {
        let limiter = ConcurrencyLimiter::new("trials", 2).expect("valid");
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let started = tokio::time::Instant::now();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let limiter = limiter.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire_async().await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task should not panic");
        }

        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_waiters_are_counted_and_cancellable() {
        let limiter = ConcurrencyLimiter::new("trials", 1).expect("valid");
        let held = limiter.acquire_async().await;

        let err = limiter
            .acquire_async_timeout(Duration::from_millis(50))
            .await
            .expect_err("permit is held");
        assert_eq!(err.key, "trials");
        assert_eq!(limiter.waiters(), 0);

        let waiter = {
            let limiter = limiter.clone();
            tokio::spawn(async move { limiter.acquire_async().await.key().to_string() })
        };
        while limiter.waiters() == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(limiter.waiters(), 1);

        drop(held);
        assert_eq!(waiter.await.expect("waiter finishes"), "trials");
        assert_eq!(limiter.waiters(), 0);
    }

    /// Validates queued async waiters are served in arrival order.
    ///
    /// Assertions:
    /// - Ensures three waiters queued behind a held permit run first come,
    ///   first served.
    /// - Confirms a caller arriving after the release cannot jump the queue.
    #[tokio::test(start_paused = true)]
    async fn test_async_waiters_are_served_in_order() {
        let limiter = ConcurrencyLimiter::new("trials", 1).expect("valid");
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let held = limiter.acquire_async().await;

        let mut handles = Vec::new();
        for waiter in 0..3 {
            let task_limiter = limiter.clone();
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let _permit = task_limiter.acquire_async().await;
                order.lock().push(waiter);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }));
            while limiter.waiters() <= waiter {
                tokio::task::yield_now().await;
            }
        }

        drop(held);
        assert!(limiter.try_acquire().is_none(), "released permit goes to the first waiter");
        for handle in handles {
            handle.await.expect("waiter should not panic");
        }

        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(limiter.available_permits(), 1);
        assert_eq!(limiter.waiters(), 0);
    }

    #[test]
    fn test_registry_memoizes_and_honors_first_limit() {
        let registry = LimiterRegistry::default();

        let custom = registry.limiter_with_limit("pubmed", 3).expect("valid");
        let again = registry.limiter("pubmed");
        assert_eq!(again.limit(), 3);

        let _permit = custom.acquire();
        assert_eq!(again.available_permits(), 2);

        assert_eq!(registry.limiter("clinicaltrials").limit(), 5);
        assert_eq!(registry.limiter("other").limit(), 10);
    }

    /// Validates reset replaces the limiter without migrating holders.
    ///
    /// Assertions:
    /// - Confirms the new limiter has the new limit and all permits free.
    /// - Confirms the old permit still returns to the old instance.
    #[test]
    fn test_registry_reset_is_hard() {
        let registry = LimiterRegistry::default();
        let old = registry.limiter_with_limit("llm", 1).expect("valid");
        let held = old.acquire();

        registry.reset("llm", Some(4)).expect("valid");
        let fresh = registry.limiter("llm");
        assert_eq!(fresh.limit(), 4);
        assert_eq!(fresh.available_permits(), 4);

        drop(held);
        assert_eq!(old.available_permits(), 1);

        registry.reset("llm", None).expect("valid");
        assert!(registry.keys().is_empty());
    }

    #[test]
    fn test_snapshot_and_clear() {
        let registry = LimiterRegistry::default();
        let limiter = registry.limiter_with_limit("trials", 1).expect("valid");
        let _held = limiter.acquire();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot["trials"], LimiterSnapshot { limit: 1, available: 0, waiters: 0, locked: true });

        registry.clear();
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_run_releases_on_error_and_emits_metrics() {
        let metrics = Arc::new(InMemoryMetrics::new());
        let registry = LimiterRegistry::default().with_metrics(metrics.clone());

        let result: ResilienceResult<(), Downstream> =
            registry.run("trials", || async { Err(Downstream) }).await;
        assert!(matches!(result, Err(ResilienceError::Operation { .. })));

        let value = registry.run_blocking("trials", || Ok::<_, Downstream>(7)).expect("permit free");
        assert_eq!(value, 7);

        assert_eq!(registry.limiter("trials").available_permits(), 5);
        let tags = [("service", "trials")];
        assert_eq!(metrics.counter(metric_names::ACQUISITIONS, &tags), 2);
        assert_eq!(metrics.counter(metric_names::RELEASES, &tags), 2);
        assert_eq!(metrics.gauge_value(metric_names::CURRENT_VALUE, &tags), Some(5.0));
    }
}
