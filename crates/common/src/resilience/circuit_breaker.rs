//! Circuit breaker guarding calls to an unreliable remote service
//!
//! The breaker counts failures while CLOSED and opens once `failure_threshold`
//! is reached. While OPEN every call is rejected with
//! [`CircuitBreakerError`] without invoking the operation. The first call made
//! after `recovery_timeout` has passed since the last failure moves the breaker
//! to HALF_OPEN and is attempted as a probe; `success_threshold` probe
//! successes close it again and any probe failure reopens it.
//!
//! All state lives behind a single mutex per breaker. Clones share that state,
//! so a breaker can be handed to as many tasks or threads as needed.
//!
//! ```rust
//! use trialflow_common::resilience::{CircuitBreaker, CircuitBreakerConfig};
//!
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::named("trials-api")).unwrap();
//! let value: Result<u32, _> = breaker.call(|| Ok::<_, std::io::Error>(7));
//! assert_eq!(value.unwrap(), 7);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use super::clock::{Clock, SystemClock};
use super::error::{CircuitBreakerError, ResilienceError, ResilienceResult};
use crate::error::{ConfigError, ConfigResult};
use crate::observability::{noop_metrics, SharedMetrics};

/// Metric names emitted by the breaker
pub mod metric_names {
    /// Every call, rejected ones included
    pub const TOTAL_CALLS: &str = "circuit_breaker_total_calls";
    /// Calls rejected while open
    pub const REJECTED_CALLS: &str = "circuit_breaker_rejected_calls";
    /// Successful calls
    pub const SUCCESS_CALLS: &str = "circuit_breaker_success_calls";
    /// Failed calls
    pub const FAILURE_CALLS: &str = "circuit_breaker_failure_calls";
    /// State transitions, tagged with `new_state`
    pub const STATE_CHANGES: &str = "circuit_breaker_state_changes";
    /// Transitions into OPEN
    pub const OPEN_EVENTS: &str = "circuit_breaker_open_events";
    /// Transitions into CLOSED from HALF_OPEN
    pub const RECOVERY_EVENTS: &str = "circuit_breaker_recovery_events";
    /// Current state: 0 closed, 1 half-open, 2 open
    pub const STATE: &str = "circuit_breaker_state";
}

/// Circuit breaker states
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls flow through and failures are counted
    #[default]
    Closed,
    /// Calls are rejected until the recovery timeout passes
    Open,
    /// Probe calls are allowed to test recovery
    HalfOpen,
}

impl CircuitState {
    /// Gauge value reported for this state
    pub fn gauge_value(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }

    fn tag(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Breaker name used in errors, logs and metric tags
    pub name: String,
    /// Failures in CLOSED before the breaker opens
    pub failure_threshold: u64,
    /// Time after the last failure before a probe is allowed
    #[serde(with = "crate::utils::duration_millis")]
    pub recovery_timeout: Duration,
    /// Probe successes in HALF_OPEN required to close
    pub success_threshold: u64,
    /// Cap on concurrent probes in HALF_OPEN; `None` admits every caller
    pub half_open_max_calls: Option<u64>,
    /// Reset the CLOSED failure count on each success instead of accumulating
    pub reset_on_success: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            success_threshold: 1,
            half_open_max_calls: None,
            reset_on_success: false,
        }
    }
}

impl CircuitBreakerConfig {
    /// Default configuration under the given name
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Start a configuration builder
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a threshold or cap is zero.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }
        if self.half_open_max_calls == Some(0) {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }
        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    /// Builder seeded with the defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn failure_threshold(mut self, threshold: u64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn success_threshold(mut self, threshold: u64) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u64) -> Self {
        self.config.half_open_max_calls = Some(max_calls);
        self
    }

    pub fn reset_on_success(mut self, reset: bool) -> Self {
        self.config.reset_on_success = reset;
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    ///
    /// See [`CircuitBreakerConfig::validate`].
    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Counters kept by a breaker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CircuitBreakerStats {
    /// Failures since the breaker last entered CLOSED
    pub failure_count: u64,
    /// Successful calls
    pub success_count: u64,
    /// Calls made, rejected ones included
    pub total_calls: u64,
    /// Calls rejected while open
    pub rejected_calls: u64,
    /// State transitions
    pub state_changes: u64,
    /// Time of the most recent failure
    pub last_failure_time: Option<Instant>,
    /// Time of the most recent success
    pub last_success_time: Option<Instant>,
}

#[derive(Debug, Default)]
struct BreakerCore {
    state: CircuitState,
    stats: CircuitBreakerStats,
    half_open_successes: u64,
    half_open_in_flight: u64,
}

struct Shared<C> {
    config: CircuitBreakerConfig,
    core: Mutex<BreakerCore>,
    clock: C,
    metrics: SharedMetrics,
}

/// Circuit breaker over a pluggable [`Clock`]
pub struct CircuitBreaker<C: Clock = SystemClock> {
    shared: Arc<Shared<C>>,
}

impl<C: Clock> Clone for CircuitBreaker<C> {
    fn clone(&self) -> Self {
        Self { shared: Arc::clone(&self.shared) }
    }
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("config", &self.shared.config)
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker using the system clock
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker reading time from `clock`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_clock(config: CircuitBreakerConfig, clock: C) -> ConfigResult<Self> {
        Self::with_metrics(config, clock, noop_metrics())
    }

    /// Create a breaker reading time from `clock` and emitting into `metrics`
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_metrics(
        config: CircuitBreakerConfig,
        clock: C,
        metrics: SharedMetrics,
    ) -> ConfigResult<Self> {
        config.validate()?;
        info!(
            name = %config.name,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout.as_millis(),
            success_threshold = config.success_threshold,
            "circuit breaker initialized"
        );
        let tags = [("name", config.name.as_str())];
        metrics.gauge(metric_names::STATE, CircuitState::Closed.gauge_value(), &tags);
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                core: Mutex::new(BreakerCore::default()),
                clock,
                metrics,
            }),
        })
    }

    /// Breaker name
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Breaker configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.shared.config
    }

    /// Current state
    ///
    /// An OPEN breaker whose recovery timeout has passed still reports OPEN
    /// until the next call attempt moves it to HALF_OPEN.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot of the breaker counters
    pub fn stats(&self) -> CircuitBreakerStats {
        self.lock().stats.clone()
    }

    /// Return to CLOSED with every counter cleared
    pub fn reset(&self) {
        let mut core = self.lock();
        *core = BreakerCore::default();
        drop(core);
        let tags = [("name", self.name())];
        self.shared.metrics.gauge(metric_names::STATE, CircuitState::Closed.gauge_value(), &tags);
        info!(name = %self.name(), "circuit breaker reset");
    }

    /// Ask permission to run one call
    ///
    /// Counts the call, applies the OPEN to HALF_OPEN transition when the
    /// recovery timeout has passed, and returns a [`CallPermit`] that must be
    /// settled with the call's outcome. A permit dropped without being
    /// settled is recorded as a failure.
    ///
    /// # Errors
    ///
    /// Returns [`CircuitBreakerError`] when the breaker is open, or when the
    /// half-open probe cap is reached.
    pub fn admit(&self) -> Result<CallPermit<C>, CircuitBreakerError> {
        let now = self.shared.clock.now();
        let tags = [("name", self.name())];
        let mut core = self.lock();

        core.stats.total_calls += 1;
        self.shared.metrics.increment(metric_names::TOTAL_CALLS, 1, &tags);

        let probe = match core.state {
            CircuitState::Closed => false,
            CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let recovered = core.stats.last_failure_time.map_or(true, |failed_at| {
                    now.saturating_duration_since(failed_at) >= self.shared.config.recovery_timeout
                });
                if !recovered {
                    return Err(self.reject(&mut core, now));
                }
                self.transition(&mut core, CircuitState::HalfOpen);
                true
            }
        };

        if probe {
            if let Some(max_calls) = self.shared.config.half_open_max_calls {
                if core.half_open_in_flight >= max_calls {
                    return Err(self.reject(&mut core, now));
                }
            }
            core.half_open_in_flight += 1;
        }

        Ok(CallPermit { breaker: self.clone(), probe, settled: false })
    }

    /// Run a blocking operation under breaker protection
    ///
    /// # Errors
    ///
    /// Returns [`ResilienceError::CircuitOpen`] without invoking `operation`
    /// when the breaker rejects the call, or [`ResilienceError::Operation`]
    /// carrying the operation's own error.
    #[instrument(level = "debug", skip(self, operation), fields(name = %self.name()))]
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit()?;
        match operation() {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(source) => {
                permit.failure();
                Err(ResilienceError::Operation { source })
            }
        }
    }

    /// Run an async operation under breaker protection
    ///
    /// # Errors
    ///
    /// Same as [`CircuitBreaker::call`].
    #[instrument(level = "debug", skip(self, operation), fields(name = %self.name()))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit()?;
        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(source) => {
                permit.failure();
                Err(ResilienceError::Operation { source })
            }
        }
    }

    /// Run an async operation that must finish within `deadline`
    ///
    /// An attempt still running at the deadline is dropped and recorded as a
    /// failure.
    ///
    /// # Errors
    ///
    /// Same as [`CircuitBreaker::execute`], plus
    /// [`ResilienceError::DeadlineExceeded`] when the deadline expires.
    pub async fn execute_with_deadline<F, Fut, T, E>(
        &self,
        deadline: Duration,
        operation: F,
    ) -> ResilienceResult<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit()?;
        match tokio::time::timeout(deadline, operation()).await {
            Ok(Ok(value)) => {
                permit.success();
                Ok(value)
            }
            Ok(Err(source)) => {
                permit.failure();
                Err(ResilienceError::Operation { source })
            }
            Err(_) => {
                warn!(name = %self.name(), deadline_ms = deadline.as_millis(), "call abandoned at deadline");
                permit.failure();
                Err(ResilienceError::DeadlineExceeded { deadline, attempts: 1 })
            }
        }
    }

    /// Wrap a blocking operation so every invocation goes through the breaker
    pub fn wrap<F, T, E>(&self, operation: F) -> impl Fn() -> ResilienceResult<T, E>
    where
        F: Fn() -> Result<T, E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let breaker = self.clone();
        move || breaker.call(&operation)
    }

    /// Wrap an async operation so every invocation goes through the breaker
    pub fn wrap_async<F, Fut, T, E>(
        &self,
        operation: F,
    ) -> impl Fn() -> BoxFuture<'static, ResilienceResult<T, E>> + Send + Sync
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let breaker = self.clone();
        let operation = Arc::new(operation);
        move || {
            let breaker = breaker.clone();
            let operation = Arc::clone(&operation);
            Box::pin(async move { breaker.execute(|| (*operation)()).await })
        }
    }

    fn settle(&self, probe: bool, success: bool) {
        let now = self.shared.clock.now();
        let tags = [("name", self.name())];
        let mut core = self.lock();

        if probe {
            core.half_open_in_flight = core.half_open_in_flight.saturating_sub(1);
        }

        if success {
            core.stats.success_count += 1;
            core.stats.last_success_time = Some(now);
            self.shared.metrics.increment(metric_names::SUCCESS_CALLS, 1, &tags);

            match core.state {
                CircuitState::Closed if self.shared.config.reset_on_success => {
                    core.stats.failure_count = 0;
                }
                CircuitState::HalfOpen => {
                    core.half_open_successes += 1;
                    if core.half_open_successes >= self.shared.config.success_threshold {
                        self.transition(&mut core, CircuitState::Closed);
                    }
                }
                _ => {}
            }
        } else {
            core.stats.failure_count += 1;
            core.stats.last_failure_time = Some(now);
            self.shared.metrics.increment(metric_names::FAILURE_CALLS, 1, &tags);

            match core.state {
                CircuitState::Closed
                    if core.stats.failure_count >= self.shared.config.failure_threshold =>
                {
                    self.transition(&mut core, CircuitState::Open);
                }
                CircuitState::HalfOpen => self.transition(&mut core, CircuitState::Open),
                _ => {}
            }
        }
    }

    fn reject(&self, core: &mut BreakerCore, now: Instant) -> CircuitBreakerError {
        core.stats.rejected_calls += 1;
        self.shared.metrics.increment(metric_names::REJECTED_CALLS, 1, &[("name", self.name())]);
        debug!(name = %self.name(), state = %core.state, "circuit breaker rejected call");

        let last_failure_time = core.stats.last_failure_time;
        CircuitBreakerError {
            name: self.name().to_string(),
            failure_count: core.stats.failure_count,
            last_failure_time,
            since_last_failure: last_failure_time.map(|at| now.saturating_duration_since(at)),
        }
    }

    fn transition(&self, core: &mut BreakerCore, next: CircuitState) {
        let previous = core.state;
        if previous == next {
            return;
        }
        core.state = next;
        core.stats.state_changes += 1;

        let name = self.name();
        let metrics = &self.shared.metrics;
        let change_tags = [("name", name), ("new_state", next.tag())];
        metrics.increment(metric_names::STATE_CHANGES, 1, &change_tags);
        metrics.gauge(metric_names::STATE, next.gauge_value(), &[("name", name)]);

        match next {
            CircuitState::Open => {
                metrics.increment(metric_names::OPEN_EVENTS, 1, &[("name", name)]);
                warn!(
                    name,
                    from = %previous,
                    failure_count = core.stats.failure_count,
                    failure_threshold = self.shared.config.failure_threshold,
                    "circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                core.half_open_successes = 0;
                core.half_open_in_flight = 0;
                info!(name, failure_count = core.stats.failure_count, "circuit breaker half-open");
            }
            CircuitState::Closed => {
                core.stats.failure_count = 0;
                metrics.increment(metric_names::RECOVERY_EVENTS, 1, &[("name", name)]);
                info!(name, success_count = core.stats.success_count, "circuit breaker closed");
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerCore> {
        self.shared.core.lock().unwrap_or_else(|poisoned| {
            warn!(name = %self.shared.config.name, "circuit breaker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

/// Admission for one call through a [`CircuitBreaker`]
///
/// Settle it with [`CallPermit::success`] or [`CallPermit::failure`].
/// Dropping it unsettled, for example when the caller's future is cancelled,
/// records a failure.
#[must_use = "a call permit must be settled with the call's outcome"]
pub struct CallPermit<C: Clock = SystemClock> {
    breaker: CircuitBreaker<C>,
    probe: bool,
    settled: bool,
}

impl<C: Clock> CallPermit<C> {
    /// True when this call is a HALF_OPEN probe
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    /// Record the call as successful
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.settle(self.probe, true);
    }

    /// Record the call as failed
    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.settle(self.probe, false);
    }
}

impl<C: Clock> fmt::Debug for CallPermit<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name())
            .field("probe", &self.probe)
            .finish()
    }
}

impl<C: Clock> Drop for CallPermit<C> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.probe, false);
        }
    }
}

/// Named breakers shared across an application
///
/// Lookups by the same name always return the same breaker; the first
/// configuration supplied for a name wins.
pub struct CircuitBreakerRegistry<C: Clock + Clone = SystemClock> {
    breakers: DashMap<String, CircuitBreaker<C>>,
    clock: C,
    metrics: SharedMetrics,
}

impl Default for CircuitBreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry<SystemClock> {
    /// Empty registry using the system clock
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl<C: Clock + Clone> CircuitBreakerRegistry<C> {
    /// Empty registry whose breakers read time from `clock`
    pub fn with_clock(clock: C) -> Self {
        Self { breakers: DashMap::new(), clock, metrics: noop_metrics() }
    }

    /// Emit breaker metrics into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Breaker registered under `name`, created from `config` if absent
    ///
    /// The name argument overrides `config.name`. A second call with a
    /// different configuration returns the existing breaker unchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the breaker must be created and `config` is
    /// invalid.
    pub fn get_or_create(
        &self,
        name: &str,
        config: CircuitBreakerConfig,
    ) -> ConfigResult<CircuitBreaker<C>> {
        use dashmap::mapref::entry::Entry;

        match self.breakers.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let config = CircuitBreakerConfig { name: name.to_string(), ..config };
                let breaker =
                    CircuitBreaker::with_metrics(config, self.clock.clone(), Arc::clone(&self.metrics))?;
                entry.insert(breaker.clone());
                Ok(breaker)
            }
        }
    }

    /// Breaker registered under `name`, if any
    pub fn get(&self, name: &str) -> Option<CircuitBreaker<C>> {
        self.breakers.get(name).map(|entry| entry.value().clone())
    }

    /// Counters of every registered breaker
    pub fn stats_all(&self) -> HashMap<String, CircuitBreakerStats> {
        self.breakers.iter().map(|entry| (entry.key().clone(), entry.value().stats())).collect()
    }

    /// Reset every breaker and forget them all
    pub fn reset_all(&self) {
        for entry in &self.breakers {
            entry.value().reset();
        }
        self.breakers.clear();
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered breakers
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// True when no breaker is registered
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

impl<C: Clock + Clone> fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry").field("names", &self.names()).finish()
    }
}
