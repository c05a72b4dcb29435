//! Retry with exponential backoff and jitter
//!
//! [`RetryPolicy`] re-invokes an operation while it fails with a retriable
//! error, or while it returns a response whose status code is in
//! `retry_on_status_codes`, up to `max_retries` additional attempts.
//!
//! The delay before retry `n` (0-based) is
//! `min(initial_delay * backoff_factor^n, max_delay)`. With jitter enabled the
//! delay is perturbed by a uniform ±25% and floored at `min_delay`.
//!
//! Blocking callers use [`RetryPolicy::call`] and sleep the thread between
//! attempts; async callers use [`RetryPolicy::execute`] and sleep on the tokio
//! timer. Both share the same arithmetic and the same retry decisions.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};

use super::error::{ResilienceError, ResilienceResult};
use crate::error::{ConfigError, ConfigResult};

/// Status codes retried by default
pub const DEFAULT_RETRY_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Fraction of the delay used as the jitter spread
const JITTER_SPREAD: f64 = 0.25;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Additional attempts after the first
    pub max_retries: u32,
    /// Delay before the first retry
    #[serde(with = "crate::utils::duration_millis")]
    pub initial_delay: Duration,
    /// Multiplier applied per retry
    pub backoff_factor: f64,
    /// Upper bound on a single delay
    #[serde(with = "crate::utils::duration_millis")]
    pub max_delay: Duration,
    /// Apply ±25% jitter
    pub jitter: bool,
    /// Floor applied to jittered delays
    #[serde(with = "crate::utils::duration_millis")]
    pub min_delay: Duration,
    /// Response status codes that trigger a retry
    pub retry_on_status_codes: Vec<u16>,
    /// Bound on the whole call, retries and delays included
    #[serde(with = "crate::utils::option_duration_millis")]
    pub deadline: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
            jitter: true,
            min_delay: Duration::from_millis(100),
            retry_on_status_codes: DEFAULT_RETRY_STATUS_CODES.to_vec(),
            deadline: None,
        }
    }
}

impl RetryConfig {
    /// Start a configuration builder
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::default()
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a non-positive backoff factor or
    /// a zero deadline.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor <= 0.0 {
            return Err(ConfigError::invalid("backoff_factor must be a positive number"));
        }
        if self.deadline == Some(Duration::ZERO) {
            return Err(ConfigError::invalid("deadline must be greater than 0"));
        }
        Ok(())
    }

    /// Total attempts allowed, the first one included
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    fn retries_status(&self, code: u16) -> bool {
        self.retry_on_status_codes.contains(&code)
    }
}

/// Builder for [`RetryConfig`]
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.config.backoff_factor = factor;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.config.jitter = enabled;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(false)
    }

    pub fn min_delay(mut self, delay: Duration) -> Self {
        self.config.min_delay = delay;
        self
    }

    pub fn retry_on_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.config.retry_on_status_codes = codes.into_iter().collect();
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = Some(deadline);
        self
    }

    /// Validate and return the configuration
    ///
    /// # Errors
    ///
    /// See [`RetryConfig::validate`].
    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Decision for a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the computed backoff delay
    Retry,
    /// Retry after a caller-specified delay
    RetryAfter(Duration),
    /// Give up and surface the error
    Stop,
}

/// Decides whether an error is worth another attempt
pub trait RetryCondition<E> {
    /// Classify `error` from attempt `attempt` (0-based)
    fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision;
}

/// Responses that carry a protocol status code
pub trait HasStatusCode {
    /// Status code of the response, if any
    fn status_code(&self) -> Option<u16>;
}

/// Pre-defined retry conditions
pub mod policies {
    use super::{RetryCondition, RetryDecision};
    use crate::error::ErrorClassification;

    /// Retries every error
    #[derive(Debug, Clone, Copy, Default)]
    pub struct AlwaysRetry;

    impl<E> RetryCondition<E> for AlwaysRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Retry
        }
    }

    /// Never retries
    #[derive(Debug, Clone, Copy, Default)]
    pub struct NeverRetry;

    impl<E> RetryCondition<E> for NeverRetry {
        fn should_retry(&self, _error: &E, _attempt: u32) -> RetryDecision {
            RetryDecision::Stop
        }
    }

    /// Retries when the predicate returns true
    #[derive(Debug, Clone)]
    pub struct PredicateRetry<F> {
        predicate: F,
    }

    impl<F> PredicateRetry<F> {
        pub fn new(predicate: F) -> Self {
            Self { predicate }
        }
    }

    impl<F, E> RetryCondition<E> for PredicateRetry<F>
    where
        F: Fn(&E, u32) -> bool,
    {
        fn should_retry(&self, error: &E, attempt: u32) -> RetryDecision {
            if (self.predicate)(error, attempt) {
                RetryDecision::Retry
            } else {
                RetryDecision::Stop
            }
        }
    }

    /// Retries errors whose [`ErrorClassification`] marks them retryable,
    /// honoring any `retry_after` hint
    #[derive(Debug, Clone, Copy, Default)]
    pub struct Classified;

    impl<E: ErrorClassification> RetryCondition<E> for Classified {
        fn should_retry(&self, error: &E, _attempt: u32) -> RetryDecision {
            if !error.is_retryable() {
                return RetryDecision::Stop;
            }
            error.retry_after().map_or(RetryDecision::Retry, RetryDecision::RetryAfter)
        }
    }
}

/// Aggregate retry statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryStats {
    /// Calls made through the policy
    pub total_calls: u64,
    /// Calls that returned a value
    pub successful_calls: u64,
    /// Calls that returned an error
    pub failed_calls: u64,
    /// Retries performed across all calls
    pub total_retries: u64,
}

impl RetryStats {
    /// Mean retries per call
    #[allow(clippy::cast_precision_loss)]
    pub fn average_retries(&self) -> f64 {
        if self.total_calls == 0 {
            return 0.0;
        }
        self.total_retries as f64 / self.total_calls as f64
    }
}

enum Step<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    Finish(ResilienceResult<T, E>),
    Sleep(Duration),
}

/// Exponential backoff retry executor
pub struct RetryPolicy<P = policies::Classified> {
    config: RetryConfig,
    condition: P,
    rng: Mutex<Box<dyn RngCore + Send>>,
    stats: Mutex<RetryStats>,
}

impl<P: fmt::Debug> fmt::Debug for RetryPolicy<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("condition", &self.condition)
            .field("stats", &*self.stats.lock())
            .finish_non_exhaustive()
    }
}

impl RetryPolicy<policies::Classified> {
    /// Policy retrying errors classified as retryable
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: RetryConfig) -> ConfigResult<Self> {
        Self::with_condition(config, policies::Classified)
    }
}

impl<P> RetryPolicy<P> {
    /// Policy using a custom retry condition
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn with_condition(config: RetryConfig, condition: P) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            condition,
            rng: Mutex::new(Box::new(StdRng::from_entropy())),
            stats: Mutex::new(RetryStats::default()),
        })
    }

    /// Replace the jitter source
    #[must_use]
    pub fn with_rng(self, rng: impl RngCore + Send + 'static) -> Self {
        *self.rng.lock() = Box::new(rng);
        self
    }

    /// Use a deterministic jitter source
    #[must_use]
    pub fn seeded(self, seed: u64) -> Self {
        self.with_rng(StdRng::seed_from_u64(seed))
    }

    /// Policy configuration
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Snapshot of the aggregate statistics
    pub fn stats(&self) -> RetryStats {
        *self.stats.lock()
    }

    /// Delay before retry `attempt` (0-based)
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn compute_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.config.initial_delay.as_nanos() as f64 * self.config.backoff_factor.powi(exponent);
        let mut nanos = base.min(self.config.max_delay.as_nanos() as f64);

        if self.config.jitter {
            let spread = nanos * JITTER_SPREAD;
            nanos += self.rng.lock().gen_range(-spread..=spread);
            nanos = nanos.max(self.config.min_delay.as_nanos() as f64);
        }

        Duration::from_nanos(nanos.round() as u64)
    }

    /// Run a blocking operation with retries
    ///
    /// # Errors
    ///
    /// - [`ResilienceError::NonRetryable`] as soon as the condition stops.
    /// - [`ResilienceError::RetriesExhausted`] with the last error after
    ///   `max_retries` retries.
    /// - [`ResilienceError::DeadlineExceeded`] when the next delay would
    ///   pass the deadline.
    #[instrument(level = "debug", skip_all, fields(max_retries = self.config.max_retries))]
    pub fn call<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: RetryCondition<E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_blocking(operation, |_: &T| None)
    }

    /// Run a blocking operation whose responses may carry retriable status
    /// codes
    ///
    /// Once retries are exhausted the last response is returned as-is.
    ///
    /// # Errors
    ///
    /// Same as [`RetryPolicy::call`].
    #[instrument(level = "debug", skip_all, fields(max_retries = self.config.max_retries))]
    pub fn call_response<F, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        T: HasStatusCode,
        P: RetryCondition<E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_blocking(operation, HasStatusCode::status_code)
    }

    /// Run an async operation with retries
    ///
    /// With a deadline configured, an attempt still in flight at the deadline
    /// is abandoned and counted as a consumed attempt.
    ///
    /// # Errors
    ///
    /// Same as [`RetryPolicy::call`].
    #[instrument(level = "debug", skip_all, fields(max_retries = self.config.max_retries))]
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: RetryCondition<E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_async(operation, |_: &T| None).await
    }

    /// Async counterpart of [`RetryPolicy::call_response`]
    ///
    /// # Errors
    ///
    /// Same as [`RetryPolicy::execute`].
    #[instrument(level = "debug", skip_all, fields(max_retries = self.config.max_retries))]
    pub async fn execute_response<F, Fut, T, E>(&self, operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: HasStatusCode,
        P: RetryCondition<E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        self.run_async(operation, HasStatusCode::status_code).await
    }

    fn run_blocking<F, T, E, S>(&self, mut operation: F, status_of: S) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        S: Fn(&T) -> Option<u16>,
        P: RetryCondition<E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started = Instant::now();
        let mut attempt = 0;
        loop {
            match self.next_step(operation(), attempt, &status_of) {
                Step::Finish(result) => return result,
                Step::Sleep(delay) => {
                    if let Some(deadline) = self.config.deadline {
                        if started.elapsed() + delay >= deadline {
                            return Err(self.deadline_exceeded(deadline, attempt + 1));
                        }
                    }
                    std::thread::sleep(delay);
                    attempt += 1;
                }
            }
        }
    }

    async fn run_async<F, Fut, T, E, S>(&self, mut operation: F, status_of: S) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        S: Fn(&T) -> Option<u16>,
        P: RetryCondition<E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let started_attempts = AtomicU32::new(0);
        let attempts = async {
            let mut attempt = 0;
            loop {
                started_attempts.store(attempt + 1, Ordering::Relaxed);
                match self.next_step(operation().await, attempt, &status_of) {
                    Step::Finish(result) => return result,
                    Step::Sleep(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                }
            }
        };

        match self.config.deadline {
            None => attempts.await,
            Some(deadline) => match tokio::time::timeout(deadline, attempts).await {
                Ok(result) => result,
                Err(_) => Err(self.deadline_exceeded(deadline, started_attempts.load(Ordering::Relaxed))),
            },
        }
    }

    fn next_step<T, E, S>(&self, outcome: Result<T, E>, attempt: u32, status_of: &S) -> Step<T, E>
    where
        S: Fn(&T) -> Option<u16>,
        P: RetryCondition<E>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let attempts = attempt + 1;
        let remaining = self.config.max_retries.saturating_sub(attempt);

        match outcome {
            Ok(value) => {
                let retriable_status = status_of(&value).filter(|code| self.config.retries_status(*code));
                match retriable_status {
                    Some(status) if remaining > 0 => {
                        let delay = self.compute_delay(attempt);
                        warn!(
                            status,
                            attempt = attempts,
                            max_attempts = self.config.max_attempts(),
                            delay_ms = delay.as_millis(),
                            remaining,
                            "retriable status received, retrying"
                        );
                        self.stats.lock().total_retries += 1;
                        Step::Sleep(delay)
                    }
                    Some(status) => {
                        warn!(status, attempts, "retries exhausted, returning last response");
                        self.finish_call(true);
                        Step::Finish(Ok(value))
                    }
                    None => {
                        if attempt > 0 {
                            info!(attempts, "operation succeeded after retries");
                        }
                        self.finish_call(true);
                        Step::Finish(Ok(value))
                    }
                }
            }
            Err(source) => {
                let delay = match self.condition.should_retry(&source, attempt) {
                    RetryDecision::Stop => {
                        error!(attempt = attempts, error = %source, "non-retriable error");
                        self.finish_call(false);
                        return Step::Finish(Err(ResilienceError::NonRetryable { attempts, source }));
                    }
                    _ if remaining == 0 => {
                        error!(attempts, error = %source, "retries exhausted");
                        self.finish_call(false);
                        return Step::Finish(Err(ResilienceError::RetriesExhausted { attempts, source }));
                    }
                    RetryDecision::Retry => self.compute_delay(attempt),
                    RetryDecision::RetryAfter(delay) => delay,
                };
                warn!(
                    attempt = attempts,
                    max_attempts = self.config.max_attempts(),
                    delay_ms = delay.as_millis(),
                    remaining,
                    error = %source,
                    "operation failed, retrying"
                );
                self.stats.lock().total_retries += 1;
                Step::Sleep(delay)
            }
        }
    }

    fn finish_call(&self, success: bool) {
        let mut stats = self.stats.lock();
        stats.total_calls += 1;
        if success {
            stats.successful_calls += 1;
        } else {
            stats.failed_calls += 1;
        }
    }

    fn deadline_exceeded<E>(&self, deadline: Duration, attempts: u32) -> ResilienceError<E>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        error!(deadline_ms = deadline.as_millis(), attempts, "retry deadline exceeded");
        self.finish_call(false);
        ResilienceError::DeadlineExceeded { deadline, attempts }
    }
}
