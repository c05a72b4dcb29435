//! Bundled resilience settings
//!
//! One [`ResilienceSettings`] document carries the breaker, retry, limiter
//! and batch configuration for a service. Every section and field is
//! optional and falls back to its default; durations are milliseconds.
//!
//! ```toml
//! [breaker]
//! failure_threshold = 5
//! recovery_timeout = 60000
//!
//! [retry]
//! max_retries = 3
//! initial_delay = 1000
//! deadline = 30000
//!
//! [limiter]
//! default_limit = 10
//! service_limits = { clinicaltrials = 5 }
//!
//! [batch]
//! max_batch_size = 10
//! max_concurrent = 5
//! ```

use serde::{Deserialize, Serialize};

use super::batch::{BatchConfig, BatchProcessor};
use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::concurrency::LimiterRegistry;
use super::pipeline::ResiliencePipeline;
use super::retry::{RetryConfig, RetryPolicy};
use crate::error::{ConfigError, ConfigResult};
use crate::observability::SharedMetrics;

/// Breaker, retry, limiter and batch configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Circuit breaker section
    pub breaker: CircuitBreakerConfig,
    /// Retry section
    pub retry: RetryConfig,
    /// Concurrency limiter section
    pub limiter: super::concurrency::LimiterConfig,
    /// Batch processor section
    pub batch: BatchConfig,
}

impl ResilienceSettings {
    /// Parse and validate settings from a TOML document
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when a section fails validation.
    pub fn from_toml_str(source: &str) -> ConfigResult<Self> {
        let settings: Self = toml::from_str(source)
            .map_err(|err| ConfigError::Parse { format: "TOML", message: err.to_string() })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize the settings as TOML
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if serialization fails.
    pub fn to_toml_string(&self) -> ConfigResult<String> {
        toml::to_string(self).map_err(|err| ConfigError::Parse { format: "TOML", message: err.to_string() })
    }

    /// Validate every section
    ///
    /// # Errors
    ///
    /// Returns the first section's validation error.
    pub fn validate(&self) -> ConfigResult<()> {
        self.breaker.validate()?;
        self.retry.validate()?;
        self.limiter.validate()?;
        self.batch.validate()
    }

    /// Pipeline for `service`: a breaker named after it, the retry policy,
    /// and the registry's limiter for the same key
    ///
    /// The retry deadline bounds the whole pipeline call.
    ///
    /// # Errors
    ///
    /// Returns an error if a section is invalid.
    pub fn pipeline(
        &self,
        service: &str,
        registry: &LimiterRegistry,
        metrics: SharedMetrics,
    ) -> ConfigResult<ResiliencePipeline> {
        let breaker_config = CircuitBreakerConfig { name: service.to_string(), ..self.breaker.clone() };
        let breaker = CircuitBreaker::with_metrics(breaker_config, super::clock::SystemClock, metrics)?;

        let retry = RetryPolicy::new(RetryConfig { deadline: None, ..self.retry.clone() })?;
        let pipeline = ResiliencePipeline::new()
            .with_breaker(breaker)
            .with_retry(retry)
            .with_limiter(registry.limiter(service), self.limiter.acquire_timeout);

        Ok(match self.retry.deadline {
            Some(deadline) => pipeline.with_deadline(deadline),
            None => pipeline,
        })
    }

    /// Batch processor for `service` and `operation` sharing the registry's
    /// limiter
    ///
    /// # Errors
    ///
    /// Returns an error if the batch section is invalid.
    pub fn batch_processor(
        &self,
        service: &str,
        operation: &str,
        registry: &LimiterRegistry,
    ) -> ConfigResult<BatchProcessor> {
        let config = BatchConfig {
            service: service.to_string(),
            operation: operation.to_string(),
            ..self.batch.clone()
        };
        BatchProcessor::from_registry(config, registry)
    }
}
