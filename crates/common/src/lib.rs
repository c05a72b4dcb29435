//! Shared building blocks for trialflow crates.
//!
//! Error classification, serde helpers, observability hooks and the
//! resilience layer (circuit breaker, retry, concurrency limiter, batch
//! processor) that every outbound call in trialflow goes through.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: error classification, serde helpers, metrics sink trait
//! - `observability`: `tracing` subscriber initialisation
//! - `runtime`: tokio-based resilience primitives
//! - `prometheus`: Prometheus-backed metrics sink
//! - `test-utils`: scripted operations and timing assertions for tests

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod observability;
#[cfg(feature = "foundation")]
pub mod utils;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Testing utilities
// ---------------------------------------------------------------
#[cfg(all(feature = "runtime", any(feature = "test-utils", test)))]
pub mod testing;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use error::{ConfigError, ConfigResult, ErrorClassification, ErrorSeverity};
#[cfg(feature = "foundation")]
pub use observability::{MetricsSink, SharedMetrics};
#[cfg(feature = "runtime")]
pub use resilience::{
    BatchConfig, BatchError, BatchProcessor, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitBreakerRegistry, CircuitState, Clock, ConcurrencyLimiter, LimiterRegistry, MockClock,
    ResilienceError, ResiliencePipeline, ResilienceResult, ResilienceSettings, RetryConfig, RetryPolicy,
    SystemClock,
};
#[cfg(feature = "foundation")]
pub use utils::serde::duration_millis;
