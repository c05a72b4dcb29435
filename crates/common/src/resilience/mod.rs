//! Resilience patterns for outbound calls
//!
//! - **Circuit breaker**: stops calling a failing service until it has had
//!   time to recover, then probes it.
//! - **Retry**: exponential backoff with jitter, deadline-aware.
//! - **Concurrency limiter**: per-service permit pools shared by blocking and
//!   async callers.
//! - **Batch processor**: order-preserving, adaptively sized fan-out over a
//!   limiter.
//! - **Pipeline**: the three call wrappers composed in a fixed order.
//!
//! Every primitive is generic over the caller's error type and wraps it in
//! [`ResilienceError`], so the original failure is always recoverable.
//! Time-dependent behavior goes through [`Clock`] (breakers) or tokio's clock
//! (delays and deadlines), so tests can run with `MockClock` or paused time.
//!
//! ## Blocking and async
//!
//! Breakers, retry policies, limiters and pipelines each offer a blocking
//! entry point (`call`, `acquire`) and an async one (`execute`,
//! `acquire_async`). The batch processor is async only.

pub mod batch;
pub mod circuit_breaker;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod retry;

pub use batch::{BatchConfig, BatchError, BatchProcessor, BatchStats};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use concurrency::{ConcurrencyLimiter, LimiterConfig, LimiterPermit, LimiterRegistry, LimiterSnapshot};
pub use config::ResilienceSettings;
pub use error::{CircuitBreakerError, PermitTimeout, ResilienceError, ResilienceResult};
pub use pipeline::ResiliencePipeline;
pub use retry::{
    policies, HasStatusCode, RetryCondition, RetryConfig, RetryConfigBuilder, RetryDecision, RetryPolicy,
    RetryStats, DEFAULT_RETRY_STATUS_CODES,
};
