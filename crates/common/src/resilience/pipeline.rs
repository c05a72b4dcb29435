//! Composed call protection
//!
//! [`ResiliencePipeline`] layers the primitives in a fixed order:
//!
//! ```text
//! breaker( retry( limiter( operation ) ) )
//! ```
//!
//! The breaker admits or rejects the whole call before any attempt runs, so a
//! retry loop counts as one breaker outcome. Every attempt holds a limiter
//! permit only while it runs, and backoff sleeps happen without a permit.
//! Every layer is optional.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use tracing::{instrument, warn};

use super::circuit_breaker::{CallPermit, CircuitBreaker};
use super::clock::{Clock, SystemClock};
use super::concurrency::{ConcurrencyLimiter, LimiterPermit};
use super::error::{ResilienceError, ResilienceResult};
use super::retry::{policies, RetryCondition, RetryPolicy};

/// Breaker, retry and limiter applied around one operation
pub struct ResiliencePipeline<P = policies::Classified, C: Clock = SystemClock> {
    breaker: Option<CircuitBreaker<C>>,
    retry: Option<RetryPolicy<P>>,
    limiter: Option<ConcurrencyLimiter>,
    acquire_timeout: Option<Duration>,
    deadline: Option<Duration>,
}

impl<P: fmt::Debug, C: Clock> fmt::Debug for ResiliencePipeline<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResiliencePipeline")
            .field("breaker", &self.breaker.as_ref().map(CircuitBreaker::name))
            .field("retry", &self.retry)
            .field("limiter", &self.limiter.as_ref().map(ConcurrencyLimiter::key))
            .field("acquire_timeout", &self.acquire_timeout)
            .field("deadline", &self.deadline)
            .finish()
    }
}

impl Default for ResiliencePipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl ResiliencePipeline {
    /// Pipeline with no layers; calls pass straight through
    pub fn new() -> Self {
        Self { breaker: None, retry: None, limiter: None, acquire_timeout: None, deadline: None }
    }
}

impl<P, C: Clock> ResiliencePipeline<P, C> {
    /// Guard calls with `breaker`
    #[must_use]
    pub fn with_breaker<D: Clock>(self, breaker: CircuitBreaker<D>) -> ResiliencePipeline<P, D> {
        ResiliencePipeline {
            breaker: Some(breaker),
            retry: self.retry,
            limiter: self.limiter,
            acquire_timeout: self.acquire_timeout,
            deadline: self.deadline,
        }
    }

    /// Retry failed attempts with `retry`
    #[must_use]
    pub fn with_retry<Q>(self, retry: RetryPolicy<Q>) -> ResiliencePipeline<Q, C> {
        ResiliencePipeline {
            breaker: self.breaker,
            retry: Some(retry),
            limiter: self.limiter,
            acquire_timeout: self.acquire_timeout,
            deadline: self.deadline,
        }
    }

    /// Hold a permit of `limiter` during each attempt
    #[must_use]
    pub fn with_limiter(mut self, limiter: ConcurrencyLimiter, acquire_timeout: Option<Duration>) -> Self {
        self.limiter = Some(limiter);
        self.acquire_timeout = acquire_timeout;
        self
    }

    /// Bound the whole call, retries and waits included
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Breaker layer, if any
    pub fn breaker(&self) -> Option<&CircuitBreaker<C>> {
        self.breaker.as_ref()
    }

    /// Retry layer, if any
    pub fn retry(&self) -> Option<&RetryPolicy<P>> {
        self.retry.as_ref()
    }

    /// Limiter layer, if any
    pub fn limiter(&self) -> Option<&ConcurrencyLimiter> {
        self.limiter.as_ref()
    }

    /// Run a blocking operation through every configured layer
    ///
    /// The deadline is checked before each attempt; a running attempt is
    /// never interrupted.
    ///
    /// # Errors
    ///
    /// Returns the first layer's failure: [`ResilienceError::CircuitOpen`]
    /// before any attempt, [`ResilienceError::PermitTimeout`],
    /// [`ResilienceError::DeadlineExceeded`], or the operation's error wrapped
    /// according to the retry outcome.
    #[instrument(level = "debug", skip_all)]
    pub fn call<F, T, E>(&self, mut operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: RetryCondition<ResilienceError<E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit()?;
        let started = Instant::now();
        let attempts = AtomicU32::new(0);

        let mut attempt = || -> ResilienceResult<T, E> {
            let made = attempts.fetch_add(1, Ordering::Relaxed);
            if let Some(deadline) = self.deadline {
                if started.elapsed() >= deadline {
                    return Err(ResilienceError::DeadlineExceeded { deadline, attempts: made });
                }
            }
            let _slot = self.acquire_blocking()?;
            operation().map_err(|source| ResilienceError::Operation { source })
        };

        let result = match &self.retry {
            Some(retry) => retry.call(attempt).map_err(ResilienceError::flatten),
            None => attempt(),
        };
        Self::settle(permit, &result);
        result
    }

    /// Run an async operation through every configured layer
    ///
    /// With a deadline, the call is abandoned at expiry, including any
    /// attempt in flight, and the breaker records a failure.
    ///
    /// # Errors
    ///
    /// Same as [`ResiliencePipeline::call`].
    #[instrument(level = "debug", skip_all)]
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> ResilienceResult<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: RetryCondition<ResilienceError<E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        let permit = self.admit()?;
        let attempts = AtomicU32::new(0);

        let run = async {
            let attempt = || {
                attempts.fetch_add(1, Ordering::Relaxed);
                let pending = operation();
                async move {
                    let _slot = self.acquire_async().await?;
                    pending.await.map_err(|source| ResilienceError::Operation { source })
                }
            };
            match &self.retry {
                Some(retry) => retry.execute(attempt).await.map_err(ResilienceError::flatten),
                None => {
                    let mut attempt = attempt;
                    attempt().await
                }
            }
        };

        let result = match self.deadline {
            None => run.await,
            Some(deadline) => match tokio::time::timeout(deadline, run).await {
                Ok(result) => result,
                Err(_) => {
                    let attempts = attempts.load(Ordering::Relaxed);
                    warn!(deadline_ms = deadline.as_millis(), attempts, "pipeline deadline exceeded");
                    Err(ResilienceError::DeadlineExceeded { deadline, attempts })
                }
            },
        };
        Self::settle(permit, &result);
        result
    }

    fn admit(&self) -> Result<Option<CallPermit<C>>, super::error::CircuitBreakerError> {
        self.breaker.as_ref().map(CircuitBreaker::admit).transpose()
    }

    fn acquire_blocking(&self) -> Result<Option<LimiterPermit>, super::error::PermitTimeout> {
        match (&self.limiter, self.acquire_timeout) {
            (None, _) => Ok(None),
            (Some(limiter), Some(timeout)) => limiter.acquire_timeout(timeout).map(Some),
            (Some(limiter), None) => Ok(Some(limiter.acquire())),
        }
    }

    async fn acquire_async(&self) -> Result<Option<LimiterPermit>, super::error::PermitTimeout> {
        match (&self.limiter, self.acquire_timeout) {
            (None, _) => Ok(None),
            (Some(limiter), Some(timeout)) => limiter.acquire_async_timeout(timeout).await.map(Some),
            (Some(limiter), None) => Ok(Some(limiter.acquire_async().await)),
        }
    }

    fn settle<T, E>(permit: Option<CallPermit<C>>, result: &ResilienceResult<T, E>)
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let Some(permit) = permit else {
            return;
        };
        if result.is_ok() {
            permit.success();
        } else {
            permit.failure();
        }
    }
}
