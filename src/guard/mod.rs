//! 调用守卫：将限流、熔断与缓存组合在一次调用周围。
//!
//! # Call Guards
//!
//! [`ServiceGuard`] wraps an async operation for one service. Stages run in a
//! fixed order and each is optional:
//!
//! 1. cache lookup (the `execute_cached*` methods only); a hit returns
//!    without consuming rate-limit budget or touching the breaker
//! 2. rate limiter admission ([`Error::RateLimited`] on rejection)
//! 3. circuit breaker admission ([`Error::CircuitOpen`] on rejection)
//! 4. the operation itself, optionally under a deadline, with its outcome
//!    reported to the breaker
//! 5. write-back of a successful result into the cache
//!
//! Rejections are converted into the caller's error type through `From<Error>`;
//! the operation's own errors are returned unchanged. Nothing here retries.
//!
//! ```rust,no_run
//! use callshield::{Error, ServiceRegistry};
//!
//! # async fn demo(registry: &ServiceRegistry) -> Result<(), Error> {
//! let summary: String = registry
//!     .guard("gemini_api")
//!     .execute(|| async { Ok::<_, Error>("summary".to_string()) })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::cache::{CacheKey, CacheManager, RegulationQuery};
use crate::registry::ServiceRegistry;
use crate::resilience::circuit_breaker::CircuitBreaker;
use crate::resilience::rate_limiter::RateLimiter;
use crate::Error;

#[derive(Clone)]
pub struct ServiceGuard {
    service: String,
    rate_limiter: Option<Arc<RateLimiter>>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    cost: u32,
    timeout: Option<Duration>,
}

impl ServiceGuard {
    /// A guard with no stages; add them with the `with_*` builders.
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            rate_limiter: None,
            circuit_breaker: None,
            cost: 1,
            timeout: None,
        }
    }

    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    /// Tokens charged against the burst bucket per call (default 1).
    pub fn with_cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: From<Error> + Display,
    {
        if let Some(limiter) = &self.rate_limiter {
            limiter.try_acquire(self.cost).map_err(E::from)?;
        }

        match (&self.circuit_breaker, self.timeout) {
            (Some(breaker), Some(timeout)) => breaker.call_with_timeout(timeout, op).await,
            (Some(breaker), None) => breaker.call(op).await,
            (None, Some(timeout)) => match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(E::from(Error::Timeout {
                    service: self.service.clone(),
                    after: timeout,
                })),
            },
            (None, None) => op().await,
        }
    }

    /// [`execute`](Self::execute) behind a cache lookup on `key`. Successful
    /// results are written back with empty metadata; errors are never cached.
    pub async fn execute_cached<F, Fut, T, E>(
        &self,
        cache: &CacheManager,
        key: &CacheKey,
        op: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<Error> + Display,
    {
        self.execute_cached_with_metadata(cache, key, Value::Null, op)
            .await
    }

    /// As [`execute_cached`](Self::execute_cached), storing `metadata` next to
    /// the written-back payload.
    pub async fn execute_cached_with_metadata<F, Fut, T, E>(
        &self,
        cache: &CacheManager,
        key: &CacheKey,
        metadata: Value,
        op: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<Error> + Display,
    {
        if let Some(hit) = cache.get::<T>(key).await {
            tracing::debug!(service = %self.service, key = %key, "served from cache");
            return Ok(hit);
        }
        let value = self.execute(op).await?;
        cache.set_with_metadata(key, &value, metadata).await;
        Ok(value)
    }

    /// Regulatory search behind the cache, keyed and annotated by `query`.
    pub async fn execute_regulation_search<F, Fut, T, E>(
        &self,
        cache: &CacheManager,
        query: &RegulationQuery,
        op: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Serialize + DeserializeOwned,
        E: From<Error> + Display,
    {
        let key = cache.key_generator().regulation_search(query);
        self.execute_cached_with_metadata(cache, &key, query.metadata(), op)
            .await
    }
}

/// Run `op` behind `service`'s rate limiter only.
pub async fn rate_limited<F, Fut, T, E>(registry: &ServiceRegistry, service: &str, op: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error> + Display,
{
    ServiceGuard::new(service)
        .with_rate_limiter(registry.rate_limiter_for(service))
        .execute(op)
        .await
}

/// Run `op` behind `service`'s circuit breaker only.
pub async fn circuit_protected<F, Fut, T, E>(
    registry: &ServiceRegistry,
    service: &str,
    op: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<Error> + Display,
{
    registry.circuit_breaker_for(service).call(op).await
}

/// Serve `key` from `cache`, falling back to `op` and caching its success.
pub async fn cached<F, Fut, T, E>(cache: &CacheManager, key: &CacheKey, op: F) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: Serialize + DeserializeOwned,
    E: From<Error> + Display,
{
    ServiceGuard::new("cache").execute_cached(cache, key, op).await
}
