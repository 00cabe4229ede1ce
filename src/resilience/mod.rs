//! 弹性模式模块：双窗口令牌桶限流器与三态熔断器。
//!
//! # Resilience Primitives
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`rate_limiter`] | Minute/hour sliding windows plus a burst token bucket |
//! | [`circuit_breaker`] | Closed / open / half-open failure isolation |
//!
//! Both primitives are keyed by a service name and safe to share across tasks
//! behind an `Arc`. Each keeps its state behind a short-lived mutex that is
//! never held across an `.await`.
//!
//! ```rust
//! use callshield::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use callshield::resilience::rate_limiter::{RateLimitConfig, RateLimiter};
//! use std::time::Duration;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> callshield::Result<()> {
//! let limiter = RateLimiter::new(
//!     "search",
//!     RateLimitConfig::new()
//!         .with_requests_per_minute(30)
//!         .with_cooldown(Duration::from_secs(10)),
//! );
//! assert!(limiter.check(1)?.allowed);
//!
//! let breaker = CircuitBreaker::new("search", CircuitBreakerConfig::default());
//! breaker.allow()?;
//! breaker.on_success();
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod rate_limiter;
