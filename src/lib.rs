//! # callshield
//!
//! 面向外部服务调用的弹性层：限流、熔断与两级缓存。
//!
//! Resilience layer for calls to rate-limited, sometimes-unreliable external
//! services: a generative-AI backend, web-crawling targets and a vector-search
//! backend sit behind one uniform facade.
//!
//! ## Overview
//!
//! Each logical service name gets its own dual-window token-bucket
//! [`RateLimiter`](resilience::rate_limiter::RateLimiter) and three-state
//! [`CircuitBreaker`](resilience::circuit_breaker::CircuitBreaker), created on
//! first use from the service's profile. Expensive results are kept in a
//! two-tier TTL cache. [`ServiceGuard`] composes the three around any async
//! operation.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use callshield::cache::{CacheConfig, CacheManager, RegulationQuery};
//! use callshield::{Error, ServiceRegistry};
//!
//! #[tokio::main]
//! async fn main() -> callshield::Result<()> {
//!     let registry = ServiceRegistry::new();
//!     let cache = CacheManager::new(CacheConfig::default());
//!
//!     let query = RegulationQuery::new("Germany", "fintech", ["payments"]);
//!     let key = cache.key_generator().regulation_search(&query);
//!     let rules: Vec<String> = registry
//!         .guard("web_scraping")
//!         .execute_cached(&cache, &key, || async {
//!             Ok::<_, Error>(vec!["PSD2".to_string()])
//!         })
//!         .await?;
//!     println!("{rules:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`resilience`] | Rate limiter and circuit breaker |
//! | [`registry`] | Per-service instances and built-in profiles |
//! | [`cache`] | Two-tier TTL cache and key generation |
//! | [`guard`] | Call-wrapping combinators |
//! | [`config`] | YAML configuration and environment overrides |
//! | [`error`] | Error type and context |

pub mod cache;
pub mod config;
pub mod guard;
pub mod registry;
pub mod resilience;

// Re-export main types for convenience
pub use cache::{CacheConfig, CacheKey, CacheManager, RegulationQuery};
pub use config::GuardConfig;
pub use guard::{cached, circuit_protected, rate_limited, ServiceGuard};
pub use registry::{RegistryStatus, ServiceProfile, ServiceRegistry};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use resilience::rate_limiter::{RateLimitConfig, RateLimitDecision, RateLimiter};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{CircuitRejection, Error, ErrorContext, RateLimitReason};
