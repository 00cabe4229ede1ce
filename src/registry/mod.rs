//! Service registry: one rate limiter and one circuit breaker per service name.
//!
//! The registry is an ordinary value owned by the application and shared by
//! reference (or `Arc`); instances are created lazily the first time a service
//! name is used, with that service's profile.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::Serialize;

use crate::config::GuardConfig;
use crate::guard::ServiceGuard;
use crate::resilience::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot,
};
use crate::resilience::rate_limiter::{RateLimitConfig, RateLimiter, RateLimiterSnapshot};
use crate::{Error, ErrorContext, Result};

/// Expensive generative backend.
pub const GENERATIVE_SERVICE: &str = "gemini_api";
/// Bulk web crawling.
pub const CRAWL_SERVICE: &str = "web_scraping";
/// Vector-search backend.
pub const VECTOR_SERVICE: &str = "vector_store";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceProfile {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

fn rate(rpm: u32, rph: u32, burst: u32, cooldown_secs: u64) -> RateLimitConfig {
    RateLimitConfig {
        requests_per_minute: rpm,
        requests_per_hour: rph,
        burst_allowance: burst,
        cooldown: Duration::from_secs(cooldown_secs),
    }
}

fn circuit(failures: u32, recovery_secs: u64, half_open: u32, successes: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: failures,
        recovery_timeout: Duration::from_secs(recovery_secs),
        half_open_max_calls: half_open,
        success_threshold: successes,
    }
}

static DEFAULT_PROFILE: Lazy<ServiceProfile> = Lazy::new(|| ServiceProfile {
    rate_limit: rate(50, 800, 8, 30),
    circuit_breaker: circuit(3, 45, 2, 2),
});

static BUILTIN_PROFILES: Lazy<HashMap<&'static str, ServiceProfile>> = Lazy::new(|| {
    let mut profiles = HashMap::new();
    // tight: every call costs money, fail fast and recover slowly
    profiles.insert(
        GENERATIVE_SERVICE,
        ServiceProfile {
            rate_limit: rate(30, 500, 5, 45),
            circuit_breaker: circuit(2, 120, 1, 1),
        },
    );
    profiles.insert(
        CRAWL_SERVICE,
        ServiceProfile {
            rate_limit: rate(20, 400, 3, 60),
            circuit_breaker: circuit(4, 60, 3, 2),
        },
    );
    profiles.insert(
        VECTOR_SERVICE,
        ServiceProfile {
            rate_limit: rate(100, 2000, 20, 10),
            circuit_breaker: DEFAULT_PROFILE.circuit_breaker.clone(),
        },
    );
    profiles
});

impl ServiceProfile {
    pub fn new(rate_limit: RateLimitConfig, circuit_breaker: CircuitBreakerConfig) -> Self {
        Self {
            rate_limit,
            circuit_breaker,
        }
    }

    /// Built-in profile for `service`, falling back to the moderate default.
    pub fn builtin(service: &str) -> Self {
        BUILTIN_PROFILES
            .get(service)
            .cloned()
            .unwrap_or_else(|| DEFAULT_PROFILE.clone())
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        self.circuit_breaker.validate()
    }
}

/// Per-service status, as reported by [`ServiceRegistry::status`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStatus {
    pub rate_limiters: BTreeMap<String, RateLimiterSnapshot>,
    pub circuit_breakers: BTreeMap<String, CircuitBreakerSnapshot>,
}

pub struct ServiceRegistry {
    config: GuardConfig,
    profiles: RwLock<HashMap<String, ServiceProfile>>,
    rate_limiters: RwLock<HashMap<String, Arc<RateLimiter>>>,
    circuit_breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            config: GuardConfig::default(),
            profiles: RwLock::new(HashMap::new()),
            rate_limiters: RwLock::new(HashMap::new()),
            circuit_breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Registry whose services resolve through `config`'s overrides.
    pub fn with_config(config: GuardConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            ..Self::new()
        })
    }

    /// Install an explicit profile for `service`. Fails once the service's
    /// limiter or breaker has been created.
    pub fn register(&self, service: impl Into<String>, profile: ServiceProfile) -> Result<()> {
        let service = service.into();
        profile.validate()?;
        if self.is_active(&service) {
            return Err(Error::configuration_with_context(
                format!("service '{}' is already in use", service),
                ErrorContext::new()
                    .with_field_path(format!("services.{}", service))
                    .with_source("service_registry"),
            ));
        }
        write(&self.profiles).insert(service, profile);
        Ok(())
    }

    /// Profile `service` resolves to: explicit registration, else config
    /// override on top of the built-in profile.
    pub fn profile_for(&self, service: &str) -> ServiceProfile {
        if let Some(profile) = read(&self.profiles).get(service) {
            return profile.clone();
        }
        self.config.profile_for(service)
    }

    pub fn rate_limiter_for(&self, service: &str) -> Arc<RateLimiter> {
        if let Some(limiter) = read(&self.rate_limiters).get(service) {
            return Arc::clone(limiter);
        }
        let mut limiters = write(&self.rate_limiters);
        let limiter = limiters.entry(service.to_string()).or_insert_with(|| {
            let cfg = self.profile_for(service).rate_limit;
            tracing::debug!(
                service,
                requests_per_minute = cfg.requests_per_minute,
                requests_per_hour = cfg.requests_per_hour,
                burst_allowance = cfg.burst_allowance,
                "created rate limiter"
            );
            Arc::new(RateLimiter::new(service, cfg))
        });
        Arc::clone(limiter)
    }

    pub fn circuit_breaker_for(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = read(&self.circuit_breakers).get(service) {
            return Arc::clone(breaker);
        }
        let mut breakers = write(&self.circuit_breakers);
        let breaker = breakers.entry(service.to_string()).or_insert_with(|| {
            let cfg = self.profile_for(service).circuit_breaker;
            tracing::debug!(
                service,
                failure_threshold = cfg.failure_threshold,
                recovery_timeout_secs = cfg.recovery_timeout.as_secs(),
                "created circuit breaker"
            );
            Arc::new(CircuitBreaker::new(service, cfg))
        });
        Arc::clone(breaker)
    }

    /// Rate limiter + circuit breaker guard for `service`.
    pub fn guard(&self, service: &str) -> ServiceGuard {
        ServiceGuard::new(service)
            .with_rate_limiter(self.rate_limiter_for(service))
            .with_circuit_breaker(self.circuit_breaker_for(service))
    }

    fn is_active(&self, service: &str) -> bool {
        read(&self.rate_limiters).contains_key(service)
            || read(&self.circuit_breakers).contains_key(service)
    }

    /// Names of all services with a live limiter or breaker.
    pub fn services(&self) -> Vec<String> {
        let mut names: BTreeSet<String> = read(&self.rate_limiters).keys().cloned().collect();
        names.extend(read(&self.circuit_breakers).keys().cloned());
        names.into_iter().collect()
    }

    /// Drop a service's limiter and breaker; the next use starts fresh.
    pub fn reset(&self, service: &str) -> bool {
        let limiter = write(&self.rate_limiters).remove(service).is_some();
        let breaker = write(&self.circuit_breakers).remove(service).is_some();
        if limiter || breaker {
            tracing::info!(service, "service state reset");
        }
        limiter || breaker
    }

    pub fn status(&self) -> RegistryStatus {
        let mut status = RegistryStatus::default();
        for (name, limiter) in read(&self.rate_limiters).iter() {
            match limiter.snapshot() {
                Ok(s) => {
                    status.rate_limiters.insert(name.clone(), s);
                }
                Err(e) => tracing::error!(service = %name, error = %e, "rate limiter snapshot failed"),
            }
        }
        for (name, breaker) in read(&self.circuit_breakers).iter() {
            match breaker.snapshot() {
                Ok(s) => {
                    status.circuit_breakers.insert(name.clone(), s);
                }
                Err(e) => tracing::error!(service = %name, error = %e, "circuit breaker snapshot failed"),
            }
        }
        status
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::circuit_breaker::CircuitState;

    #[test]
    fn test_builtin_profiles() {
        let gen = ServiceProfile::builtin(GENERATIVE_SERVICE);
        assert_eq!(gen.rate_limit.requests_per_minute, 30);
        assert_eq!(gen.circuit_breaker.failure_threshold, 2);
        assert_eq!(gen.circuit_breaker.recovery_timeout, Duration::from_secs(120));

        let crawl = ServiceProfile::builtin(CRAWL_SERVICE);
        assert_eq!(crawl.rate_limit.burst_allowance, 3);
        assert_eq!(crawl.circuit_breaker.half_open_max_calls, 3);

        let vector = ServiceProfile::builtin(VECTOR_SERVICE);
        assert_eq!(vector.rate_limit.requests_per_hour, 2000);
        assert_eq!(vector.circuit_breaker, DEFAULT_PROFILE.circuit_breaker);

        let other = ServiceProfile::builtin("geocoder");
        assert_eq!(other, *DEFAULT_PROFILE);

        for profile in BUILTIN_PROFILES.values() {
            assert!(profile.validate().is_ok());
        }
    }

    #[test]
    fn test_same_instance_per_service() {
        let registry = ServiceRegistry::new();
        let a = registry.rate_limiter_for(CRAWL_SERVICE);
        let b = registry.rate_limiter_for(CRAWL_SERVICE);
        assert!(Arc::ptr_eq(&a, &b));

        let c = registry.circuit_breaker_for(CRAWL_SERVICE);
        let d = registry.circuit_breaker_for(CRAWL_SERVICE);
        assert!(Arc::ptr_eq(&c, &d));

        assert!(!Arc::ptr_eq(&a, &registry.rate_limiter_for(VECTOR_SERVICE)));
        assert_eq!(registry.services(), vec![CRAWL_SERVICE, VECTOR_SERVICE]);
    }

    #[test]
    fn test_register_before_first_use() {
        let registry = ServiceRegistry::new();
        let profile = ServiceProfile::new(
            RateLimitConfig::new().with_requests_per_minute(2),
            CircuitBreakerConfig::new().with_failure_threshold(9),
        );
        registry.register("geocoder", profile.clone()).unwrap();
        assert_eq!(registry.rate_limiter_for("geocoder").config().requests_per_minute, 2);
        assert_eq!(registry.circuit_breaker_for("geocoder").config().failure_threshold, 9);

        let err = registry.register("geocoder", profile).unwrap_err();
        assert!(err.to_string().contains("already in use"));
    }

    #[test]
    fn test_register_validates_profile() {
        let registry = ServiceRegistry::new();
        let bad = ServiceProfile::new(
            RateLimitConfig::new().with_requests_per_hour(0),
            CircuitBreakerConfig::new(),
        );
        assert!(registry.register("geocoder", bad).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_every_service() {
        let registry = ServiceRegistry::new();
        let limiter = registry.rate_limiter_for(GENERATIVE_SERVICE);
        limiter.check(1).unwrap();
        limiter.check(1).unwrap();

        let breaker = registry.circuit_breaker_for(GENERATIVE_SERVICE);
        breaker.on_failure();
        breaker.on_failure();

        let status = registry.status();
        let rl = &status.rate_limiters[GENERATIVE_SERVICE];
        assert_eq!(rl.tokens_available, 3.0);
        assert_eq!(rl.minute_requests_used, 2);
        assert_eq!(rl.hour_requests_used, 2);

        let cb = &status.circuit_breakers[GENERATIVE_SERVICE];
        assert_eq!(cb.state, CircuitState::Open);
        assert_eq!(cb.failure_count, 2);
        assert_eq!(cb.seconds_until_retry, 120.0);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["circuit_breakers"][GENERATIVE_SERVICE]["state"], "open");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_starts_fresh() {
        let registry = ServiceRegistry::new();
        registry.circuit_breaker_for(GENERATIVE_SERVICE).on_failure();
        assert!(registry.reset(GENERATIVE_SERVICE));
        assert_eq!(
            registry
                .circuit_breaker_for(GENERATIVE_SERVICE)
                .snapshot()
                .unwrap()
                .failure_count,
            0
        );
        assert!(!registry.reset("never_used"));
    }

    #[test]
    fn test_concurrent_lazy_creation_yields_one_instance() {
        let registry = Arc::new(ServiceRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.circuit_breaker_for(VECTOR_SERVICE))
            })
            .collect();
        let breakers: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for b in &breakers[1..] {
            assert!(Arc::ptr_eq(&breakers[0], b));
        }
    }
}
