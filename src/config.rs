//! Configuration surface.
//!
//! A [`GuardConfig`] is usually loaded from YAML:
//!
//! ```yaml
//! services:
//!   gemini_api:
//!     requests_per_minute: 20
//!     recovery_timeout_seconds: 90
//!   internal_search:
//!     failure_threshold: 10
//! cache:
//!   root: /var/cache/callshield
//!   ttl_seconds: 1800
//! ```
//!
//! Every service field is optional and overlays the service's built-in profile
//! (see [`crate::registry::ServiceProfile::builtin`]).

use crate::cache::CacheConfig;
use crate::registry::ServiceProfile;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_CACHE_DIR: &str = "CALLSHIELD_CACHE_DIR";
pub const ENV_CACHE_TTL: &str = "CALLSHIELD_CACHE_TTL_SECS";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub services: HashMap<String, ServiceOverride>,
    pub cache: CacheConfig,
}

/// Per-service override; unset fields keep the built-in profile value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests_per_hour: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burst_allowance: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_threshold: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_timeout_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub half_open_max_calls: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_threshold: Option<u32>,
}

impl ServiceOverride {
    pub fn apply(&self, base: ServiceProfile) -> ServiceProfile {
        let mut profile = base;
        let rl = &mut profile.rate_limit;
        if let Some(v) = self.requests_per_minute {
            rl.requests_per_minute = v;
        }
        if let Some(v) = self.requests_per_hour {
            rl.requests_per_hour = v;
        }
        if let Some(v) = self.burst_allowance {
            rl.burst_allowance = v;
        }
        if let Some(v) = self.cooldown_seconds {
            rl.cooldown = Duration::from_secs(v);
        }

        let cb = &mut profile.circuit_breaker;
        if let Some(v) = self.failure_threshold {
            cb.failure_threshold = v;
        }
        if let Some(v) = self.recovery_timeout_seconds {
            cb.recovery_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.half_open_max_calls {
            cb.half_open_max_calls = v;
        }
        if let Some(v) = self.success_threshold {
            cb.success_threshold = v;
        }
        profile
    }
}

impl GuardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: GuardConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("failed to read config file: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    /// Profile a service resolves to: built-in profile plus any override.
    pub fn profile_for(&self, service: &str) -> ServiceProfile {
        let base = ServiceProfile::builtin(service);
        match self.services.get(service) {
            Some(ov) => ov.apply(base),
            None => base,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for name in self.services.keys() {
            self.profile_for(name).validate().map_err(|e| match e {
                Error::Configuration { message, context } => Error::Configuration {
                    message,
                    context: ErrorContext {
                        field_path: Some(format!(
                            "services.{}.{}",
                            name,
                            context.field_path.unwrap_or_default()
                        )),
                        ..context
                    },
                },
                other => other,
            })?;
        }
        if self.cache.ttl.is_zero() {
            return Err(Error::configuration_with_context(
                "cache ttl must be greater than zero",
                ErrorContext::new()
                    .with_field_path("cache.ttl_seconds")
                    .with_source("config_loader"),
            ));
        }
        Ok(())
    }

    /// Apply `CALLSHIELD_CACHE_DIR` / `CALLSHIELD_CACHE_TTL_SECS` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|d| !d.trim().is_empty()) {
            self.cache.root = PathBuf::from(dir);
        }
        if let Some(raw) = lookup(ENV_CACHE_TTL) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                Error::configuration_with_context(
                    "cache TTL must be a whole number of seconds",
                    ErrorContext::new()
                        .with_field_path(ENV_CACHE_TTL)
                        .with_details(raw.clone())
                        .with_source("config_loader"),
                )
            })?;
            self.cache.ttl = Duration::from_secs(secs);
        }
        self.validate()?;
        Ok(self)
    }
}

/// Serde helper: `Duration` as (possibly fractional) seconds.
pub(crate) mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
