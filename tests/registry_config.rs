//! Registry behaviour under YAML configuration.

use callshield::config::{ENV_CACHE_DIR, ENV_CACHE_TTL};
use callshield::registry::{CRAWL_SERVICE, GENERATIVE_SERVICE};
use callshield::{CacheManager, Error, GuardConfig, ServiceRegistry};
use std::time::Duration;

const CONFIG_YAML: &str = r#"
services:
  gemini_api:
    requests_per_minute: 2
    burst_allowance: 2
    recovery_timeout_seconds: 300
  internal_search:
    failure_threshold: 1
    success_threshold: 1
    half_open_max_calls: 1
cache:
  ttl_seconds: 900
  max_memory_entries: 64
"#;

#[test]
fn test_overrides_flow_into_created_instances() {
    let registry = ServiceRegistry::with_config(GuardConfig::from_yaml_str(CONFIG_YAML).unwrap())
        .unwrap();

    let limiter = registry.rate_limiter_for(GENERATIVE_SERVICE);
    assert_eq!(limiter.config().requests_per_minute, 2);
    assert_eq!(limiter.config().requests_per_hour, 500);
    assert_eq!(
        registry.circuit_breaker_for(GENERATIVE_SERVICE).config().recovery_timeout,
        Duration::from_secs(300)
    );

    // unknown service: moderate default plus its override
    let breaker = registry.circuit_breaker_for("internal_search");
    assert_eq!(breaker.config().failure_threshold, 1);
    assert_eq!(breaker.config().recovery_timeout, Duration::from_secs(45));

    // untouched built-in
    assert_eq!(registry.rate_limiter_for(CRAWL_SERVICE).config().burst_allowance, 3);
}

#[tokio::test(start_paused = true)]
async fn test_status_serializes_per_service() {
    let registry = ServiceRegistry::with_config(GuardConfig::from_yaml_str(CONFIG_YAML).unwrap())
        .unwrap();
    let guard = registry.guard(GENERATIVE_SERVICE);
    for _ in 0..2 {
        guard.execute(|| async { Ok::<_, Error>(()) }).await.unwrap();
    }
    let third = guard.execute(|| async { Ok::<_, Error>(()) }).await;
    assert!(matches!(third, Err(Error::RateLimited { .. })));

    let status = serde_json::to_value(registry.status()).unwrap();
    let limiter = &status["rate_limiters"][GENERATIVE_SERVICE];
    assert_eq!(limiter["minute_requests_used"], 2);
    assert_eq!(limiter["requests_per_minute"], 2);
    assert_eq!(status["circuit_breakers"][GENERATIVE_SERVICE]["state"], "closed");
    assert_eq!(registry.services(), vec![GENERATIVE_SERVICE.to_string()]);
}

#[test]
fn test_invalid_yaml_values_are_rejected() {
    let yaml = "services:\n  web_scraping:\n    half_open_max_calls: 1\n    success_threshold: 2\n";
    let err = GuardConfig::from_yaml_str(yaml).unwrap_err();
    assert!(matches!(err, Error::Configuration { .. }));
    assert_eq!(
        err.context().and_then(|c| c.field_path.as_deref()),
        Some("services.web_scraping.success_threshold")
    );

    let err = GuardConfig::from_yaml_str("cache:\n  ttl_seconds: 0\n").unwrap_err();
    assert!(err.to_string().contains("cache.ttl_seconds"));
}

#[tokio::test]
async fn test_config_file_and_environment_feed_the_cache() {
    let dir = std::env::temp_dir().join(format!("callshield-config-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("callshield.yaml");
    std::fs::write(&path, CONFIG_YAML).unwrap();

    let cache_root = dir.join("cache");
    let cache_root_str = cache_root.display().to_string();
    let config = GuardConfig::load(&path)
        .unwrap()
        .with_overrides_from(|name| match name {
            ENV_CACHE_DIR => Some(cache_root_str.clone()),
            ENV_CACHE_TTL => Some("120".to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.cache.max_memory_entries, 64);

    let cache = CacheManager::new(config.cache);
    let stats = cache.stats().await;
    assert_eq!(stats.ttl_seconds, 120.0);
    assert_eq!(stats.root, cache_root);
    assert!(cache_root.is_dir());

    assert!(GuardConfig::load(dir.join("missing.yaml")).is_err());
    let _ = std::fs::remove_dir_all(&dir);
}
