//! Guarded HTTP calls against a mock upstream.

mod integration;

use callshield::cache::{CacheConfig, CacheManager, RegulationQuery};
use callshield::{
    CircuitBreakerConfig, CircuitState, RateLimitConfig, ServiceProfile, ServiceRegistry,
};
use integration::mock_server::MockServerFixture;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const SERVICE: &str = "regulator_api";

/// Application-level error a caller would define around the guard.
#[derive(Debug)]
enum SearchError {
    Guard(callshield::Error),
    Http(reqwest::Error),
    Status(u16),
}

impl From<callshield::Error> for SearchError {
    fn from(e: callshield::Error) -> Self {
        SearchError::Guard(e)
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(e: reqwest::Error) -> Self {
        SearchError::Http(e)
    }
}

impl fmt::Display for SearchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchError::Guard(e) => write!(f, "{e}"),
            SearchError::Http(e) => write!(f, "http: {e}"),
            SearchError::Status(code) => write!(f, "upstream returned {code}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SearchResponse {
    results: Vec<String>,
}

async fn search(client: &reqwest::Client, url: &str) -> Result<SearchResponse, SearchError> {
    let resp = client
        .get(url)
        .query(&[("country", "DE"), ("industry", "fintech")])
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(SearchError::Status(resp.status().as_u16()));
    }
    Ok(resp.json().await?)
}

fn registry(recovery: Duration) -> ServiceRegistry {
    let registry = ServiceRegistry::new();
    registry
        .register(
            SERVICE,
            ServiceProfile::new(
                RateLimitConfig::new(),
                CircuitBreakerConfig::new()
                    .with_failure_threshold(2)
                    .with_recovery_timeout(recovery)
                    .with_half_open_max_calls(1)
                    .with_success_threshold(1),
            ),
        )
        .unwrap();
    registry
}

#[tokio::test]
async fn test_server_errors_trip_the_breaker() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture.mock_error_response("/search", 503, 2).await;
    let client = reqwest::Client::new();
    let url = fixture.url("/search");
    let registry = registry(Duration::from_secs(60));
    let guard = registry.guard(SERVICE);

    for _ in 0..2 {
        let err = guard.execute(|| search(&client, &url)).await.unwrap_err();
        assert!(matches!(err, SearchError::Status(503)), "got {err}");
    }

    // open: rejected without reaching the server
    let err = guard.execute(|| search(&client, &url)).await.unwrap_err();
    match err {
        SearchError::Guard(e) => {
            assert!(e.is_circuit_open());
            assert!(e.retry_after().unwrap() > Duration::from_secs(55));
        }
        other => panic!("expected a circuit rejection, got {other}"),
    }
    assert_eq!(
        registry.circuit_breaker_for(SERVICE).state().unwrap(),
        CircuitState::Open
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn test_breaker_closes_after_successful_trial() {
    let fixture = MockServerFixture::new().await;
    let failing = fixture.mock_error_response("/search", 500, 2).await;
    let client = reqwest::Client::new();
    let url = fixture.url("/search");
    let registry = registry(Duration::from_millis(200));
    let guard = registry.guard(SERVICE);

    for _ in 0..2 {
        assert!(guard.execute(|| search(&client, &url)).await.is_err());
    }
    failing.assert_async().await;
    failing.remove_async().await;

    let healthy = fixture
        .mock_json_response("/search", r#"{"results":["PSD2"]}"#, 1)
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    let resp = guard.execute(|| search(&client, &url)).await.unwrap();
    assert_eq!(resp.results, vec!["PSD2".to_string()]);
    assert_eq!(
        registry.circuit_breaker_for(SERVICE).state().unwrap(),
        CircuitState::Closed
    );
    healthy.assert_async().await;
}

#[tokio::test]
async fn test_cached_response_skips_the_network() {
    let fixture = MockServerFixture::new().await;
    let mock = fixture
        .mock_json_response("/search", r#"{"results":["PSD2","KWG"]}"#, 1)
        .await;
    let client = reqwest::Client::new();
    let url = fixture.url("/search");
    let registry = registry(Duration::from_secs(60));
    let root = std::env::temp_dir().join(format!("callshield-http-{}", uuid::Uuid::new_v4()));
    let cache = CacheManager::new(CacheConfig::new().with_root(&root));

    let query = RegulationQuery::new("DE", "fintech", ["payments"]);
    let key = cache.key_generator().regulation_search(&query);
    let guard = registry.guard(SERVICE);

    let first = guard
        .execute_regulation_search(&cache, &query, || search(&client, &url))
        .await
        .unwrap();
    let second = guard
        .execute_regulation_search(&cache, &query, || search(&client, &url))
        .await
        .unwrap();
    assert_eq!(first, second);
    assert_eq!(first.results.len(), 2);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.writes, 1);
    // only the first call consumed rate-limit budget
    assert_eq!(
        registry.rate_limiter_for(SERVICE).snapshot().unwrap().minute_requests_used,
        1
    );
    let record = cache.get_record(&key).await.unwrap();
    assert_eq!(record.metadata["country"], "DE");
    mock.assert_async().await;
    let _ = std::fs::remove_dir_all(&root);
}
