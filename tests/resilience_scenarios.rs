//! End-to-end behaviour of the rate limiter and circuit breaker, driven on a
//! paused clock.

use callshield::error::RateLimitReason;
use callshield::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Error, RateLimitConfig, RateLimiter,
    ServiceProfile, ServiceRegistry,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::advance;
use tokio_test::{assert_err, assert_ok};

#[tokio::test(start_paused = true)]
async fn test_six_rapid_checks_against_minute_limit_of_five() {
    let limiter = RateLimiter::new(
        "search",
        RateLimitConfig::new()
            .with_requests_per_minute(5)
            .with_burst_allowance(5),
    );

    for i in 0..5 {
        let decision = limiter.check(1).unwrap();
        assert!(decision.allowed, "check {} should be admitted", i);
    }
    let sixth = limiter.check(1).unwrap();
    assert!(!sixth.allowed);
    assert_eq!(sixth.reason, Some(RateLimitReason::MinuteLimitExceeded));
    assert_eq!(sixth.remaining_minute, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_timeout() {
    let breaker = CircuitBreaker::new(
        "gen",
        CircuitBreakerConfig::new()
            .with_failure_threshold(2)
            .with_recovery_timeout(Duration::from_secs(10))
            .with_success_threshold(1),
    );

    for _ in 0..2 {
        let result: Result<(), Error> = breaker.call(|| async { Err(Error::upstream("503")) }).await;
        assert_err!(result);
    }
    assert_eq!(breaker.state().unwrap(), CircuitState::Open);

    advance(Duration::from_secs(5)).await;
    let invoked = &AtomicUsize::new(0);
    let rejected = breaker
        .call(move || async move {
            invoked.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(())
        })
        .await
        .unwrap_err();
    let retry_after = rejected.retry_after().unwrap();
    assert!((retry_after.as_secs_f64() - 5.0).abs() < 0.01, "retry_after = {:?}", retry_after);
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    advance(Duration::from_secs(6)).await;
    let value = assert_ok!(breaker.call(|| async { Ok::<_, Error>("recovered") }).await);
    assert_eq!(value, "recovered");
    assert_eq!(breaker.state().unwrap(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().unwrap().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_minute_window_slides_through_registry() {
    let registry = ServiceRegistry::new();
    registry
        .register(
            "crawler",
            ServiceProfile::new(
                RateLimitConfig::new()
                    .with_requests_per_minute(3)
                    .with_burst_allowance(3),
                CircuitBreakerConfig::default(),
            ),
        )
        .unwrap();
    let guard = registry.guard("crawler");

    for _ in 0..3 {
        assert_ok!(guard.execute(|| async { Ok::<_, Error>(()) }).await);
        advance(Duration::from_secs(10)).await;
    }
    let err = guard.execute(|| async { Ok::<_, Error>(()) }).await.unwrap_err();
    assert!(err.is_rate_limited());
    // oldest admission was 30s ago
    assert_eq!(err.retry_after(), Some(Duration::from_secs(30)));

    advance(Duration::from_secs(31)).await;
    assert_ok!(guard.execute(|| async { Ok::<_, Error>(()) }).await);
}

#[tokio::test(start_paused = true)]
async fn test_three_failures_then_half_open_trials() {
    let registry = ServiceRegistry::new();
    registry
        .register(
            "vectors",
            ServiceProfile::new(
                RateLimitConfig::default(),
                CircuitBreakerConfig::new()
                    .with_failure_threshold(3)
                    .with_recovery_timeout(Duration::from_secs(30))
                    .with_half_open_max_calls(2)
                    .with_success_threshold(2),
            ),
        )
        .unwrap();
    let breaker = registry.circuit_breaker_for("vectors");

    for _ in 0..3 {
        let _ = callshield::circuit_protected(&registry, "vectors", || async {
            Err::<(), _>(Error::upstream("timeout"))
        })
        .await;
    }
    assert_eq!(breaker.state().unwrap(), CircuitState::Open);

    advance(Duration::from_secs(30)).await;
    assert_ok!(
        callshield::circuit_protected(&registry, "vectors", || async { Ok::<_, Error>(()) }).await
    );
    assert_eq!(breaker.state().unwrap(), CircuitState::HalfOpen);
    assert_ok!(
        callshield::circuit_protected(&registry, "vectors", || async { Ok::<_, Error>(()) }).await
    );
    assert_eq!(breaker.state().unwrap(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().unwrap().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_call_counts_as_failure() {
    let breaker = Arc::new(CircuitBreaker::new(
        "slow",
        CircuitBreakerConfig::new().with_failure_threshold(1),
    ));

    let task = {
        let breaker = Arc::clone(&breaker);
        tokio::spawn(async move {
            breaker
                .call(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, Error>(())
                })
                .await
        })
    };
    tokio::task::yield_now().await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(breaker.state().unwrap(), CircuitState::Open);
}

#[tokio::test(start_paused = true)]
async fn test_shared_limiter_admits_exactly_the_budget() {
    let registry = Arc::new(ServiceRegistry::new());
    registry
        .register(
            "shared",
            ServiceProfile::new(
                RateLimitConfig::new()
                    .with_requests_per_minute(10)
                    .with_burst_allowance(10),
                CircuitBreakerConfig::default(),
            ),
        )
        .unwrap();

    let handles: Vec<_> = (0..25)
        .map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                callshield::rate_limited(&registry, "shared", || async { Ok::<_, Error>(()) }).await
            })
        })
        .collect();

    let admitted = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter(|joined| matches!(joined, Ok(Ok(()))))
        .count();
    assert_eq!(admitted, 10);
}
