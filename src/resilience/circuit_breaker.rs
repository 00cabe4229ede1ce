use crate::error::CircuitRejection;
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) that trip the breaker.
    pub failure_threshold: u32,
    /// Time after the last failure before a trial call is let through.
    pub recovery_timeout: Duration,
    /// Trial calls admitted while half-open.
    pub half_open_max_calls: u32,
    /// Half-open successes needed to close again.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
            success_threshold: 2,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let ctx = |field: &str| {
            ErrorContext::new()
                .with_field_path(field)
                .with_source("circuit_breaker")
        };
        if self.failure_threshold == 0 {
            return Err(Error::configuration_with_context(
                "failure_threshold must be greater than zero",
                ctx("failure_threshold"),
            ));
        }
        if self.half_open_max_calls == 0 {
            return Err(Error::configuration_with_context(
                "half_open_max_calls must be greater than zero",
                ctx("half_open_max_calls"),
            ));
        }
        if self.success_threshold == 0 || self.success_threshold > self.half_open_max_calls {
            return Err(Error::configuration_with_context(
                "success_threshold must be between 1 and half_open_max_calls",
                ctx("success_threshold").with_details(format!(
                    "success_threshold={}, half_open_max_calls={}",
                    self.success_threshold, self.half_open_max_calls
                )),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_calls: u32,
    pub failure_threshold: u32,
    pub seconds_until_retry: f64,
}

#[derive(Debug)]
struct State {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    last_failure: Option<Instant>,
}

impl State {
    fn until_retry(&self, cfg: &CircuitBreakerConfig, now: Instant) -> Duration {
        match (self.state, self.last_failure) {
            (CircuitState::Open, Some(t)) => cfg.recovery_timeout.saturating_sub(now.duration_since(t)),
            _ => Duration::ZERO,
        }
    }
}

/// Three-state circuit breaker (closed / open / half-open).
///
/// Admission and outcome bookkeeping each take the state lock briefly; the
/// wrapped operation itself runs unlocked.
pub struct CircuitBreaker {
    name: String,
    cfg: CircuitBreakerConfig,
    state: Mutex<State>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, cfg: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            cfg,
            state: Mutex::new(State {
                state: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_calls: 0,
                last_failure: None,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    pub fn state(&self) -> Result<CircuitState> {
        let st = self
            .state
            .lock()
            .map_err(|_| Error::poisoned("circuit_breaker"))?;
        Ok(st.state)
    }

    /// Admission check. Moves OPEN to HALF_OPEN once the recovery timeout has
    /// elapsed and counts the call against the half-open budget.
    pub fn allow(&self) -> Result<()> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| Error::poisoned("circuit_breaker"))?;
        let now = Instant::now();

        if st.state == CircuitState::Open {
            let retry_after = st.until_retry(&self.cfg, now);
            if !retry_after.is_zero() {
                return Err(Error::CircuitOpen {
                    service: self.name.clone(),
                    reason: CircuitRejection::Open,
                    retry_after,
                });
            }
            st.state = CircuitState::HalfOpen;
            st.half_open_calls = 0;
            st.success_count = 0;
            tracing::info!(
                service = %self.name,
                failure_count = st.failure_count,
                "circuit breaker half-open, attempting reset"
            );
        }

        if st.state == CircuitState::HalfOpen {
            if st.half_open_calls >= self.cfg.half_open_max_calls {
                tracing::warn!(
                    service = %self.name,
                    half_open_calls = st.half_open_calls,
                    "circuit breaker rejected call: too many half-open calls"
                );
                return Err(Error::CircuitOpen {
                    service: self.name.clone(),
                    reason: CircuitRejection::HalfOpenSaturated,
                    retry_after: Duration::ZERO,
                });
            }
            st.half_open_calls += 1;
        }
        Ok(())
    }

    /// State lock for outcome recording, which cannot fail the caller. A
    /// poisoned lock is logged and the outcome dropped; admission keeps
    /// surfacing it as a runtime error.
    fn lock_for_record(&self, outcome: &str) -> Option<MutexGuard<'_, State>> {
        match self.state.lock() {
            Ok(st) => Some(st),
            Err(_) => {
                tracing::error!(service = %self.name, outcome, "circuit breaker lock poisoned, outcome not recorded");
                None
            }
        }
    }

    pub fn on_success(&self) {
        if let Some(mut st) = self.lock_for_record("success") {
            match st.state {
                CircuitState::HalfOpen => {
                    st.success_count += 1;
                    if st.success_count >= self.cfg.success_threshold {
                        st.state = CircuitState::Closed;
                        st.failure_count = 0;
                        st.success_count = 0;
                        st.half_open_calls = 0;
                        tracing::info!(service = %self.name, "circuit breaker closed, service recovered");
                    } else {
                        tracing::debug!(
                            service = %self.name,
                            success_count = st.success_count,
                            success_threshold = self.cfg.success_threshold,
                            "half-open trial succeeded"
                        );
                    }
                }
                CircuitState::Closed => {
                    st.failure_count = 0;
                    tracing::debug!(service = %self.name, "call succeeded");
                }
                // late completion of a call admitted before the breaker opened
                CircuitState::Open => {}
            }
        }
    }

    pub fn on_failure(&self) {
        self.record_failure("failure reported");
    }

    fn record_failure(&self, cause: &str) {
        if let Some(mut st) = self.lock_for_record("failure") {
            st.failure_count = st.failure_count.saturating_add(1);
            st.last_failure = Some(Instant::now());

            tracing::warn!(
                service = %self.name,
                failure_count = st.failure_count,
                failure_threshold = self.cfg.failure_threshold,
                state = %st.state,
                cause,
                "circuit breaker recorded failure"
            );

            match st.state {
                CircuitState::HalfOpen => {
                    st.state = CircuitState::Open;
                    tracing::error!(service = %self.name, "circuit breaker re-opened during half-open trial");
                }
                CircuitState::Closed if st.failure_count >= self.cfg.failure_threshold => {
                    st.state = CircuitState::Open;
                    tracing::error!(
                        service = %self.name,
                        failure_count = st.failure_count,
                        "circuit breaker open, too many failures"
                    );
                }
                _ => {}
            }
        }
    }

    /// Run `op` under the breaker.
    ///
    /// Rejections surface as [`Error::CircuitOpen`] converted into `E`; the
    /// operation's own error is recorded and returned unchanged. Dropping the
    /// returned future after admission counts as a failure.
    pub async fn call<F, Fut, T, E>(&self, op: F) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error> + Display,
    {
        self.allow().map_err(E::from)?;

        let mut pending = PendingCall {
            breaker: self,
            settled: false,
        };
        let result = op().await;
        pending.settled = true;

        match &result {
            Ok(_) => self.on_success(),
            Err(e) => self.record_failure(&e.to_string()),
        }
        result
    }

    /// [`call`](Self::call) with a deadline; expiry is recorded as a failure
    /// and surfaces as [`Error::Timeout`].
    pub async fn call_with_timeout<F, Fut, T, E>(
        &self,
        timeout: Duration,
        op: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error> + Display,
    {
        let service = self.name.clone();
        self.call(move || async move {
            match tokio::time::timeout(timeout, op()).await {
                Ok(result) => result,
                Err(_) => Err(E::from(Error::Timeout {
                    service,
                    after: timeout,
                })),
            }
        })
        .await
    }

    pub fn seconds_until_retry(&self) -> f64 {
        match self.state.lock() {
            Ok(st) => st.until_retry(&self.cfg, Instant::now()).as_secs_f64(),
            Err(_) => {
                tracing::error!(service = %self.name, "circuit breaker lock poisoned, reporting no retry delay");
                0.0
            }
        }
    }

    pub fn snapshot(&self) -> Result<CircuitBreakerSnapshot> {
        let st = self
            .state
            .lock()
            .map_err(|_| Error::poisoned("circuit_breaker"))?;
        Ok(CircuitBreakerSnapshot {
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            half_open_calls: st.half_open_calls,
            failure_threshold: self.cfg.failure_threshold,
            seconds_until_retry: st.until_retry(&self.cfg, Instant::now()).as_secs_f64(),
        })
    }
}

struct PendingCall<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.record_failure("call cancelled");
        }
    }
}
