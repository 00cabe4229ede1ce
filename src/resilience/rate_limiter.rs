use crate::error::RateLimitReason;
use crate::{Error, ErrorContext, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Hard ceiling of admitted requests in any trailing 60s.
    pub requests_per_minute: u32,
    /// Hard ceiling of admitted requests in any trailing 3600s.
    pub requests_per_hour: u32,
    /// Token bucket capacity.
    pub burst_allowance: u32,
    /// Back-off hint returned when the bucket is empty.
    pub cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
            burst_allowance: 10,
            cooldown: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    pub fn with_requests_per_hour(mut self, rph: u32) -> Self {
        self.requests_per_hour = rph;
        self
    }

    pub fn with_burst_allowance(mut self, burst: u32) -> Self {
        self.burst_allowance = burst;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("requests_per_minute", self.requests_per_minute),
            ("requests_per_hour", self.requests_per_hour),
            ("burst_allowance", self.burst_allowance),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(Error::configuration_with_context(
                    format!("{} must be greater than zero", field),
                    ErrorContext::new()
                        .with_field_path(field)
                        .with_source("rate_limiter"),
                ));
            }
        }
        Ok(())
    }
}

/// Outcome of a single admission check.
///
/// Only the fields relevant to the outcome are populated: a minute-window
/// rejection reports `remaining_minute`, an hour-window rejection reports
/// `remaining_hour`, a bucket rejection reports `tokens_available`.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub reason: Option<RateLimitReason>,
    pub retry_after: Option<Duration>,
    pub remaining_minute: Option<u32>,
    pub remaining_hour: Option<u32>,
    pub tokens_available: Option<f64>,
}

impl RateLimitDecision {
    fn rejected(reason: RateLimitReason, retry_after: Duration) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
            retry_after: Some(retry_after),
            remaining_minute: None,
            remaining_hour: None,
            tokens_available: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterSnapshot {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
    pub burst_allowance: u32,
    pub tokens_available: f64,
    pub minute_requests_used: usize,
    pub hour_requests_used: usize,
}

#[derive(Debug)]
struct State {
    tokens: f64,
    last_refill: Instant,
    minute_log: VecDeque<Instant>,
    hour_log: VecDeque<Instant>,
}

impl State {
    fn prune(&mut self, now: Instant) {
        while let Some(&t) = self.minute_log.front() {
            if now.duration_since(t) < MINUTE {
                break;
            }
            self.minute_log.pop_front();
        }
        while let Some(&t) = self.hour_log.front() {
            if now.duration_since(t) < HOUR {
                break;
            }
            self.hour_log.pop_front();
        }
    }
}

/// Dual sliding-window limiter with a token bucket for burst smoothing.
///
/// - Minute and hour windows are hard ceilings
/// - The bucket refills in whole tokens at `requests_per_minute / 60` per second
/// - State is guarded by a mutex held only for the check-and-update sequence
pub struct RateLimiter {
    name: String,
    cfg: RateLimitConfig,
    state: Mutex<State>,
}

impl RateLimiter {
    pub fn new(name: impl Into<String>, cfg: RateLimitConfig) -> Self {
        let state = Mutex::new(State {
            tokens: cfg.burst_allowance as f64,
            last_refill: Instant::now(),
            minute_log: VecDeque::new(),
            hour_log: VecDeque::new(),
        });
        Self {
            name: name.into(),
            cfg,
            state,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.cfg
    }

    fn refill_locked(cfg: &RateLimitConfig, st: &mut State, now: Instant) {
        let elapsed = now.duration_since(st.last_refill).as_secs_f64();
        let to_add = (elapsed * cfg.requests_per_minute as f64 / 60.0).floor();
        st.tokens = (st.tokens + to_add).min(cfg.burst_allowance as f64);
        st.last_refill = now;
    }

    /// Check whether a request of `cost` tokens may proceed, consuming budget if so.
    pub fn check(&self, cost: u32) -> Result<RateLimitDecision> {
        let cfg = &self.cfg;
        let mut st = self
            .state
            .lock()
            .map_err(|_| Error::poisoned("rate_limiter"))?;
        let now = Instant::now();
        st.prune(now);

        if st.minute_log.len() >= cfg.requests_per_minute as usize {
            let retry_after = st
                .minute_log
                .front()
                .map(|&oldest| MINUTE.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(MINUTE);
            let mut decision =
                RateLimitDecision::rejected(RateLimitReason::MinuteLimitExceeded, retry_after);
            decision.remaining_minute = Some(0);
            return Ok(self.log_rejection(decision));
        }

        if st.hour_log.len() >= cfg.requests_per_hour as usize {
            let retry_after = st
                .hour_log
                .front()
                .map(|&oldest| HOUR.saturating_sub(now.duration_since(oldest)))
                .unwrap_or(HOUR);
            let mut decision =
                RateLimitDecision::rejected(RateLimitReason::HourLimitExceeded, retry_after);
            decision.remaining_hour = Some(0);
            return Ok(self.log_rejection(decision));
        }

        Self::refill_locked(cfg, &mut st, now);

        if st.tokens < cost as f64 {
            let mut decision =
                RateLimitDecision::rejected(RateLimitReason::BurstLimitExceeded, cfg.cooldown);
            decision.tokens_available = Some(st.tokens);
            return Ok(self.log_rejection(decision));
        }

        st.tokens -= cost as f64;
        st.minute_log.push_back(now);
        st.hour_log.push_back(now);

        let remaining_minute = cfg
            .requests_per_minute
            .saturating_sub(st.minute_log.len() as u32);
        let remaining_hour = cfg.requests_per_hour.saturating_sub(st.hour_log.len() as u32);
        tracing::debug!(
            service = %self.name,
            cost,
            remaining_minute,
            remaining_hour,
            tokens = st.tokens,
            "rate limiter admitted request"
        );

        Ok(RateLimitDecision {
            allowed: true,
            reason: None,
            retry_after: None,
            remaining_minute: Some(remaining_minute),
            remaining_hour: Some(remaining_hour),
            tokens_available: Some(st.tokens),
        })
    }

    /// Like [`check`](Self::check) but turns a rejection into [`Error::RateLimited`].
    pub fn try_acquire(&self, cost: u32) -> Result<RateLimitDecision> {
        let decision = self.check(cost)?;
        match decision.reason {
            Some(reason) if !decision.allowed => Err(Error::RateLimited {
                service: self.name.clone(),
                reason,
                retry_after: decision.retry_after.unwrap_or(self.cfg.cooldown),
            }),
            _ => Ok(decision),
        }
    }

    fn log_rejection(&self, decision: RateLimitDecision) -> RateLimitDecision {
        tracing::warn!(
            service = %self.name,
            reason = ?decision.reason,
            retry_after_secs = decision.retry_after.map(|d| d.as_secs_f64()),
            "rate limit exceeded"
        );
        decision
    }

    pub fn snapshot(&self) -> Result<RateLimiterSnapshot> {
        let mut st = self
            .state
            .lock()
            .map_err(|_| Error::poisoned("rate_limiter"))?;
        st.prune(Instant::now());
        Ok(RateLimiterSnapshot {
            requests_per_minute: self.cfg.requests_per_minute,
            requests_per_hour: self.cfg.requests_per_hour,
            burst_allowance: self.cfg.burst_allowance,
            tokens_available: st.tokens,
            minute_requests_used: st.minute_log.len(),
            hour_requests_used: st.hour_log.len(),
        })
    }
}
