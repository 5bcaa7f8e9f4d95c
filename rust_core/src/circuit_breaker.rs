//! Circuit breaker for external market feeds.
//!
//! After `failure_threshold` consecutive failures the breaker opens and
//! calls are refused without touching the network. Once `recovery_timeout`
//! has passed a probe is let through (half-open); `success_threshold`
//! consecutive successes close it again, any failure re-opens it.

use parking_lot::Mutex;
use std::env;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiCircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct ApiCircuitBreakerConfig {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for ApiCircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

impl ApiCircuitBreakerConfig {
    /// Read `<PREFIX>_CB_FAILURE_THRESHOLD`, `<PREFIX>_CB_RECOVERY_SECS` and
    /// `<PREFIX>_CB_SUCCESS_THRESHOLD`, falling back to `defaults`
    pub fn from_env(prefix: &str, defaults: Self) -> Self {
        let read = |suffix: &str| env::var(format!("{}_CB_{}", prefix, suffix)).ok();
        Self {
            failure_threshold: read("FAILURE_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.failure_threshold),
            recovery_timeout: read("RECOVERY_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.recovery_timeout),
            success_threshold: read("SUCCESS_THRESHOLD")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.success_threshold),
        }
    }
}

struct BreakerState {
    state: ApiCircuitState,
    consecutive_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

pub struct ApiCircuitBreaker {
    name: String,
    config: ApiCircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl ApiCircuitBreaker {
    pub fn new(name: &str, config: ApiCircuitBreakerConfig) -> Self {
        Self {
            name: name.to_string(),
            config,
            inner: Mutex::new(BreakerState {
                state: ApiCircuitState::Closed,
                consecutive_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may go out now. Moves Open to HalfOpen once the
    /// recovery timeout has passed.
    pub fn is_available(&self) -> bool {
        let mut inner = self.inner.lock();
        let state = inner.state;
        match state {
            ApiCircuitState::Closed | ApiCircuitState::HalfOpen => true,
            ApiCircuitState::Open => {
                let recovered = inner
                    .opened_at
                    .map(|at| at.elapsed() >= self.config.recovery_timeout)
                    .unwrap_or(true);
                if recovered {
                    inner.state = ApiCircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    info!(feed = %self.name, "Circuit breaker half-open, probing");
                }
                recovered
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = 0;
        if inner.state == ApiCircuitState::HalfOpen {
            inner.half_open_successes += 1;
            if inner.half_open_successes < self.config.success_threshold {
                return;
            }
            info!(
                feed = %self.name,
                successes = inner.half_open_successes,
                "Circuit breaker closed"
            );
        }
        inner.state = ApiCircuitState::Closed;
        inner.opened_at = None;
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures += 1;
        let failures = inner.consecutive_failures;
        let state = inner.state;
        match state {
            ApiCircuitState::Closed if failures >= self.config.failure_threshold => {
                inner.state = ApiCircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(feed = %self.name, failures, "Circuit breaker opened");
            }
            ApiCircuitState::HalfOpen => {
                inner.state = ApiCircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(feed = %self.name, "Circuit breaker re-opened by failed probe");
            }
            _ => {}
        }
    }

    pub fn state(&self) -> ApiCircuitState {
        self.inner.lock().state
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// Time left before an open breaker lets a probe through
    pub fn retry_after(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (ApiCircuitState::Open, Some(at)) => {
                Some(self.config.recovery_timeout.saturating_sub(at.elapsed()))
            }
            _ => None,
        }
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = ApiCircuitState::Closed;
        inner.consecutive_failures = 0;
        inner.half_open_successes = 0;
        inner.opened_at = None;
    }
}
