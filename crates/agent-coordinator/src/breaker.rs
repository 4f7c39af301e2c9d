//! Per-agent circuit breaker
//!
//! Classic three-state breaker: consecutive failures open it for a
//! cooldown, the first request after the cooldown runs as a half-open
//! probe, and a probe success closes it again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Requests flow normally
    Closed,
    /// Requests are refused until the cooldown elapses
    Open,
    /// One probe request is allowed through
    HalfOpen,
}

/// Breaker tuning
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before probing
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Counters and state exposed for observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    /// Current state
    pub state: BreakerState,
    /// Current consecutive failure streak
    pub consecutive_failures: u32,
    /// Lifetime successes
    pub total_successes: u64,
    /// Lifetime failures
    pub total_failures: u64,
    /// When the state last changed
    pub last_transition: DateTime<Utc>,
}

struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    total_successes: u64,
    total_failures: u64,
    opened_at: Option<Instant>,
    last_transition: DateTime<Utc>,
}

impl BreakerInner {
    fn transition(&mut self, state: BreakerState) {
        self.state = state;
        self.last_transition = Utc::now();
    }
}

/// Three-state circuit breaker guarding one agent
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                total_successes: 0,
                total_failures: 0,
                opened_at: None,
                last_transition: Utc::now(),
            }),
        }
    }

    /// Whether a request may pass right now
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and
    /// lets the request through as a probe.
    pub fn allow_request(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        Self::settle(&mut inner, &self.config);
        !matches!(inner.state, BreakerState::Open)
    }

    /// Record a successful execution; closes the breaker
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_successes += 1;
        inner.consecutive_failures = 0;
        if inner.state != BreakerState::Closed {
            debug!("Breaker closing after success");
            inner.opened_at = None;
            inner.transition(BreakerState::Closed);
        }
    }

    /// Record a failed execution
    ///
    /// A half-open probe failure re-opens immediately; in the closed
    /// state the breaker opens once the failure streak reaches the
    /// threshold.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.total_failures += 1;
        inner.consecutive_failures += 1;

        match inner.state {
            BreakerState::HalfOpen => {
                warn!("Half-open probe failed, breaker re-opening");
                inner.opened_at = Some(Instant::now());
                inner.transition(BreakerState::Open);
            }
            BreakerState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                warn!(
                    "Breaker opening after {} consecutive failures",
                    inner.consecutive_failures
                );
                inner.opened_at = Some(Instant::now());
                inner.transition(BreakerState::Open);
            }
            _ => {}
        }
    }

    /// Current state, after applying any elapsed cooldown
    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().unwrap();
        Self::settle(&mut inner, &self.config);
        inner.state
    }

    /// Snapshot of counters and state
    pub fn stats(&self) -> BreakerStats {
        let mut inner = self.inner.lock().unwrap();
        Self::settle(&mut inner, &self.config);
        BreakerStats {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            last_transition: inner.last_transition,
        }
    }

    /// Move an open breaker to half-open when its cooldown has elapsed
    fn settle(inner: &mut BreakerInner, config: &CircuitBreakerConfig) {
        if inner.state == BreakerState::Open {
            let expired = inner
                .opened_at
                .map(|at| at.elapsed() >= config.cooldown)
                .unwrap_or(true);
            if expired {
                debug!("Breaker cooldown elapsed, probing half-open");
                inner.transition(BreakerState::HalfOpen);
            }
        }
    }
}
