//! Circuit breaker for LLM API calls
//!
//! Protects against cascading failures by tracking consecutive errors and
//! temporarily rejecting requests when the failure threshold is reached.
//!
//! Transitions:
//! - Closed → Open: after N consecutive failures
//! - Open → HalfOpen: after the cooldown period (probed via `can_attempt`)
//! - HalfOpen → Closed: after enough successful calls
//! - HalfOpen → Open: on any failure

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, tracking failures
    Closed,

    /// Too many failures, rejecting requests
    Open,

    /// Cooldown expired, testing recovery
    HalfOpen,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,

    /// Time to wait before entering half-open state
    pub cooldown: Duration,

    /// Successful calls needed to close from half-open
    pub half_open_attempts: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(60),
            half_open_attempts: 1,
        }
    }
}

/// Point-in-time breaker status for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,

    /// Seconds remaining before an open circuit admits a probe
    pub cooldown_remaining_secs: f64,
}

/// Circuit breaker guarding one agent's LLM calls.
///
/// Transitions are sequentially consistent: callers hold the breaker behind
/// a mutex, so `can_attempt`/`record_*` never interleave mid-transition.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        info!(
            "[CircuitBreaker] Initialized: threshold={}, cooldown={:?}",
            config.failure_threshold, config.cooldown
        );
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
        }
    }

    /// Check whether a request may proceed.
    ///
    /// In `Open`, returns true iff the cooldown has elapsed, transitioning to
    /// `HalfOpen` as a side effect (resetting the success counter).
    pub fn can_attempt(&mut self) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                if let Some(last_failure) = self.last_failure_time {
                    if last_failure.elapsed() >= self.config.cooldown {
                        info!("[CircuitBreaker] Cooldown expired, entering half-open");
                        self.state = CircuitState::HalfOpen;
                        self.success_count = 0;
                        return true;
                    }
                }
                false
            }
        }
    }

    /// Record a successful API call.
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => {
                if self.failure_count > 0 {
                    info!(
                        "[CircuitBreaker] Success after {} failures, resetting counter",
                        self.failure_count
                    );
                }
                self.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                self.success_count += 1;
                info!(
                    "[CircuitBreaker] Half-open success {}/{}",
                    self.success_count, self.config.half_open_attempts
                );
                if self.success_count >= self.config.half_open_attempts {
                    info!("[CircuitBreaker] Closing circuit after successful recovery");
                    self.state = CircuitState::Closed;
                    self.failure_count = 0;
                    self.success_count = 0;
                }
            }
            // Success reports while open are ignored
            CircuitState::Open => {}
        }
    }

    /// Record a failed API call.
    pub fn record_failure(&mut self) {
        self.last_failure_time = Some(Instant::now());

        match self.state {
            CircuitState::Closed => {
                self.failure_count += 1;
                warn!(
                    "[CircuitBreaker] Failure {}/{}",
                    self.failure_count, self.config.failure_threshold
                );
                if self.failure_count >= self.config.failure_threshold {
                    warn!(
                        "[CircuitBreaker] Opening circuit after {} consecutive failures",
                        self.failure_count
                    );
                    self.state = CircuitState::Open;
                }
            }
            CircuitState::HalfOpen => {
                warn!("[CircuitBreaker] Failure in half-open, reopening circuit");
                self.state = CircuitState::Open;
                // Pin the counter so the circuit stays open
                self.failure_count = self.config.failure_threshold;
                self.success_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    /// Current breaker state.
    pub fn state(&self) -> CircuitState {
        self.state
    }

    /// Remaining cooldown before an open circuit admits a probe.
    pub fn cooldown_remaining(&self) -> Duration {
        match (self.state, self.last_failure_time) {
            (CircuitState::Open, Some(last)) => {
                self.config.cooldown.saturating_sub(last.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    /// Point-in-time status for reporting.
    pub fn status(&self) -> CircuitBreakerStatus {
        CircuitBreakerStatus {
            state: self.state,
            failure_count: self.failure_count,
            success_count: self.success_count,
            cooldown_remaining_secs: self.cooldown_remaining().as_secs_f64(),
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
