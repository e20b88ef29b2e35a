//! Circuit breaker implementation
//!
//! Stops calling a failing dependency until it likely has recovered.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Requests flow normally; consecutive failures are counted.
    Closed,
    /// Requests are rejected until the open timeout elapses.
    Open,
    /// A limited quota of trial requests is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name of this circuit breaker (for logging)
    pub name: String,
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long an open circuit rejects before allowing trials
    pub open_timeout: Duration,
    /// Trial requests allowed while half-open
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_threshold: 5,
            open_timeout: Duration::from_secs(30),
            half_open_max_calls: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_half_open_max_calls(mut self, calls: u32) -> Self {
        self.half_open_max_calls = calls.max(1);
        self
    }
}

struct CircuitBreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    half_open_issued: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

/// Task-safe circuit breaker, one per outbound dependency.
///
/// Closed counts consecutive failures; `failure_threshold` of them opens the
/// circuit. Open rejects until `open_timeout` elapses, then half-open admits
/// `half_open_max_calls` trials: any failure reopens, a full quota of
/// successes closes.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: Arc<CircuitBreakerConfig>,
    inner: Arc<Mutex<CircuitBreakerInner>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(CircuitBreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                half_open_issued: 0,
                half_open_successes: 0,
                opened_at: None,
            })),
        }
    }

    pub fn default_config(name: &str) -> Self {
        Self::new(CircuitBreakerConfig::new(name))
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Whether a request may go out right now. An open circuit whose timeout
    /// has elapsed transitions to half-open here; a half-open circuit hands
    /// out at most `half_open_max_calls` permits.
    pub fn can_attempt(&self) -> bool {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed() >= self.config.open_timeout)
                    .unwrap_or(true);
                if elapsed {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.half_open_issued = 1;
                    true
                } else {
                    debug!(
                        circuit_breaker = %self.config.name,
                        "Request rejected, circuit is open"
                    );
                    false
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_issued < self.config.half_open_max_calls {
                    inner.half_open_issued += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    self.transition(&mut inner, CircuitState::Closed);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        circuit_breaker = %self.config.name,
                        failures = inner.consecutive_failures,
                        "Failure threshold reached"
                    );
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // Any trial failure sends the circuit straight back to open.
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    fn transition(&self, inner: &mut CircuitBreakerInner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        info!(
            circuit_breaker = %self.config.name,
            from = %inner.state,
            to = %to,
            "Circuit breaker state transition"
        );
        inner.state = to;
        match to {
            CircuitState::Open => {
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::HalfOpen => {
                inner.half_open_issued = 0;
                inner.half_open_successes = 0;
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.half_open_issued = 0;
                inner.half_open_successes = 0;
                inner.opened_at = None;
            }
        }
    }
}
