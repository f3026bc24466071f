//! Circuit breaker
//!
//! Closed → Open after `failure_threshold` consecutive failures; Open
//! rejects until `reset_timeout` elapses, then a single Half-Open trial
//! decides the next state. An inflight cap applies in every state.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Breaker tuning.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// How long Open rejects before allowing a trial
    pub reset_timeout: Duration,
    /// Concurrent inflight cap, independent of state
    pub max_concurrent: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            max_concurrent: 4,
        }
    }
}

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Why a call was rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CircuitError {
    /// The breaker is Open (or the Half-Open trial slot is taken)
    #[error("circuit open")]
    Open,
    /// The inflight cap was reached
    #[error("too many concurrent calls")]
    Saturated,
}

struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    inflight: usize,
    trial_inflight: bool,
}

/// Guards a downstream dependency.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker in the Closed state.
    #[must_use]
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                inflight: 0,
                trial_inflight: false,
            }),
        }
    }

    /// Reserve a slot for one call. Every `Ok` must be paired with
    /// `record_success` or `record_failure`.
    pub async fn acquire(&self) -> Result<(), CircuitError> {
        let mut inner = self.inner.lock().await;

        if inner.inflight >= self.config.max_concurrent {
            return Err(CircuitError::Saturated);
        }

        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < self.config.reset_timeout {
                    return Err(CircuitError::Open);
                }
                debug!("circuit transitioning Open -> HalfOpen");
                inner.state = CircuitState::HalfOpen;
                inner.trial_inflight = false;
            }
            CircuitState::HalfOpen => {}
        }

        if inner.state == CircuitState::HalfOpen {
            if inner.trial_inflight {
                // One trial at a time decides the outcome.
                return Err(CircuitError::Open);
            }
            inner.trial_inflight = true;
        }

        inner.inflight += 1;
        Ok(())
    }

    /// Report a successful call.
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;
        inner.inflight = inner.inflight.saturating_sub(1);
        inner.consecutive_failures = 0;
        if inner.state != CircuitState::Closed {
            debug!("circuit closing after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.trial_inflight = false;
    }

    /// Report a failed call.
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;
        inner.inflight = inner.inflight.saturating_sub(1);
        inner.consecutive_failures += 1;

        let should_open = inner.state == CircuitState::HalfOpen
            || inner.consecutive_failures >= self.config.failure_threshold;
        if should_open && inner.state != CircuitState::Open {
            warn!(
                failures = inner.consecutive_failures,
                "circuit opening"
            );
        }
        if should_open {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(Instant::now());
            inner.trial_inflight = false;
        }
    }

    /// Current state (Open may report HalfOpen-eligible as Open until
    /// the next acquire).
    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Calls currently holding a slot.
    pub async fn inflight(&self) -> usize {
        self.inner.lock().await.inflight
    }
}
