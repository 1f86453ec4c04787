//! Per-backend circuit breaker
//!
//! ```text
//! +--------+   N consecutive failures   +------+   reset_timeout elapsed   +-----------+
//! | Closed | -------------------------> | Open | ------------------------> | Half-Open |
//! +--------+                            +------+    (on the next call)     +-----------+
//!     ^                                     ^                                    |
//!     |                                     |          any failure               |
//!     |                                     +------------------------------------+
//!     |              quota of trial calls all succeed                            |
//!     +--------------------------------------------------------------------------+
//! ```
//!
//! - **Closed**: calls pass through; a success resets the failure counter
//! - **Open**: calls are rejected without invoking the operation
//! - **Half-Open**: up to `half_open_max_calls` trial calls are admitted
//!
//! Admission hands out a [`BreakerPermit`]. Dropping a permit without reporting
//! an outcome releases its trial slot, so a cancelled call cannot wedge the
//! breaker in half-open. Outcomes reported against a permit issued before the
//! latest transition are ignored.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::events::{DispatchEvent, EventBus};

// ============================================================================
// Circuit State
// ============================================================================

/// Circuit breaker state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation
    #[default]
    Closed,
    /// Tripped, rejecting calls
    Open,
    /// Admitting a limited number of trial calls
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Circuit breaker thresholds
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting trial calls
    pub reset_timeout: Duration,
    /// Trial calls admitted while half-open; all must succeed to close
    pub half_open_max_calls: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 3,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Outcome of a guarded call that did not succeed
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// Circuit is open; the operation was not invoked
    #[error("circuit open for backend {backend}")]
    Open {
        /// Backend whose circuit rejected the call
        backend: String,
    },

    /// Operation ran and failed
    #[error("{0}")]
    Inner(E),
}

// ============================================================================
// Circuit Breaker
// ============================================================================

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every transition; stale permits compare against it
    generation: u64,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
    rejected: u64,
    times_opened: u64,
}

/// A state change reported by the breaker
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    /// State before
    pub from: CircuitState,
    /// State after
    pub to: CircuitState,
}

/// Circuit breaker for one backend
#[derive(Debug)]
pub struct CircuitBreaker {
    backend: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    events: Option<EventBus>,
}

impl CircuitBreaker {
    /// Create a breaker with default thresholds
    pub fn new(backend: impl Into<String>) -> Self {
        Self::with_config(backend, BreakerConfig::default())
    }

    /// Create a breaker with custom thresholds
    pub fn with_config(backend: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            backend: backend.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                consecutive_failures: 0,
                last_failure: None,
                half_open_in_flight: 0,
                half_open_successes: 0,
                rejected: 0,
                times_opened: 0,
            }),
            events: None,
        }
    }

    /// Publish state transitions to an event bus
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Backend this breaker protects
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// Thresholds in use
    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Current state, without triggering the open to half-open check
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Run `operation` if the circuit admits it, recording the outcome
    pub async fn guard<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().ok_or_else(|| CircuitError::Open {
            backend: self.backend.clone(),
        })?;

        match operation().await {
            Ok(value) => {
                permit.success();
                Ok(value)
            }
            Err(e) => {
                permit.failure();
                Err(CircuitError::Inner(e))
            }
        }
    }

    /// Ask for admission. `None` means the call must not be made.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let (permit, transition) = {
            let mut inner = self.inner.lock();
            let mut transition = None;

            if inner.state == CircuitState::Open {
                let cooled = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.config.reset_timeout);
                if cooled {
                    transition = Some(Self::transition(&mut inner, CircuitState::HalfOpen));
                }
            }

            let permit = match inner.state {
                CircuitState::Closed => Some(BreakerPermit::new(self, inner.generation, false)),
                CircuitState::Open => None,
                CircuitState::HalfOpen => {
                    let admitted = inner.half_open_in_flight + inner.half_open_successes;
                    if admitted < self.config.half_open_max_calls {
                        inner.half_open_in_flight += 1;
                        Some(BreakerPermit::new(self, inner.generation, true))
                    } else {
                        None
                    }
                }
            };

            if permit.is_none() {
                inner.rejected = inner.rejected.saturating_add(1);
            }
            (permit, transition)
        };

        if let Some(t) = transition {
            self.announce(t);
        }
        if permit.is_none() {
            tracing::debug!(backend = %self.backend, "Circuit breaker rejected call");
        }
        permit
    }

    /// Record a success outside of a permit (e.g. an out-of-band health probe)
    pub fn record_success(&self) -> Option<Transition> {
        let generation = self.inner.lock().generation;
        self.settle(generation, false, true)
    }

    /// Record a failure outside of a permit
    pub fn record_failure(&self) -> Option<Transition> {
        let generation = self.inner.lock().generation;
        self.settle(generation, false, false)
    }

    fn settle(&self, generation: u64, trial: bool, success: bool) -> Option<Transition> {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != generation {
                return None;
            }

            if trial {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
            }

            match (inner.state, success) {
                (CircuitState::Closed, true) => {
                    inner.consecutive_failures = 0;
                    None
                }
                (CircuitState::Closed, false) => {
                    inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
                    inner.last_failure = Some(Instant::now());
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        Some(Self::transition(&mut inner, CircuitState::Open))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, true) => {
                    inner.half_open_successes += 1;
                    if inner.half_open_successes >= self.config.half_open_max_calls {
                        inner.consecutive_failures = 0;
                        Some(Self::transition(&mut inner, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                (CircuitState::HalfOpen, false) => {
                    inner.last_failure = Some(Instant::now());
                    Some(Self::transition(&mut inner, CircuitState::Open))
                }
                (CircuitState::Open, _) => None,
            }
        };

        if let Some(t) = transition {
            self.announce(t);
        }
        transition
    }

    fn release_trial(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn transition(inner: &mut BreakerInner, to: CircuitState) -> Transition {
        let from = inner.state;
        inner.state = to;
        inner.generation += 1;
        inner.half_open_in_flight = 0;
        inner.half_open_successes = 0;
        if to == CircuitState::Open {
            inner.times_opened += 1;
        }
        Transition { from, to }
    }

    fn announce(&self, transition: Transition) {
        match transition.to {
            CircuitState::Open => tracing::warn!(
                backend = %self.backend,
                from = %transition.from,
                "Circuit breaker opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                backend = %self.backend,
                "Circuit breaker transitioning to half-open"
            ),
            CircuitState::Closed => tracing::info!(backend = %self.backend, "Circuit breaker closed"),
        }

        if let Some(events) = &self.events {
            events.emit(DispatchEvent::CircuitTransition {
                backend: self.backend.clone(),
                from: transition.from,
                to: transition.to,
            });
        }
    }

    /// Force the circuit into a state (operator override)
    pub fn force_state(&self, state: CircuitState) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state == state {
                return;
            }
            if state == CircuitState::Open {
                inner.last_failure = Some(Instant::now());
            }
            if state == CircuitState::Closed {
                inner.consecutive_failures = 0;
            }
            Self::transition(&mut inner, state)
        };
        self.announce(transition);
    }

    /// Reset to a fresh closed breaker
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.generation += 1;
        inner.consecutive_failures = 0;
        inner.last_failure = None;
        inner.half_open_in_flight = 0;
        inner.half_open_successes = 0;
    }

    /// Point-in-time view for status reporting
    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.lock();
        BreakerSnapshot {
            backend: self.backend.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            since_last_failure: inner.last_failure.map(|at| at.elapsed()),
            rejected: inner.rejected,
            times_opened: inner.times_opened,
        }
    }
}

// ============================================================================
// Permit
// ============================================================================

/// Admission ticket for one call through a [`CircuitBreaker`]
#[derive(Debug)]
#[must_use = "report the outcome with success() or failure()"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, generation: u64, trial: bool) -> Self {
        Self {
            breaker,
            generation,
            trial,
            settled: false,
        }
    }

    /// Whether this is a half-open trial call
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// Report success
    pub fn success(mut self) -> Option<Transition> {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, true)
    }

    /// Report failure
    pub fn failure(mut self) -> Option<Transition> {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, false)
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.settled && self.trial {
            self.breaker.release_trial(self.generation);
        }
    }
}

// ============================================================================
// Snapshot
// ============================================================================

/// Serializable view of a breaker
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    /// Backend name
    pub backend: String,
    /// Current state
    pub state: CircuitState,
    /// Consecutive failures while closed
    pub consecutive_failures: u32,
    /// Trial successes so far while half-open
    pub half_open_successes: u32,
    /// Time since the last recorded failure
    pub since_last_failure: Option<Duration>,
    /// Calls rejected without being made
    pub rejected: u64,
    /// Times the circuit has opened
    pub times_opened: u64,
}
