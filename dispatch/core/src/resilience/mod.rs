//! Failure isolation and retry
//!
//! - [`circuit_breaker`]: per-backend state machine that stops calls to a failing backend
//! - [`retry`]: capped exponential backoff around any async operation

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    BreakerConfig, BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitError, CircuitState,
    Transition,
};
pub use retry::{with_retry, Retry, RetryNotice, RetryPolicy};
