//! Error taxonomy for the dispatch layer
//!
//! Backend adapters classify their own failures with [`FailureKind`]; the
//! router and queue lift those into [`DispatchError`], whose [`ErrorKind`]
//! tells callers whether nothing was tried (queue-level), something was
//! rejected up front (backend unavailable), or everything was tried and failed.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::TaskId;

// ============================================================================
// Backend Errors
// ============================================================================

/// How a backend adapter classifies a failed call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network blips, timeouts, rate limits, 5xx responses. Worth retrying.
    Transient,

    /// The backend cannot serve this request (unknown model, tier policy).
    /// Not retried, but the router falls through to the next backend.
    Unsupported,

    /// Malformed payload or rejected credentials. Aborts the whole dispatch.
    NonRecoverable,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Unsupported => write!(f, "unsupported"),
            Self::NonRecoverable => write!(f, "non-recoverable"),
        }
    }
}

/// A classified failure returned by a [`Backend`](crate::backend::Backend)
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{kind} backend failure: {message}")]
pub struct BackendError {
    /// Classification supplied by the adapter
    pub kind: FailureKind,
    /// Human-readable detail
    pub message: String,
    /// HTTP status, when the adapter talks HTTP
    pub status: Option<u16>,
}

impl BackendError {
    /// Create an error of the given kind
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    /// Retryable failure
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    /// Failure that should move on to the next backend without retrying
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unsupported, message)
    }

    /// Failure that aborts the dispatch
    pub fn non_recoverable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NonRecoverable, message)
    }

    /// Attach the HTTP status that produced this error
    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the retry executor should try again
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Transient
    }
}

// ============================================================================
// Dispatch Errors
// ============================================================================

/// Coarse error category surfaced to callers of the dispatch layer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A retryable failure that escaped the retry executor
    Transient,
    /// Circuit open, call never made
    BackendUnavailable,
    /// Malformed request or bad credentials
    NonRecoverable,
    /// Every candidate backend failed
    Exhausted,
    /// Timed out or cancelled inside the queue
    Queue,
}

/// Errors produced by the dispatch layer
#[derive(Clone, Debug, Error)]
pub enum DispatchError {
    /// Circuit breaker for the backend is open
    #[error("backend {backend} unavailable: circuit open")]
    BackendUnavailable {
        /// Backend that rejected the call
        backend: String,
    },

    /// A backend call failed after retries
    #[error("backend {backend} failed: {source}")]
    Backend {
        /// Backend that failed
        backend: String,
        /// Adapter-classified failure
        #[source]
        source: BackendError,
    },

    /// A backend reported a failure that no other backend can fix
    #[error("non-recoverable failure from {backend}: {source}")]
    NonRecoverable {
        /// Backend that reported the failure
        backend: String,
        /// Adapter-classified failure
        #[source]
        source: BackendError,
    },

    /// Every backend in the fallback order was tried
    #[error("all {tried} backends failed; last error: {last}")]
    Exhausted {
        /// Number of backends visited
        tried: usize,
        /// Last failure observed
        #[source]
        last: Box<DispatchError>,
    },

    /// No backend is eligible for dispatch
    #[error("no backends available for task kind '{task_kind}'")]
    NoBackends {
        /// Requested task kind
        task_kind: String,
    },

    /// Queue timer expired before the task settled
    #[error("task {id} timed out after {timeout:?}")]
    Timeout {
        /// Task that timed out
        id: TaskId,
        /// Configured timeout
        timeout: Duration,
        /// Whether the operation had already started
        started: bool,
    },

    /// Task was cancelled while pending
    #[error("task {id} cancelled")]
    Cancelled {
        /// Task that was cancelled
        id: TaskId,
    },

    /// Queue is at its depth limit
    #[error("queue full ({depth} pending)")]
    QueueFull {
        /// Pending depth at rejection time
        depth: usize,
    },

    /// Queue was closed before the task ran
    #[error("queue closed")]
    QueueClosed,

    /// The operation panicked while executing
    #[error("task {id} panicked: {message}")]
    Panicked {
        /// Task whose operation panicked
        id: TaskId,
        /// Panic payload, when it was a string
        message: String,
    },
}

impl DispatchError {
    /// Categorize this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Self::Backend { source, .. } => match source.kind {
                FailureKind::NonRecoverable => ErrorKind::NonRecoverable,
                FailureKind::Transient | FailureKind::Unsupported => ErrorKind::Transient,
            },
            Self::NonRecoverable { .. } => ErrorKind::NonRecoverable,
            Self::Exhausted { .. } | Self::NoBackends { .. } => ErrorKind::Exhausted,
            Self::Timeout { .. }
            | Self::Cancelled { .. }
            | Self::QueueFull { .. }
            | Self::QueueClosed
            | Self::Panicked { .. } => ErrorKind::Queue,
        }
    }

    /// The underlying backend failure, if any
    #[must_use]
    pub fn backend_error(&self) -> Option<&BackendError> {
        match self {
            Self::Backend { source, .. } | Self::NonRecoverable { source, .. } => Some(source),
            Self::Exhausted { last, .. } => last.backend_error(),
            _ => None,
        }
    }

    /// Message suitable for showing to an end user
    #[must_use]
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Exhausted | ErrorKind::BackendUnavailable | ErrorKind::Transient => {
                "Service temporarily unavailable, try again.".to_string()
            }
            ErrorKind::NonRecoverable => match self.backend_error().and_then(|e| e.status) {
                Some(401 | 403) => {
                    "The model service rejected the request. Check your credentials.".to_string()
                }
                _ => "The request was rejected as invalid. Check the request and your credentials."
                    .to_string(),
            },
            ErrorKind::Queue => match self {
                Self::Cancelled { .. } => "The request was cancelled.".to_string(),
                Self::QueueFull { .. } => "Too many requests in flight, try again shortly.".to_string(),
                Self::Panicked { .. } => "The request failed unexpectedly.".to_string(),
                _ => "The request timed out before a response arrived, try again.".to_string(),
            },
        }
    }
}
