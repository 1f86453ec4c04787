//! Lifecycle events
//!
//! Every component publishes to a shared [`EventBus`]. Publishing never blocks
//! and never fails the caller: with no subscriber the event is dropped, and a
//! subscriber that falls behind loses the oldest events (see
//! [`tokio::sync::broadcast`]).

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use crate::queue::TaskId;
use crate::resilience::CircuitState;

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events emitted by the dispatch layer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DispatchEvent {
    /// Task accepted into the pending list
    Enqueued {
        /// Task id
        id: TaskId,
        /// Task priority
        priority: i32,
        /// Pending depth after insertion
        queued: usize,
    },

    /// Task moved into an execution slot
    Started {
        /// Task id
        id: TaskId,
        /// Time spent pending
        waited: Duration,
    },

    /// Task operation returned successfully
    Completed {
        /// Task id
        id: TaskId,
        /// Time spent executing
        elapsed: Duration,
    },

    /// Task operation returned an error
    Failed {
        /// Task id
        id: TaskId,
        /// Rendered error
        error: String,
    },

    /// Pending task removed by `cancel`
    Cancelled {
        /// Task id
        id: TaskId,
    },

    /// Task timer fired before settlement
    TimedOut {
        /// Task id
        id: TaskId,
        /// Whether the operation had already started
        started: bool,
    },

    /// Retry executor is about to sleep and try again
    Retrying {
        /// Backend being retried
        backend: String,
        /// One-based retry number
        attempt: u32,
        /// Delay before the retry
        delay: Duration,
        /// Error that triggered the retry
        error: String,
    },

    /// A circuit breaker changed state
    CircuitTransition {
        /// Backend whose circuit changed
        backend: String,
        /// Previous state
        from: CircuitState,
        /// New state
        to: CircuitState,
    },

    /// Router moved on from a failed backend
    Fallback {
        /// Backend that failed
        from: String,
        /// Reason for moving on
        error: String,
    },

    /// Router returned a result
    Dispatched {
        /// Backend that answered
        backend: String,
        /// Position in the fallback order (0 = primary)
        position: usize,
    },

    /// Result served from the fingerprint cache
    CacheHit {
        /// Request fingerprint
        fingerprint: String,
    },

    /// Fingerprint cache had no entry
    CacheMiss {
        /// Request fingerprint
        fingerprint: String,
    },
}

impl DispatchEvent {
    /// Short name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Started { .. } => "started",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled { .. } => "cancelled",
            Self::TimedOut { .. } => "timed_out",
            Self::Retrying { .. } => "retrying",
            Self::CircuitTransition { .. } => "circuit_transition",
            Self::Fallback { .. } => "fallback",
            Self::Dispatched { .. } => "dispatched",
            Self::CacheHit { .. } => "cache_hit",
            Self::CacheMiss { .. } => "cache_miss",
        }
    }
}

/// Fan-out channel for [`DispatchEvent`]s
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<DispatchEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Dropped silently when nobody listens.
    pub fn emit(&self, event: DispatchEvent) {
        tracing::trace!(event = event.name(), "dispatch event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to future events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a [`Stream`], skipping over lag gaps
    pub fn stream(&self) -> impl Stream<Item = DispatchEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(Result::ok)
    }

    /// Number of live subscribers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
