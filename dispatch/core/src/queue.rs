//! Priority request queue with bounded concurrency
//!
//! Tasks are kept in a single vector ordered by priority, highest first. A new
//! task goes immediately before the first entry with a strictly lower
//! priority, so equal priorities keep arrival order. Whenever a slot frees up
//! the head of the vector is moved into the executing set and spawned.
//!
//! Every task owns one timer. When it fires:
//! - a pending task is removed and settled with [`DispatchError::Timeout`]
//! - an executing task only has its caller handle rejected; the operation keeps
//!   running (and holding its slot) unless `abort_on_timeout` is set
//!
//! A task settles exactly once. The oneshot sender lives in a shared slot and
//! whichever of completion, timeout, cancellation or close takes it first wins.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::error::DispatchError;
use crate::events::{DispatchEvent, EventBus};
use crate::routing::DispatchMetrics;

// ============================================================================
// Identifiers, Options, Config
// ============================================================================

/// Queue-assigned task identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Per-task scheduling options
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TaskOptions {
    /// Higher runs first
    pub priority: i32,
    /// Overrides the queue's default timeout
    pub timeout: Option<Duration>,
}

impl TaskOptions {
    /// Options with the given priority
    #[must_use]
    pub fn with_priority(priority: i32) -> Self {
        Self {
            priority,
            timeout: None,
        }
    }

    /// Set the timeout
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Queue limits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueConfig {
    /// Tasks executing at once
    pub max_concurrent: usize,
    /// Timeout for tasks that do not set their own
    pub default_timeout: Duration,
    /// Pending tasks accepted before `enqueue` returns `QueueFull`
    pub max_queue_depth: usize,
    /// Abort an executing operation when its timer fires
    pub abort_on_timeout: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            default_timeout: Duration::from_millis(30_000),
            max_queue_depth: 1024,
            abort_on_timeout: false,
        }
    }
}

/// Queue occupancy
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueueStatus {
    /// Pending tasks
    pub queued: usize,
    /// Executing tasks
    pub executing: usize,
    /// Sum of both
    pub total: usize,
}

// ============================================================================
// Internal State
// ============================================================================

type Reject = Arc<dyn Fn(DispatchError) -> bool + Send + Sync>;
/// Resolves to `None` when the task had already been settled elsewhere
type Runner = Box<dyn FnOnce() -> BoxFuture<'static, Option<Result<(), String>>> + Send>;
type Slot<T> = Arc<Mutex<Option<oneshot::Sender<Result<T, DispatchError>>>>>;

struct PendingTask {
    id: TaskId,
    priority: i32,
    enqueued_at: Instant,
    run: Runner,
    reject: Reject,
    timer: Option<AbortHandle>,
}

struct ExecutingTask {
    reject: Reject,
    timer: Option<AbortHandle>,
    abort: Option<AbortHandle>,
}

#[derive(Default)]
struct QueueState {
    pending: Vec<PendingTask>,
    executing: HashMap<TaskId, ExecutingTask>,
    closed: bool,
}

struct QueueShared {
    config: QueueConfig,
    state: Mutex<QueueState>,
    next_id: AtomicU64,
    events: EventBus,
    metrics: Option<Arc<DispatchMetrics>>,
}

/// Deliver `result` if nobody settled the task first
fn settle<T>(slot: &Slot<T>, result: Result<T, DispatchError>) -> bool {
    match slot.lock().take() {
        Some(tx) => {
            let _ = tx.send(result);
            true
        }
        None => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

/// Frees the execution slot when the spawned task ends, including on abort
struct SlotGuard {
    shared: Arc<QueueShared>,
    id: TaskId,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        QueueShared::finish(&self.shared, self.id);
    }
}

impl QueueShared {
    fn update_depth(&self, depth: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.queue_depth.set(depth as u64);
        }
    }

    fn attach_timer(&self, id: TaskId, timer: AbortHandle) {
        let mut state = self.state.lock();
        if let Some(task) = state.pending.iter_mut().find(|t| t.id == id) {
            task.timer = Some(timer);
        } else if let Some(task) = state.executing.get_mut(&id) {
            task.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    /// Move pending tasks into free slots
    fn drain(shared: &Arc<Self>) {
        loop {
            let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                return;
            };

            let (id, run, enqueued_at, depth) = {
                let mut state = shared.state.lock();
                if state.closed
                    || state.pending.is_empty()
                    || state.executing.len() >= shared.config.max_concurrent
                {
                    return;
                }
                let PendingTask {
                    id,
                    run,
                    reject,
                    timer,
                    enqueued_at,
                    ..
                } = state.pending.remove(0);
                state.executing.insert(
                    id,
                    ExecutingTask {
                        reject,
                        timer,
                        abort: None,
                    },
                );
                (id, run, enqueued_at, state.pending.len())
            };

            let waited = enqueued_at.elapsed();
            shared.update_depth(depth);
            if let Some(metrics) = &shared.metrics {
                metrics.queue_wait.record(waited);
            }
            tracing::debug!(task = %id, waited_ms = waited.as_millis() as u64, "Task started");
            shared.events.emit(DispatchEvent::Started { id, waited });

            let guard = SlotGuard {
                shared: Arc::clone(shared),
                id,
            };
            let events = shared.events.clone();
            let handle = runtime.spawn(async move {
                let started = Instant::now();
                match run().await {
                    Some(Ok(())) => events.emit(DispatchEvent::Completed {
                        id,
                        elapsed: started.elapsed(),
                    }),
                    Some(Err(error)) => events.emit(DispatchEvent::Failed { id, error }),
                    // the timer settled it first and already reported
                    None => {}
                }
                drop(guard);
            });

            if let Some(task) = shared.state.lock().executing.get_mut(&id) {
                task.abort = Some(handle.abort_handle());
            }
        }
    }

    fn finish(shared: &Arc<Self>, id: TaskId) {
        let removed = shared.state.lock().executing.remove(&id);
        if let Some(timer) = removed.and_then(|task| task.timer) {
            timer.abort();
        }
        Self::drain(shared);
    }

    fn expire(shared: &Arc<Self>, id: TaskId, timeout: Duration) {
        let mut state = shared.state.lock();

        if let Some(pos) = state.pending.iter().position(|t| t.id == id) {
            let task = state.pending.remove(pos);
            let depth = state.pending.len();
            drop(state);

            shared.update_depth(depth);
            (task.reject)(DispatchError::Timeout {
                id,
                timeout,
                started: false,
            });
            tracing::warn!(task = %id, timeout_ms = timeout.as_millis() as u64, "Task timed out while queued");
            shared.events.emit(DispatchEvent::TimedOut { id, started: false });
            return;
        }

        let Some(task) = state.executing.get_mut(&id) else {
            return;
        };
        task.timer = None;
        let reject = Arc::clone(&task.reject);
        let abort = if shared.config.abort_on_timeout {
            task.abort.take()
        } else {
            None
        };
        drop(state);

        let settled = reject(DispatchError::Timeout {
            id,
            timeout,
            started: true,
        });
        if settled {
            tracing::warn!(task = %id, timeout_ms = timeout.as_millis() as u64, "Task timed out while executing");
            shared.events.emit(DispatchEvent::TimedOut { id, started: true });
        }
        if let Some(abort) = abort {
            abort.abort();
        }
    }
}

// ============================================================================
// Request Queue
// ============================================================================

/// Priority queue that runs at most `max_concurrent` operations at once
#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<QueueShared>,
}

impl RequestQueue {
    /// Queue with the given limits and a private event bus
    pub fn new(config: QueueConfig) -> Self {
        Self::with_events(config, EventBus::default())
    }

    /// Queue publishing lifecycle events to `events`
    pub fn with_events(config: QueueConfig, events: EventBus) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                config,
                state: Mutex::new(QueueState::default()),
                next_id: AtomicU64::new(1),
                events,
                metrics: None,
            }),
        }
    }

    /// Queue publishing events and recording depth/wait metrics
    pub fn with_metrics(config: QueueConfig, events: EventBus, metrics: Arc<DispatchMetrics>) -> Self {
        Self {
            shared: Arc::new(QueueShared {
                config,
                state: Mutex::new(QueueState::default()),
                next_id: AtomicU64::new(1),
                events,
                metrics: Some(metrics),
            }),
        }
    }

    /// Limits in use
    pub fn config(&self) -> &QueueConfig {
        &self.shared.config
    }

    /// Submit an operation. It runs once a slot is free and no higher
    /// priority task is waiting.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn enqueue<T, F, Fut>(
        &self,
        options: TaskOptions,
        operation: F,
    ) -> Result<TaskHandle<T>, DispatchError>
    where
        T: Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, DispatchError>> + Send + 'static,
    {
        let shared = &self.shared;
        let id = TaskId(shared.next_id.fetch_add(1, Ordering::Relaxed));
        let timeout = options.timeout.unwrap_or(shared.config.default_timeout);

        let (tx, rx) = oneshot::channel();
        let slot: Slot<T> = Arc::new(Mutex::new(Some(tx)));

        let reject_slot = Arc::clone(&slot);
        let reject: Reject = Arc::new(move |error| settle(&reject_slot, Err(error)));
        let run: Runner = Box::new(move || {
            Box::pin(async move {
                let result = match AssertUnwindSafe(async move { operation().await })
                    .catch_unwind()
                    .await
                {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        tracing::error!(task = %id, %message, "Task panicked");
                        Err(DispatchError::Panicked { id, message })
                    }
                };
                let outcome = result.as_ref().map(|_| ()).map_err(ToString::to_string);
                settle(&slot, result).then_some(outcome)
            })
        });

        let queued = {
            let mut state = shared.state.lock();
            if state.closed {
                return Err(DispatchError::QueueClosed);
            }
            if state.pending.len() >= shared.config.max_queue_depth {
                return Err(DispatchError::QueueFull {
                    depth: state.pending.len(),
                });
            }

            let pos = state
                .pending
                .iter()
                .position(|t| t.priority < options.priority)
                .unwrap_or(state.pending.len());
            state.pending.insert(
                pos,
                PendingTask {
                    id,
                    priority: options.priority,
                    enqueued_at: Instant::now(),
                    run,
                    reject,
                    timer: None,
                },
            );
            state.pending.len()
        };

        shared.update_depth(queued);
        tracing::debug!(task = %id, priority = options.priority, queued, "Task enqueued");
        shared.events.emit(DispatchEvent::Enqueued {
            id,
            priority: options.priority,
            queued,
        });

        let weak: Weak<QueueShared> = Arc::downgrade(shared);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(shared) = weak.upgrade() {
                QueueShared::expire(&shared, id, timeout);
            }
        });
        shared.attach_timer(id, timer.abort_handle());

        QueueShared::drain(shared);
        Ok(TaskHandle { id, rx })
    }

    /// Remove a pending task and settle it as cancelled.
    ///
    /// Returns `false` if the task is executing, already settled, or unknown.
    pub fn cancel(&self, id: TaskId) -> bool {
        let task = {
            let mut state = self.shared.state.lock();
            let Some(pos) = state.pending.iter().position(|t| t.id == id) else {
                return false;
            };
            let task = state.pending.remove(pos);
            self.shared.update_depth(state.pending.len());
            task
        };

        if let Some(timer) = task.timer {
            timer.abort();
        }
        (task.reject)(DispatchError::Cancelled { id });
        tracing::debug!(task = %id, "Task cancelled");
        self.shared.events.emit(DispatchEvent::Cancelled { id });
        true
    }

    /// Current occupancy
    pub fn status(&self) -> QueueStatus {
        let state = self.shared.state.lock();
        let queued = state.pending.len();
        let executing = state.executing.len();
        QueueStatus {
            queued,
            executing,
            total: queued + executing,
        }
    }

    /// Stop accepting work and reject every pending task with `QueueClosed`.
    /// Executing tasks run to completion. Returns the number rejected.
    pub fn close(&self) -> usize {
        let pending = {
            let mut state = self.shared.state.lock();
            state.closed = true;
            std::mem::take(&mut state.pending)
        };
        self.shared.update_depth(0);

        let count = pending.len();
        for task in pending {
            if let Some(timer) = task.timer {
                timer.abort();
            }
            (task.reject)(DispatchError::QueueClosed);
        }
        if count > 0 {
            tracing::info!(rejected = count, "Queue closed with pending tasks");
        }
        count
    }

    /// Event bus the queue publishes to
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("config", &self.shared.config)
            .field("status", &self.status())
            .finish()
    }
}

// ============================================================================
// Task Handle
// ============================================================================

/// Caller's side of an enqueued task; await it for the result
#[derive(Debug)]
pub struct TaskHandle<T> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T, DispatchError>>,
}

impl<T> TaskHandle<T> {
    /// Id to pass to [`RequestQueue::cancel`]
    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T, DispatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(DispatchError::QueueClosed)))
    }
}
