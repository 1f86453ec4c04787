//! Backend Router
//!
//! Picks a primary backend for a task, then walks a fallback order until one
//! answers. Every call goes through the backend's circuit breaker and the
//! retry executor; only transient failures are retried.
//!
//! Primary selection:
//!
//! 1. Backends on the deny-list are never called.
//! 2. Among backends declaring the task kind, the highest score wins
//!    (`success_rate * 100 - mean_latency_ms`, ties to the first declared).
//! 3. When no backend declares the task kind, primaries rotate round-robin
//!    over the whole pool.
//!
//! The fallback order is the primary followed by the rest of the pool in
//! declaration order, then the premium backend if one is configured.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::metrics::DispatchMetrics;
use super::registry::BackendRegistry;
use crate::backend::{Backend, BackendEntry};
use crate::error::{BackendError, DispatchError, FailureKind};
use crate::events::{DispatchEvent, EventBus};
use crate::resilience::{Retry, RetryNotice, RetryPolicy};

// ============================================================================
// Types
// ============================================================================

/// A router result tagged with the backend that produced it
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Dispatched<R> {
    /// Backend response
    pub result: R,
    /// Name of the backend that answered
    pub backend_used: String,
}

/// How the premium backend is called
///
/// The default is a single bare attempt: no retries, no circuit breaker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumPolicy {
    /// Apply the router's retry policy
    pub retry: bool,
    /// Guard calls with a circuit breaker
    pub circuit_break: bool,
}

/// Per-attempt switches
#[derive(Clone, Copy)]
struct AttemptMode {
    retry: bool,
    circuit_break: bool,
}

impl AttemptMode {
    const GUARDED: Self = Self {
        retry: true,
        circuit_break: true,
    };
}

// ============================================================================
// Router
// ============================================================================

/// Routes payloads across a pool of backends with cascading fallback
pub struct BackendRouter<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    pool: Vec<BackendEntry<P, R>>,
    deny_list: HashSet<String>,
    premium: Option<Arc<dyn Backend<P, R>>>,
    premium_policy: PremiumPolicy,
    registry: Arc<BackendRegistry>,
    retry: RetryPolicy,
    events: EventBus,
    metrics: Arc<DispatchMetrics>,
    round_robin: AtomicUsize,
}

impl<P, R> BackendRouter<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    /// Start building a router
    pub fn builder() -> RouterBuilder<P, R> {
        RouterBuilder::new()
    }

    /// Registry holding this router's statistics and breakers
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Metrics this router reports into
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Retry policy applied to pool backends
    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Names of the pool backends, in declaration order
    pub fn backend_names(&self) -> Vec<&str> {
        self.pool.iter().map(BackendEntry::name).collect()
    }

    fn is_denied(&self, name: &str) -> bool {
        self.deny_list.contains(name)
    }

    /// Order in which pool backends would be tried for `task_kind` next
    ///
    /// Read-only: the round-robin cursor only moves when [`Self::dispatch`]
    /// routes a request.
    pub fn fallback_order(&self, task_kind: &str) -> Vec<&BackendEntry<P, R>> {
        self.ordered(task_kind, false)
    }

    fn ordered(&self, task_kind: &str, advance_cursor: bool) -> Vec<&BackendEntry<P, R>> {
        let eligible: Vec<&BackendEntry<P, R>> = self
            .pool
            .iter()
            .filter(|entry| !self.is_denied(entry.name()))
            .collect();
        if eligible.is_empty() {
            return eligible;
        }

        let mut primary: Option<(usize, f64)> = None;
        for (idx, entry) in eligible.iter().enumerate() {
            if !entry.supports(task_kind) {
                continue;
            }
            let score = self.registry.score(entry.name());
            // strictly greater keeps ties on the earlier declaration
            if primary.map_or(true, |(_, best)| score > best) {
                primary = Some((idx, score));
            }
        }

        let primary_idx = match primary {
            Some((idx, _)) => idx,
            None if advance_cursor => {
                self.round_robin.fetch_add(1, Ordering::Relaxed) % eligible.len()
            }
            None => self.round_robin.load(Ordering::Relaxed) % eligible.len(),
        };

        let mut order = Vec::with_capacity(eligible.len());
        order.push(eligible[primary_idx]);
        order.extend(
            eligible
                .iter()
                .enumerate()
                .filter(|(idx, _)| *idx != primary_idx)
                .map(|(_, entry)| *entry),
        );
        order
    }

    /// Dispatch `payload` for `task_kind`
    ///
    /// Returns the first successful result. A non-recoverable failure stops
    /// the walk immediately; otherwise every backend in the fallback order is
    /// tried before [`DispatchError::Exhausted`] is returned.
    pub async fn dispatch(&self, task_kind: &str, payload: &P) -> Result<Dispatched<R>, DispatchError> {
        let order = self.ordered(task_kind, true);
        if order.is_empty() && self.premium.is_none() {
            warn!(task_kind, "No backends available");
            return Err(DispatchError::NoBackends {
                task_kind: task_kind.to_string(),
            });
        }

        self.metrics.dispatches.inc();
        debug!(
            task_kind,
            primary = order.first().map(|e| e.name()).unwrap_or("premium"),
            candidates = order.len(),
            "Dispatching"
        );

        let mut tried = 0;
        let mut last: Option<DispatchError> = None;

        for (position, entry) in order.iter().enumerate() {
            tried += 1;
            match self.attempt(&entry.backend, payload, AttemptMode::GUARDED).await {
                Ok(result) => return Ok(self.answered(entry.name(), position, result)),
                Err(e @ DispatchError::NonRecoverable { .. }) => {
                    warn!(backend = entry.name(), error = %e, "Non-recoverable failure, aborting dispatch");
                    return Err(e);
                }
                Err(e) => {
                    self.fell_back(entry.name(), &e);
                    last = Some(e);
                }
            }
        }

        if let Some(premium) = &self.premium {
            tried += 1;
            let mode = AttemptMode {
                retry: self.premium_policy.retry,
                circuit_break: self.premium_policy.circuit_break,
            };
            info!(backend = premium.name(), "Escalating to premium backend");
            match self.attempt(premium, payload, mode).await {
                Ok(result) => return Ok(self.answered(premium.name(), order.len(), result)),
                Err(e @ DispatchError::NonRecoverable { .. }) => return Err(e),
                Err(e) => last = Some(e),
            }
        }

        self.metrics.exhausted.inc();
        match last {
            Some(last) => {
                warn!(task_kind, tried, error = %last, "All backends failed");
                Err(DispatchError::Exhausted {
                    tried,
                    last: Box::new(last),
                })
            }
            None => Err(DispatchError::NoBackends {
                task_kind: task_kind.to_string(),
            }),
        }
    }

    fn answered(&self, backend: &str, position: usize, result: R) -> Dispatched<R> {
        if position > 0 {
            self.metrics.fallbacks.inc();
            info!(backend, position, "Answered by fallback backend");
        }
        self.events.emit(DispatchEvent::Dispatched {
            backend: backend.to_string(),
            position,
        });
        Dispatched {
            result,
            backend_used: backend.to_string(),
        }
    }

    fn fell_back(&self, backend: &str, error: &DispatchError) {
        warn!(backend, error = %error, "Backend failed, falling back");
        self.events.emit(DispatchEvent::Fallback {
            from: backend.to_string(),
            error: error.to_string(),
        });
    }

    /// One backend attempt: breaker admission, then the retry executor
    async fn attempt(
        &self,
        backend: &Arc<dyn Backend<P, R>>,
        payload: &P,
        mode: AttemptMode,
    ) -> Result<R, DispatchError> {
        let name = backend.name().to_string();
        let backend_metrics = self.metrics.backend(&name);

        let breaker = mode.circuit_break.then(|| self.registry.breaker(&name));
        let permit = match &breaker {
            Some(breaker) => match breaker.try_acquire() {
                Some(permit) => Some(permit),
                None => {
                    backend_metrics.rejected.inc();
                    return Err(DispatchError::BackendUnavailable { backend: name });
                }
            },
            None => None,
        };

        let policy = if mode.retry {
            self.retry.clone()
        } else {
            RetryPolicy::no_retry()
        };
        let call_started = Mutex::new(Instant::now());

        let result = Retry::new(&policy)
            .retry_if(BackendError::is_retryable)
            .on_retry(|notice: &RetryNotice<'_, BackendError>| {
                backend_metrics.retries.inc();
                warn!(
                    backend = %name,
                    attempt = notice.attempt,
                    delay_ms = notice.delay.as_millis() as u64,
                    error = %notice.error,
                    "Retrying backend call"
                );
                self.events.emit(DispatchEvent::Retrying {
                    backend: name.clone(),
                    attempt: notice.attempt,
                    delay: notice.delay,
                    error: notice.error.to_string(),
                });
            })
            .run(|| {
                *call_started.lock() = Instant::now();
                backend.invoke(payload)
            })
            .await;

        let latency = call_started.lock().elapsed();

        match result {
            Ok(value) => {
                if let Some(permit) = permit {
                    let _ = permit.success();
                }
                self.registry.record_success(&name, latency);
                backend_metrics.successes.inc();
                backend_metrics.latency.record(latency);
                Ok(value)
            }
            Err(error) => {
                if let Some(permit) = permit {
                    let _ = permit.failure();
                }
                self.registry.record_failure(&name);
                backend_metrics.failures.inc();
                Err(match error.kind {
                    FailureKind::NonRecoverable => DispatchError::NonRecoverable {
                        backend: name,
                        source: error,
                    },
                    FailureKind::Transient | FailureKind::Unsupported => DispatchError::Backend {
                        backend: name,
                        source: error,
                    },
                })
            }
        }
    }
}

impl<P, R> std::fmt::Debug for BackendRouter<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRouter")
            .field("pool", &self.backend_names())
            .field("deny_list", &self.deny_list)
            .field("premium", &self.premium.as_ref().map(|p| p.name().to_string()))
            .field("premium_policy", &self.premium_policy)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`BackendRouter`]
pub struct RouterBuilder<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    pool: Vec<BackendEntry<P, R>>,
    deny_list: HashSet<String>,
    premium: Option<Arc<dyn Backend<P, R>>>,
    premium_policy: PremiumPolicy,
    registry: Option<Arc<BackendRegistry>>,
    retry: RetryPolicy,
    events: Option<EventBus>,
    metrics: Option<Arc<DispatchMetrics>>,
}

impl<P, R> RouterBuilder<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    fn new() -> Self {
        Self {
            pool: Vec::new(),
            deny_list: HashSet::new(),
            premium: None,
            premium_policy: PremiumPolicy::default(),
            registry: None,
            retry: RetryPolicy::default(),
            events: None,
            metrics: None,
        }
    }

    /// Add a backend to the pool; declaration order breaks score ties
    #[must_use]
    pub fn backend(mut self, entry: BackendEntry<P, R>) -> Self {
        self.pool.push(entry);
        self
    }

    /// Never call the named backend
    #[must_use]
    pub fn deny(mut self, name: impl Into<String>) -> Self {
        self.deny_list.insert(name.into());
        self
    }

    /// Last-resort backend tried after the pool is exhausted
    #[must_use]
    pub fn premium(mut self, backend: Arc<dyn Backend<P, R>>, policy: PremiumPolicy) -> Self {
        self.premium = Some(backend);
        self.premium_policy = policy;
        self
    }

    /// Share an existing registry
    #[must_use]
    pub fn registry(mut self, registry: Arc<BackendRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Retry policy for pool backends
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    /// Publish routing events to `events`
    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Report into shared metrics
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<DispatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the router, registering every pool backend
    pub fn build(self) -> BackendRouter<P, R> {
        let events = self.events.unwrap_or_default();
        let registry = self.registry.unwrap_or_else(|| {
            Arc::new(BackendRegistry::with_config(
                Default::default(),
                events.clone(),
            ))
        });
        for entry in &self.pool {
            registry.register(entry.name(), &entry.capabilities);
        }

        BackendRouter {
            pool: self.pool,
            deny_list: self.deny_list,
            premium: self.premium,
            premium_policy: self.premium_policy,
            registry,
            retry: self.retry,
            events,
            metrics: self.metrics.unwrap_or_default(),
            round_robin: AtomicUsize::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::backend_fn;
    use crate::error::ErrorKind;
    use crate::resilience::{BreakerConfig, CircuitState};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    type Entry = BackendEntry<String, String>;

    fn ok(name: &'static str) -> Entry {
        BackendEntry::new(backend_fn(name, move |_: String| async move {
            Ok::<_, BackendError>(format!("{name}: OK"))
        }))
    }

    fn failing(name: &'static str, error: BackendError) -> Entry {
        BackendEntry::new(backend_fn(name, move |_: String| {
            let error = error.clone();
            async move { Err::<String, _>(error) }
        }))
    }

    fn counting(name: &'static str, calls: Arc<AtomicU32>, error: BackendError) -> Entry {
        BackendEntry::new(backend_fn(name, move |_: String| {
            calls.fetch_add(1, Ordering::SeqCst);
            let error = error.clone();
            async move { Err::<String, _>(error) }
        }))
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 1,
            initial_delay: Duration::from_millis(10),
            ..RetryPolicy::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_cascade() {
        let router = BackendRouter::builder()
            .backend(failing("A", BackendError::transient("unavailable")))
            .backend(ok("B"))
            .retry_policy(fast_retry())
            .build();

        let out = router.dispatch("chat", &"hi".to_string()).await.unwrap();

        assert_eq!(out.result, "B: OK");
        assert_eq!(out.backend_used, "B");
        let a = router.registry().record("A").unwrap();
        let b = router.registry().record("B").unwrap();
        assert_eq!(a.failures, 1);
        assert_eq!(b.successes, 1);
        assert_eq!(router.metrics().fallbacks.get(), 1);
        // one retry on A before moving on
        assert_eq!(router.metrics().backend("A").retries.get(), 1);
    }

    #[tokio::test]
    async fn test_non_recoverable_aborts() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = BackendRouter::builder()
            .backend(failing("A", BackendError::non_recoverable("bad key").with_status(401)))
            .backend(counting("B", Arc::clone(&calls), BackendError::transient("x")))
            .build();

        let err = router.dispatch("chat", &"hi".to_string()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::NonRecoverable);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(router.registry().record("A").unwrap().failures, 1);
    }

    #[tokio::test]
    async fn test_unsupported_falls_through_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = BackendRouter::builder()
            .backend(counting("A", Arc::clone(&calls), BackendError::unsupported("no model")))
            .backend(ok("B"))
            .build();

        let out = router.dispatch("chat", &"hi".to_string()).await.unwrap();

        assert_eq!(out.backend_used, "B");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_counts_every_backend() {
        let router = BackendRouter::builder()
            .backend(failing("A", BackendError::transient("down")))
            .backend(failing("B", BackendError::transient("down")))
            .backend(failing("C", BackendError::unsupported("nope")))
            .retry_policy(fast_retry())
            .build();

        let err = router.dispatch("chat", &"hi".to_string()).await.unwrap_err();

        match err {
            DispatchError::Exhausted { tried, last } => {
                assert_eq!(tried, 3);
                assert!(matches!(*last, DispatchError::Backend { ref backend, .. } if backend == "C"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(router.metrics().exhausted.get(), 1);
    }

    #[tokio::test]
    async fn test_capability_match_preferred() {
        let router = BackendRouter::builder()
            .backend(ok("general"))
            .backend(ok("vision").with_capabilities(["vision"]))
            .build();

        let out = router.dispatch("vision", &"img".to_string()).await.unwrap();
        assert_eq!(out.backend_used, "vision");

        let order: Vec<&str> = router.fallback_order("vision").iter().map(|e| e.name()).collect();
        assert_eq!(order, vec!["vision", "general"]);
    }

    #[tokio::test]
    async fn test_score_ranks_capable_backends() {
        let router = BackendRouter::builder()
            .backend(ok("slow").with_capabilities(["coding"]))
            .backend(ok("fast").with_capabilities(["coding"]))
            .build();

        // equal untried scores: first declared wins
        let order: Vec<&str> = router.fallback_order("coding").iter().map(|e| e.name()).collect();
        assert_eq!(order, vec!["slow", "fast"]);

        router.registry().record_success("slow", Duration::from_millis(40));
        router.registry().record_success("fast", Duration::from_millis(5));

        let order: Vec<&str> = router.fallback_order("coding").iter().map(|e| e.name()).collect();
        assert_eq!(order, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn test_round_robin_without_capability_match() {
        let router = BackendRouter::builder()
            .backend(ok("A"))
            .backend(ok("B"))
            .backend(ok("C"))
            .build();

        let mut used = Vec::new();
        for _ in 0..4 {
            used.push(router.dispatch("chat", &"hi".to_string()).await.unwrap().backend_used);
        }
        assert_eq!(used, vec!["A", "B", "C", "A"]);
    }

    #[tokio::test]
    async fn test_fallback_order_does_not_advance_round_robin() {
        let router = BackendRouter::builder()
            .backend(ok("A"))
            .backend(ok("B"))
            .build();

        for _ in 0..3 {
            let order: Vec<&str> = router.fallback_order("chat").iter().map(|e| e.name()).collect();
            assert_eq!(order, vec!["A", "B"]);
        }
        let first = router.dispatch("chat", &"hi".to_string()).await.unwrap();
        assert_eq!(first.backend_used, "A");

        let order: Vec<&str> = router.fallback_order("chat").iter().map(|e| e.name()).collect();
        assert_eq!(order, vec!["B", "A"]);
        let second = router.dispatch("chat", &"hi".to_string()).await.unwrap();
        assert_eq!(second.backend_used, "B");
    }

    #[tokio::test]
    async fn test_deny_list_never_called() {
        let calls = Arc::new(AtomicU32::new(0));
        let router = BackendRouter::builder()
            .backend(counting("blocked", Arc::clone(&calls), BackendError::transient("x")).with_capabilities(["chat"]))
            .backend(failing("A", BackendError::unsupported("nope")))
            .deny("blocked")
            .build();

        let err = router.dispatch("chat", &"hi".to_string()).await.unwrap_err();

        assert!(matches!(err, DispatchError::Exhausted { tried: 1, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let router: BackendRouter<String, String> = BackendRouter::builder().build();
        let err = router.dispatch("chat", &"hi".to_string()).await.unwrap_err();
        assert!(matches!(err, DispatchError::NoBackends { .. }));
    }

    #[tokio::test]
    async fn test_premium_single_attempt_by_default() {
        let calls = Arc::new(AtomicU32::new(0));
        let premium = counting("premium", Arc::clone(&calls), BackendError::transient("busy"));
        let router = BackendRouter::builder()
            .backend(failing("A", BackendError::unsupported("nope")))
            .premium(premium.backend, PremiumPolicy::default())
            .build();

        let err = router.dispatch("chat", &"hi".to_string()).await.unwrap_err();

        assert!(matches!(err, DispatchError::Exhausted { tried: 2, .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // no breaker was created for the premium backend
        assert!(router
            .registry()
            .all_snapshots()
            .iter()
            .all(|s| s.backend != "premium"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_premium_retry_when_enabled() {
        let calls = Arc::new(AtomicU32::new(0));
        let premium = counting("premium", Arc::clone(&calls), BackendError::transient("busy"));
        let router = BackendRouter::builder()
            .premium(
                premium.backend,
                PremiumPolicy {
                    retry: true,
                    circuit_break: true,
                },
            )
            .retry_policy(fast_retry())
            .build();

        let _ = router.dispatch("chat", &"hi".to_string()).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            router.registry().breaker("premium").snapshot().consecutive_failures,
            1
        );
    }

    #[tokio::test]
    async fn test_premium_answers_after_pool() {
        let router = BackendRouter::builder()
            .backend(failing("A", BackendError::unsupported("nope")))
            .premium(ok("premium").backend, PremiumPolicy::default())
            .build();

        let out = router.dispatch("chat", &"hi".to_string()).await.unwrap();
        assert_eq!(out.backend_used, "premium");
    }

    #[tokio::test]
    async fn test_open_circuit_skipped_and_counted() {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = Arc::new(BackendRegistry::with_config(
            BreakerConfig {
                failure_threshold: 1,
                ..BreakerConfig::default()
            },
            EventBus::default(),
        ));
        let router = BackendRouter::builder()
            .backend(counting("A", Arc::clone(&calls), BackendError::unsupported("nope")))
            .backend(ok("B"))
            .registry(Arc::clone(&registry))
            .build();

        // first dispatch opens A's circuit
        router.dispatch("chat", &"hi".to_string()).await.unwrap();
        assert_eq!(registry.breaker("A").state(), CircuitState::Open);

        // round-robin: B is primary, then A is primary again but rejected
        assert_eq!(router.dispatch("chat", &"hi".to_string()).await.unwrap().backend_used, "B");
        assert_eq!(router.dispatch("chat", &"hi".to_string()).await.unwrap().backend_used, "B");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.metrics().backend("A").rejected.get(), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_through_router() {
        let registry = Arc::new(BackendRegistry::new());
        let router = BackendRouter::builder()
            .backend(failing("A", BackendError::non_recoverable("bad request")))
            .registry(Arc::clone(&registry))
            .build();

        for _ in 0..5 {
            let err = router.dispatch("chat", &"hi".to_string()).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::NonRecoverable);
        }

        let err = router.dispatch("chat", &"hi".to_string()).await.unwrap_err();
        match err {
            DispatchError::Exhausted { tried, last } => {
                assert_eq!(tried, 1);
                assert_eq!(last.kind(), ErrorKind::BackendUnavailable);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }
}
