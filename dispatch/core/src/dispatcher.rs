//! Dispatcher facade
//!
//! [`Dispatcher::execute`] composes the pieces in a fixed order:
//!
//! ```text
//! fingerprint -> cache.get --hit--> Outcome { from_cache: true }
//!                    |
//!                   miss
//!                    v
//!          queue.enqueue(router.dispatch)
//!                    |
//!                    v
//!               cache.set -> Outcome { from_cache: false }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{Backend, BackendEntry};
use crate::cache::{fingerprint, CacheConfig, DurableStore, FingerprintCache};
use crate::config::DispatchConfig;
use crate::error::DispatchError;
use crate::events::{DispatchEvent, EventBus};
use crate::queue::{QueueConfig, QueueStatus, RequestQueue, TaskOptions};
use crate::resilience::{BreakerConfig, RetryPolicy};
use crate::routing::{
    BackendRegistry, BackendRouter, DispatchMetrics, Dispatched, PremiumPolicy, RouterBuilder,
};

// ============================================================================
// Options and Outcome
// ============================================================================

/// Per-call options for [`Dispatcher::execute`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecuteOptions {
    /// Queue priority, higher first
    pub priority: i32,
    /// Queue timeout; the queue default when `None`
    pub timeout: Option<Duration>,
    /// Consult and populate the fingerprint cache
    pub cacheable: bool,
    /// Cache TTL; the cache default when `None`
    pub ttl: Option<Duration>,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            priority: 0,
            timeout: None,
            cacheable: true,
            ttl: None,
        }
    }
}

impl ExecuteOptions {
    /// Set priority
    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set queue timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Bypass the cache in both directions
    #[must_use]
    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }

    /// Set cache TTL
    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

/// Result of [`Dispatcher::execute`]
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Outcome<R> {
    /// Backend response
    pub result: R,
    /// Backend that produced the response (originally, for cache hits)
    pub backend_used: String,
    /// Served from the fingerprint cache
    pub from_cache: bool,
    /// Correlation id for logs
    pub request_id: Uuid,
}

// ============================================================================
// Dispatcher
// ============================================================================

/// Cache, queue and router behind one call
pub struct Dispatcher<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    router: Arc<BackendRouter<P, R>>,
    queue: RequestQueue,
    cache: Arc<FingerprintCache<Dispatched<R>>>,
    events: EventBus,
    metrics: Arc<DispatchMetrics>,
}

impl<P, R> Dispatcher<P, R>
where
    P: Serialize + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Start building a dispatcher
    pub fn builder() -> DispatcherBuilder<P, R> {
        DispatcherBuilder::new()
    }

    /// Run `payload` as `task_kind`
    ///
    /// # Errors
    ///
    /// Queue errors (timeout, cancellation, back-pressure) and router errors
    /// (non-recoverable failure, exhaustion) are returned unchanged.
    pub async fn execute(
        &self,
        task_kind: &str,
        payload: P,
        options: ExecuteOptions,
    ) -> Result<Outcome<R>, DispatchError> {
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("execute", %request_id, task_kind);
        self.execute_inner(request_id, task_kind, payload, options)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        request_id: Uuid,
        task_kind: &str,
        payload: P,
        options: ExecuteOptions,
    ) -> Result<Outcome<R>, DispatchError> {
        let key = if options.cacheable {
            match fingerprint(task_kind, &payload) {
                Ok(key) => Some(key),
                Err(e) => {
                    tracing::warn!(error = %e, "Payload cannot be fingerprinted, skipping cache");
                    None
                }
            }
        } else {
            None
        };

        if let Some(key) = &key {
            if let Some(hit) = self.cache.get(key).await {
                self.metrics.cache_hits.inc();
                self.events.emit(DispatchEvent::CacheHit {
                    fingerprint: key.clone(),
                });
                tracing::debug!(backend = %hit.backend_used, "Served from cache");
                return Ok(Outcome {
                    result: hit.result,
                    backend_used: hit.backend_used,
                    from_cache: true,
                    request_id,
                });
            }
            self.metrics.cache_misses.inc();
            self.events.emit(DispatchEvent::CacheMiss {
                fingerprint: key.clone(),
            });
        }

        let router = Arc::clone(&self.router);
        let kind = task_kind.to_string();
        let handle = self.queue.enqueue(
            TaskOptions {
                priority: options.priority,
                timeout: options.timeout,
            },
            move || async move { router.dispatch(&kind, &payload).await },
        )?;

        let dispatched = handle.await?;

        if let Some(key) = &key {
            self.cache.set(key, dispatched.clone(), options.ttl).await;
        }

        tracing::debug!(backend = %dispatched.backend_used, "Request completed");
        Ok(Outcome {
            result: dispatched.result,
            backend_used: dispatched.backend_used,
            from_cache: false,
            request_id,
        })
    }

    /// Event bus shared by every component
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Metrics shared by every component
    pub fn metrics(&self) -> &Arc<DispatchMetrics> {
        &self.metrics
    }

    /// Backend statistics and circuit breakers
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        self.router.registry()
    }

    /// The router
    pub fn router(&self) -> &BackendRouter<P, R> {
        &self.router
    }

    /// The queue
    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    /// The fingerprint cache
    pub fn cache(&self) -> &FingerprintCache<Dispatched<R>> {
        &self.cache
    }

    /// Queue occupancy
    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Stop accepting work and reject everything still pending
    pub fn shutdown(&self) -> usize {
        let rejected = self.queue.close();
        tracing::info!(rejected, "Dispatcher shut down");
        rejected
    }
}

impl<P, R> std::fmt::Debug for Dispatcher<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("router", &self.router)
            .field("queue", &self.queue)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`Dispatcher`]
pub struct DispatcherBuilder<P, R>
where
    P: Send + Sync + 'static,
    R: Send + 'static,
{
    router: RouterBuilder<P, R>,
    queue: QueueConfig,
    breaker: BreakerConfig,
    cache: CacheConfig,
    store: Option<Arc<dyn DurableStore>>,
    events: EventBus,
}

impl<P, R> DispatcherBuilder<P, R>
where
    P: Serialize + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn new() -> Self {
        Self {
            router: BackendRouter::builder(),
            queue: QueueConfig::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            store: None,
            events: EventBus::default(),
        }
    }

    /// Take queue, retry, breaker, cache and router settings from `config`
    ///
    /// Backends are not created here; add them with [`Self::backend`].
    #[must_use]
    pub fn config(mut self, config: &DispatchConfig) -> Self {
        self.queue = config.queue.clone();
        self.breaker = config.breaker.clone();
        self.cache = config.cache.clone();
        self.router = self.router.retry_policy(config.retry.clone());
        for name in &config.router.deny_list {
            self.router = self.router.deny(name.clone());
        }
        self
    }

    /// Add a backend to the pool
    #[must_use]
    pub fn backend(mut self, entry: BackendEntry<P, R>) -> Self {
        self.router = self.router.backend(entry);
        self
    }

    /// Never call the named backend
    #[must_use]
    pub fn deny(mut self, name: impl Into<String>) -> Self {
        self.router = self.router.deny(name);
        self
    }

    /// Last-resort backend
    #[must_use]
    pub fn premium(mut self, backend: Arc<dyn Backend<P, R>>, policy: PremiumPolicy) -> Self {
        self.router = self.router.premium(backend, policy);
        self
    }

    /// Queue limits
    #[must_use]
    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    /// Retry policy for pool backends
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.router = self.router.retry_policy(policy);
        self
    }

    /// Circuit breaker thresholds
    #[must_use]
    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    /// Cache sizing
    #[must_use]
    pub fn cache_config(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    /// Durable cache tier
    #[must_use]
    pub fn durable_store(mut self, store: Arc<dyn DurableStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Publish to an existing event bus
    #[must_use]
    pub fn events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Wire everything together
    pub fn build(self) -> Dispatcher<P, R> {
        let metrics = Arc::new(DispatchMetrics::new());
        let registry = Arc::new(BackendRegistry::with_config(
            self.breaker,
            self.events.clone(),
        ));

        let router = self
            .router
            .registry(registry)
            .events(self.events.clone())
            .metrics(Arc::clone(&metrics))
            .build();
        let queue = RequestQueue::with_metrics(self.queue, self.events.clone(), Arc::clone(&metrics));
        let cache = match self.store {
            Some(store) => FingerprintCache::with_store(self.cache, store),
            None => FingerprintCache::new(self.cache),
        };

        tracing::debug!(backends = ?router.backend_names(), "Dispatcher built");

        Dispatcher {
            router: Arc::new(router),
            queue,
            cache: Arc::new(cache),
            events: self.events,
            metrics,
        }
    }
}
