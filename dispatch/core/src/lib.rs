//! Dispatch Core - Resilient request dispatch for model backends
//!
//! Sits between an application and a pool of interchangeable AI backends.
//! Requests are fingerprinted and cached, queued by priority under a
//! concurrency ceiling, and routed to the best available backend with
//! cascading fallback. Every backend call is guarded by a per-backend
//! circuit breaker and retried with capped exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Dispatcher                            │
//! │                                                               │
//! │   execute(kind, payload)                                      │
//! │        │                                                      │
//! │        ▼                                                      │
//! │  ┌─────────────────┐  hit                                     │
//! │  │FingerprintCache │──────────────────────────────▶ Outcome   │
//! │  └────────┬────────┘                                          │
//! │           │ miss                                              │
//! │           ▼                                                   │
//! │  ┌─────────────────┐                                          │
//! │  │  RequestQueue   │  priority order, N in flight             │
//! │  └────────┬────────┘                                          │
//! │           ▼                                                   │
//! │  ┌─────────────────┐     ┌──────────────────────────────┐    │
//! │  │  BackendRouter  │────▶│ CircuitBreaker ▶ Retry ▶ call │    │
//! │  └─────────────────┘     └──────────────────────────────┘    │
//! │           │ fallback order: A ─▶ B ─▶ ... ─▶ premium          │
//! └───────────┼───────────────────────────────────────────────────┘
//!             ▼
//!        EventBus (lifecycle events) + DispatchMetrics
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use dispatch_core::{backend_fn, BackendEntry, BackendError, Dispatcher, ExecuteOptions};
//!
//! let dispatcher: Dispatcher<String, String> = Dispatcher::builder()
//!     .backend(BackendEntry::new(backend_fn("echo", |prompt: String| async move {
//!         Ok::<_, BackendError>(prompt)
//!     })))
//!     .build();
//!
//! let outcome = dispatcher
//!     .execute("chat", "hello".to_string(), ExecuteOptions::default())
//!     .await?;
//! println!("{} answered: {}", outcome.backend_used, outcome.result);
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: the generic [`Backend`] trait and the HTTP adapter
//! - [`cache`]: two-tier fingerprint cache
//! - [`config`]: TOML + environment configuration
//! - [`dispatcher`]: the [`Dispatcher`] facade
//! - [`error`]: failure classification and [`DispatchError`]
//! - [`events`]: lifecycle [`EventBus`]
//! - [`queue`]: priority [`RequestQueue`]
//! - [`resilience`]: circuit breaker and retry executor
//! - [`routing`]: registry, router and metrics

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]

pub mod backend;
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod queue;
pub mod resilience;
pub mod routing;

// Re-exports for convenience
pub use backend::{
    backend_fn, Backend, BackendEntry, ChatMessage, ChatRequest, ChatResponse, FnBackend,
    HttpBackend,
};
pub use dispatcher::{Dispatcher, DispatcherBuilder, ExecuteOptions, Outcome};
pub use error::{BackendError, DispatchError, ErrorKind, FailureKind};
pub use events::{DispatchEvent, EventBus};

// Cache exports
pub use cache::{
    fingerprint, CacheConfig, CacheError, CacheStats, DurableStore, FileStore, FingerprintCache,
    MemoryStore,
};

// Queue exports
pub use queue::{QueueConfig, QueueStatus, RequestQueue, TaskHandle, TaskId, TaskOptions};

// Resilience exports
pub use resilience::{
    with_retry, BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitError, CircuitState, Retry,
    RetryPolicy,
};

// Routing exports
pub use routing::{
    BackendRecord, BackendRegistry, BackendRouter, DispatchMetrics, Dispatched, PremiumPolicy,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, BackendSpec, ConfigError,
    ConfigOverrides, ConfigSource, DispatchConfig,
};
