//! Backend registry
//!
//! Owns the per-backend statistics and circuit breakers for one dispatch
//! layer. Each layer builds its own registry, so tests and independent
//! dispatchers never share state.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::events::EventBus;
use crate::resilience::{BreakerConfig, BreakerSnapshot, CircuitBreaker, CircuitState};

// ============================================================================
// Backend Record
// ============================================================================

/// Rolling statistics for one backend
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BackendRecord {
    /// Backend name
    pub name: String,
    /// Declared capability tags
    pub capabilities: Vec<String>,
    /// Successful calls
    pub successes: u64,
    /// Failed calls
    pub failures: u64,
    /// Mean latency of successful calls
    pub mean_latency_ms: f64,
}

impl BackendRecord {
    fn new(name: String, capabilities: Vec<String>) -> Self {
        Self {
            name,
            capabilities,
            successes: 0,
            failures: 0,
            mean_latency_ms: 0.0,
        }
    }

    /// Fraction of successful calls; an untried backend counts as perfect
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let total = self.successes + self.failures;
        if total == 0 {
            1.0
        } else {
            self.successes as f64 / total as f64
        }
    }

    /// Ranking score: `success_rate * 100 - mean_latency_ms`
    #[must_use]
    pub fn score(&self) -> f64 {
        self.success_rate() * 100.0 - self.mean_latency_ms
    }

    fn record_success(&mut self, latency: Duration) {
        self.successes += 1;
        let sample = latency.as_secs_f64() * 1000.0;
        self.mean_latency_ms += (sample - self.mean_latency_ms) / self.successes as f64;
    }

    fn record_failure(&mut self) {
        self.failures += 1;
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Statistics and circuit breakers keyed by backend name
#[derive(Debug)]
pub struct BackendRegistry {
    records: DashMap<String, Arc<Mutex<BackendRecord>>>,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    breaker_config: BreakerConfig,
    events: EventBus,
}

impl BackendRegistry {
    /// Registry with default breaker thresholds and a private event bus
    pub fn new() -> Self {
        Self::with_config(BreakerConfig::default(), EventBus::default())
    }

    /// Registry whose breakers use `breaker_config` and publish to `events`
    pub fn with_config(breaker_config: BreakerConfig, events: EventBus) -> Self {
        Self {
            records: DashMap::new(),
            breakers: DashMap::new(),
            breaker_config,
            events,
        }
    }

    /// Register a backend; re-registering replaces its capability tags only
    pub fn register(&self, name: &str, capabilities: &[String]) {
        if let Some(record) = self.records.get(name) {
            record.lock().capabilities = capabilities.to_vec();
            return;
        }
        self.records.insert(
            name.to_string(),
            Arc::new(Mutex::new(BackendRecord::new(
                name.to_string(),
                capabilities.to_vec(),
            ))),
        );
    }

    fn record_entry(&self, name: &str) -> Arc<Mutex<BackendRecord>> {
        if let Some(existing) = self.records.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.records
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(Mutex::new(BackendRecord::new(name.to_string(), Vec::new())))
                })
                .value(),
        )
    }

    /// Copy of a backend's record
    pub fn record(&self, name: &str) -> Option<BackendRecord> {
        self.records.get(name).map(|r| r.lock().clone())
    }

    /// Ranking score for a backend (untracked backends score as perfect)
    pub fn score(&self, name: &str) -> f64 {
        self.record(name).map_or(100.0, |r| r.score())
    }

    /// Count a success and fold `latency` into the mean
    pub fn record_success(&self, name: &str, latency: Duration) {
        self.record_entry(name).lock().record_success(latency);
    }

    /// Count a failure
    pub fn record_failure(&self, name: &str) {
        self.record_entry(name).lock().record_failure();
    }

    /// Circuit breaker for `name`, created on first use
    pub fn breaker(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.breakers
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(
                        CircuitBreaker::with_config(name, self.breaker_config.clone())
                            .with_events(self.events.clone()),
                    )
                })
                .value(),
        )
    }

    /// Records for every known backend, sorted by name
    pub fn records(&self) -> Vec<BackendRecord> {
        let mut records: Vec<BackendRecord> =
            self.records.iter().map(|r| r.value().lock().clone()).collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Breaker snapshot for `name`
    pub fn snapshot(&self, name: &str) -> BreakerSnapshot {
        self.breaker(name).snapshot()
    }

    /// Pin the circuit for `name` to `state`
    pub fn force_state(&self, name: &str, state: CircuitState) {
        tracing::warn!(backend = %name, ?state, "Circuit state forced by operator");
        self.breaker(name).force_state(state);
    }

    /// Breaker snapshots for every known backend, sorted by name
    pub fn all_snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<BreakerSnapshot> =
            self.breakers.iter().map(|b| b.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.backend.cmp(&b.backend));
        snapshots
    }

    /// Zero all statistics and close all circuits
    pub fn reset(&self) {
        for record in &self.records {
            let mut record = record.value().lock();
            record.successes = 0;
            record.failures = 0;
            record.mean_latency_ms = 0.0;
        }
        for breaker in &self.breakers {
            breaker.value().reset();
        }
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
