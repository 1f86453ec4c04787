//! Dispatch Metrics
//!
//! Lock-free counters and latency histograms for the router, queue and cache,
//! with a Prometheus text export.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;

// ============================================================================
// Primitives
// ============================================================================

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Increment by one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Value that goes up and down
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Overwrite the value
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Bucketed latency histogram, in milliseconds
#[derive(Debug)]
pub struct Histogram {
    bounds: Vec<f64>,
    counts: Vec<AtomicU64>,
    total: AtomicU64,
    sum_ms: AtomicU64,
}

impl Histogram {
    /// Histogram with explicit upper bounds
    pub fn new(bounds: Vec<f64>) -> Self {
        let counts = bounds.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            bounds,
            counts,
            total: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
        }
    }

    /// Buckets suited to model calls (10ms to 2min)
    pub fn latency_default() -> Self {
        Self::new(vec![
            10.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10_000.0, 30_000.0,
            120_000.0,
        ])
    }

    /// Record one observation
    pub fn record(&self, elapsed: Duration) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        let idx = self
            .bounds
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(self.bounds.len().saturating_sub(1));
        if let Some(count) = self.counts.get(idx) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> HistogramSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let sum_ms = self.sum_ms.load(Ordering::Relaxed);
        HistogramSnapshot {
            bounds: self.bounds.clone(),
            counts: self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect(),
            total,
            mean_ms: if total > 0 {
                sum_ms as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Copy of a [`Histogram`]
#[derive(Clone, Debug, Serialize)]
pub struct HistogramSnapshot {
    /// Bucket upper bounds
    pub bounds: Vec<f64>,
    /// Observations per bucket
    pub counts: Vec<u64>,
    /// Total observations
    pub total: u64,
    /// Mean observation
    pub mean_ms: f64,
}

impl HistogramSnapshot {
    /// Upper bound of the bucket containing quantile `q`
    pub fn percentile(&self, q: f64) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let target = ((self.total as f64) * q).ceil() as u64;
        let mut seen = 0;
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            seen += count;
            if seen >= target {
                return *bound;
            }
        }
        self.bounds.last().copied().unwrap_or(0.0)
    }
}

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Per-backend call metrics
#[derive(Debug)]
pub struct BackendMetrics {
    /// Successful calls
    pub successes: Counter,
    /// Failed calls (after retries)
    pub failures: Counter,
    /// Calls rejected by an open circuit
    pub rejected: Counter,
    /// Retries performed
    pub retries: Counter,
    /// Latency of successful calls
    pub latency: Histogram,
}

impl Default for BackendMetrics {
    fn default() -> Self {
        Self {
            successes: Counter::default(),
            failures: Counter::default(),
            rejected: Counter::default(),
            retries: Counter::default(),
            latency: Histogram::latency_default(),
        }
    }
}

/// Metrics for one dispatch layer
#[derive(Debug)]
pub struct DispatchMetrics {
    /// Dispatches started by the router
    pub dispatches: Counter,
    /// Dispatches answered by a backend other than the primary
    pub fallbacks: Counter,
    /// Dispatches that exhausted every backend
    pub exhausted: Counter,
    /// Cache hits in `execute`
    pub cache_hits: Counter,
    /// Cache misses in `execute`
    pub cache_misses: Counter,
    /// Tasks waiting for a slot
    pub queue_depth: Gauge,
    /// Time tasks spend pending
    pub queue_wait: Histogram,
    backends: DashMap<String, Arc<BackendMetrics>>,
    started: Instant,
}

impl DispatchMetrics {
    /// Fresh metrics
    pub fn new() -> Self {
        Self {
            dispatches: Counter::default(),
            fallbacks: Counter::default(),
            exhausted: Counter::default(),
            cache_hits: Counter::default(),
            cache_misses: Counter::default(),
            queue_depth: Gauge::default(),
            queue_wait: Histogram::latency_default(),
            backends: DashMap::new(),
            started: Instant::now(),
        }
    }

    /// Metrics for `backend`, created on first use
    pub fn backend(&self, backend: &str) -> Arc<BackendMetrics> {
        if let Some(existing) = self.backends.get(backend) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.backends
                .entry(backend.to_string())
                .or_default()
                .value(),
        )
    }

    /// Time since creation
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Prometheus text exposition
    pub fn to_prometheus(&self) -> String {
        let mut out = String::new();

        let globals = [
            ("dispatch_requests_total", "Dispatches started", self.dispatches.get()),
            ("dispatch_fallbacks_total", "Dispatches answered by a fallback backend", self.fallbacks.get()),
            ("dispatch_exhausted_total", "Dispatches where every backend failed", self.exhausted.get()),
            ("dispatch_cache_hits_total", "Results served from cache", self.cache_hits.get()),
            ("dispatch_cache_misses_total", "Cache lookups that missed", self.cache_misses.get()),
        ];
        for (name, help, value) in globals {
            let _ = write!(out, "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n");
        }

        let _ = write!(
            out,
            "# HELP dispatch_queue_depth Tasks waiting for an execution slot\n\
             # TYPE dispatch_queue_depth gauge\n\
             dispatch_queue_depth {}\n\n",
            self.queue_depth.get()
        );

        let wait = self.queue_wait.snapshot();
        let _ = write!(
            out,
            "dispatch_queue_wait_p50_ms {}\ndispatch_queue_wait_p99_ms {}\n\n",
            wait.percentile(0.5),
            wait.percentile(0.99)
        );

        let mut names: Vec<String> = self.backends.iter().map(|e| e.key().clone()).collect();
        names.sort();
        for name in names {
            let Some(m) = self.backends.get(&name).map(|e| Arc::clone(e.value())) else {
                continue;
            };
            let latency = m.latency.snapshot();
            let _ = writeln!(out, "backend_success_total{{backend=\"{name}\"}} {}", m.successes.get());
            let _ = writeln!(out, "backend_failure_total{{backend=\"{name}\"}} {}", m.failures.get());
            let _ = writeln!(out, "backend_rejected_total{{backend=\"{name}\"}} {}", m.rejected.get());
            let _ = writeln!(out, "backend_retries_total{{backend=\"{name}\"}} {}", m.retries.get());
            let _ = writeln!(
                out,
                "backend_latency_p50_ms{{backend=\"{name}\"}} {}",
                latency.percentile(0.5)
            );
            let _ = writeln!(
                out,
                "backend_latency_p99_ms{{backend=\"{name}\"}} {}\n",
                latency.percentile(0.99)
            );
        }

        out
    }
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_percentiles() {
        let hist = Histogram::new(vec![10.0, 100.0, 1000.0]);
        for _ in 0..9 {
            hist.record(Duration::from_millis(5));
        }
        hist.record(Duration::from_millis(500));

        let snap = hist.snapshot();
        assert_eq!(snap.total, 10);
        assert_eq!(snap.percentile(0.5), 10.0);
        assert_eq!(snap.percentile(0.99), 1000.0);
    }

    #[test]
    fn test_overflow_lands_in_last_bucket() {
        let hist = Histogram::new(vec![10.0]);
        hist.record(Duration::from_secs(5));
        assert_eq!(hist.snapshot().counts, vec![1]);
    }

    #[test]
    fn test_backend_metrics_shared() {
        let metrics = DispatchMetrics::new();
        metrics.backend("a").successes.inc();
        metrics.backend("a").successes.inc();
        assert_eq!(metrics.backend("a").successes.get(), 2);
        assert_eq!(metrics.backend("b").successes.get(), 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = DispatchMetrics::new();
        metrics.dispatches.inc();
        metrics.backend("model-a").failures.inc();

        let text = metrics.to_prometheus();
        assert!(text.contains("dispatch_requests_total 1"));
        assert!(text.contains("backend_failure_total{backend=\"model-a\"} 1"));
    }
}
