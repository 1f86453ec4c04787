//! Retry with capped exponential backoff
//!
//! The delay before retry `n` (zero-based) is
//! `min(initial_delay * backoff_multiplier^n, max_delay)`. An operation is
//! invoked at most `max_retries + 1` times.

use std::future::Future;
use std::time::Duration;

/// Backoff parameters
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Growth factor between retries
    pub backoff_multiplier: f64,
    /// Add up to 10% random jitter (never past `max_delay`)
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry `attempt` (0-indexed)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(max_ms);

        let delay_ms = if self.jitter {
            let jitter = rand::random::<f64>() * 0.1;
            (capped * (1.0 + jitter)).min(max_ms)
        } else {
            capped
        };

        Duration::from_millis(delay_ms as u64)
    }

    /// Sum of every delay the policy can impose, ignoring jitter
    #[must_use]
    pub fn total_backoff(&self) -> Duration {
        (0..self.max_retries)
            .map(|attempt| {
                Self {
                    jitter: false,
                    ..self.clone()
                }
                .delay_for_attempt(attempt)
            })
            .sum()
    }
}

/// Details passed to the retry observer before each sleep
#[derive(Debug)]
pub struct RetryNotice<'e, E> {
    /// One-based retry number
    pub attempt: u32,
    /// How long the executor will wait
    pub delay: Duration,
    /// Error that triggered the retry
    pub error: &'e E,
}

type Predicate<'a, E> = Box<dyn Fn(&E) -> bool + Send + Sync + 'a>;
type Observer<'a, E> = Box<dyn Fn(&RetryNotice<'_, E>) + Send + Sync + 'a>;

/// Retry executor
///
/// ```ignore
/// let value = Retry::new(&policy)
///     .retry_if(BackendError::is_retryable)
///     .on_retry(|notice| tracing::warn!(attempt = notice.attempt, "retrying"))
///     .run(|| backend.invoke(&payload))
///     .await?;
/// ```
pub struct Retry<'a, E> {
    policy: &'a RetryPolicy,
    retryable: Option<Predicate<'a, E>>,
    on_retry: Option<Observer<'a, E>>,
}

impl<'a, E> Retry<'a, E> {
    /// Executor for `policy`; every error is retried
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            retryable: None,
            on_retry: None,
        }
    }

    /// Only retry errors matching `predicate`; others fail immediately
    #[must_use]
    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'a) -> Self {
        self.retryable = Some(Box::new(predicate));
        self
    }

    /// Observe each retry before the backoff sleep
    #[must_use]
    pub fn on_retry(mut self, observer: impl Fn(&RetryNotice<'_, E>) + Send + Sync + 'a) -> Self {
        self.on_retry = Some(Box::new(observer));
        self
    }

    /// Run `operation` until it succeeds, fails fast, or retries run out
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;

        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if let Some(retryable) = &self.retryable {
                if !retryable(&error) {
                    return Err(error);
                }
            }

            if attempt >= self.policy.max_retries {
                return Err(error);
            }

            let delay = self.policy.delay_for_attempt(attempt);
            attempt += 1;

            if let Some(observer) = &self.on_retry {
                observer(&RetryNotice {
                    attempt,
                    delay,
                    error: &error,
                });
            }
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying after failure"
            );

            tokio::time::sleep(delay).await;
        }
    }
}

/// Run `operation` under `policy`, retrying every error
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    Retry::new(policy).run(operation).await
}
