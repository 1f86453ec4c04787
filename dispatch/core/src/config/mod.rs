//! TOML Configuration File Support
//!
//! Configuration is read once, when a dispatcher is built, from
//! `$XDG_CONFIG_HOME/llm-dispatch/config.toml`
//! (typically `~/.config/llm-dispatch/config.toml`).
//!
//! # Configuration Priority
//!
//! Values are applied with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables (`DISPATCH_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [queue]
//! max_concurrent = 3
//! timeout_ms = 30000
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! backoff_multiplier = 2.0
//!
//! [breaker]
//! failure_threshold = 5
//! reset_timeout_ms = 60000
//! half_open_max_calls = 3
//!
//! [cache]
//! capacity = 100
//! ttl_secs = 3600
//!
//! [router]
//! deny = ["experimental"]
//! premium = "big-model"
//!
//! [[backends]]
//! name = "local"
//! model = "llama3.2"
//! base_url = "http://localhost:11434/v1"
//! capabilities = ["chat"]
//!
//! [[backends]]
//! name = "big-model"
//! model = "gpt-4o"
//! base_url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::queue::QueueConfig;
use crate::resilience::{BreakerConfig, RetryPolicy};
use crate::routing::PremiumPolicy;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Queue section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueToml {
    /// Tasks executing at once
    pub max_concurrent: Option<usize>,
    /// Default per-task timeout in milliseconds
    pub timeout_ms: Option<u64>,
    /// Pending tasks accepted before back-pressure
    pub max_queue_depth: Option<usize>,
    /// Abort executing operations whose timer fires
    pub abort_on_timeout: Option<bool>,
}

/// Retry section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryToml {
    /// Retries after the first attempt
    pub max_retries: Option<u32>,
    /// Delay before the first retry in milliseconds
    pub initial_delay_ms: Option<u64>,
    /// Cap on any single delay in milliseconds
    pub max_delay_ms: Option<u64>,
    /// Growth factor between retries
    pub backoff_multiplier: Option<f64>,
    /// Add up to 10% jitter
    pub jitter: Option<bool>,
}

/// Circuit breaker section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerToml {
    /// Consecutive failures before opening
    pub failure_threshold: Option<u32>,
    /// Open duration in milliseconds
    pub reset_timeout_ms: Option<u64>,
    /// Trial calls while half-open
    pub half_open_max_calls: Option<u32>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Entries kept in memory
    pub capacity: Option<usize>,
    /// Default TTL in seconds
    pub ttl_secs: Option<u64>,
    /// Durable tier directory
    pub dir: Option<PathBuf>,
    /// Whether the durable tier is used at all
    pub persist: Option<bool>,
}

/// Router section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterToml {
    /// Backends that are never called
    pub deny: Option<Vec<String>>,
    /// Name of the last-resort backend (must appear in `[[backends]]`)
    pub premium: Option<String>,
    /// Retry the premium backend
    pub premium_retry: Option<bool>,
    /// Guard the premium backend with a circuit breaker
    pub premium_circuit_break: Option<bool>,
}

/// One `[[backends]]` entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSpec {
    /// Unique backend name
    pub name: String,
    /// Model identifier sent upstream
    pub model: String,
    /// OpenAI-compatible base URL
    pub base_url: String,
    /// Environment variable holding the API key
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Task kinds this backend declares
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Per-request HTTP timeout in seconds
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchToml {
    /// Queue section
    pub queue: QueueToml,
    /// Retry section
    pub retry: RetryToml,
    /// Circuit breaker section
    pub breaker: BreakerToml,
    /// Cache section
    pub cache: CacheToml,
    /// Router section
    pub router: RouterToml,
    /// Backend pool, in declaration order
    pub backends: Vec<BackendSpec>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Router settings resolved from configuration
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterSettings {
    /// Backends that are never called
    pub deny_list: Vec<String>,
    /// Backend used as the last resort, removed from the regular pool
    pub premium: Option<String>,
    /// How the premium backend is called
    pub premium_policy: PremiumPolicy,
}

/// Effective configuration for a dispatcher
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    /// Queue limits
    pub queue: QueueConfig,
    /// Retry policy for pool backends
    pub retry: RetryPolicy,
    /// Circuit breaker thresholds
    pub breaker: BreakerConfig,
    /// Memory tier sizing and default TTL
    pub cache: CacheConfig,
    /// Durable tier directory; `None` keeps the cache in memory only
    pub cache_dir: Option<PathBuf>,
    /// Router settings
    pub router: RouterSettings,
    /// Backend pool
    pub backends: Vec<BackendSpec>,
    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,
    source: ConfigSource,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue: QueueConfig::default(),
            retry: RetryPolicy::default(),
            breaker: BreakerConfig::default(),
            cache: CacheConfig::default(),
            cache_dir: default_cache_dir(),
            router: RouterSettings::default(),
            backends: Vec::new(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl DispatchConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Reject values the dispatch layer cannot run with
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.queue.max_concurrent == 0 {
            return invalid("queue.max_concurrent must be at least 1".into());
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return invalid(format!(
                "retry.backoff_multiplier must be >= 1.0, got {}",
                self.retry.backoff_multiplier
            ));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return invalid("retry.max_delay_ms must not be below retry.initial_delay_ms".into());
        }
        if self.breaker.failure_threshold == 0 {
            return invalid("breaker.failure_threshold must be at least 1".into());
        }
        if self.breaker.half_open_max_calls == 0 {
            return invalid("breaker.half_open_max_calls must be at least 1".into());
        }
        if self.cache.capacity == 0 {
            return invalid("cache.capacity must be at least 1".into());
        }

        let mut names = HashSet::new();
        for backend in &self.backends {
            if backend.name.trim().is_empty() {
                return invalid("backend names must not be empty".into());
            }
            if !names.insert(backend.name.as_str()) {
                return invalid(format!("duplicate backend name '{}'", backend.name));
            }
        }
        if let Some(premium) = &self.router.premium {
            if !names.contains(premium.as_str()) {
                return invalid(format!(
                    "router.premium names unknown backend '{premium}'"
                ));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/llm-dispatch/config.toml` or
/// `~/.config/llm-dispatch/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("llm-dispatch").join("config.toml"))
}

/// Default durable cache directory (`~/.cache/llm-dispatch`)
#[must_use]
pub fn default_cache_dir() -> Option<PathBuf> {
    dirs::cache_dir().map(|p| p.join("llm-dispatch"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed.
/// A missing config file is not an error (defaults are used).
pub fn load_config() -> Result<DispatchConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<DispatchConfig, ConfigError> {
    let mut config = DispatchConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: DispatchToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                backends = config.backends.len(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_overrides(&mut config);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut DispatchConfig, toml: DispatchToml) {
    // Queue settings
    if let Some(n) = toml.queue.max_concurrent {
        config.queue.max_concurrent = n;
    }
    if let Some(ms) = toml.queue.timeout_ms {
        config.queue.default_timeout = Duration::from_millis(ms);
    }
    if let Some(depth) = toml.queue.max_queue_depth {
        config.queue.max_queue_depth = depth;
    }
    if let Some(abort) = toml.queue.abort_on_timeout {
        config.queue.abort_on_timeout = abort;
    }

    // Retry settings
    if let Some(n) = toml.retry.max_retries {
        config.retry.max_retries = n;
    }
    if let Some(ms) = toml.retry.initial_delay_ms {
        config.retry.initial_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = toml.retry.max_delay_ms {
        config.retry.max_delay = Duration::from_millis(ms);
    }
    if let Some(multiplier) = toml.retry.backoff_multiplier {
        config.retry.backoff_multiplier = multiplier;
    }
    if let Some(jitter) = toml.retry.jitter {
        config.retry.jitter = jitter;
    }

    // Breaker settings
    if let Some(n) = toml.breaker.failure_threshold {
        config.breaker.failure_threshold = n;
    }
    if let Some(ms) = toml.breaker.reset_timeout_ms {
        config.breaker.reset_timeout = Duration::from_millis(ms);
    }
    if let Some(n) = toml.breaker.half_open_max_calls {
        config.breaker.half_open_max_calls = n;
    }

    // Cache settings
    if let Some(capacity) = toml.cache.capacity {
        config.cache.capacity = capacity;
    }
    if let Some(secs) = toml.cache.ttl_secs {
        config.cache.default_ttl = Duration::from_secs(secs);
    }
    if let Some(dir) = toml.cache.dir {
        config.cache_dir = Some(dir);
    }
    if toml.cache.persist == Some(false) {
        config.cache_dir = None;
    }

    // Router settings
    if let Some(deny) = toml.router.deny {
        config.router.deny_list = deny;
    }
    if toml.router.premium.is_some() {
        config.router.premium = toml.router.premium;
    }
    if let Some(retry) = toml.router.premium_retry {
        config.router.premium_policy.retry = retry;
    }
    if let Some(circuit_break) = toml.router.premium_circuit_break {
        config.router.premium_policy.circuit_break = circuit_break;
    }

    if !toml.backends.is_empty() {
        config.backends = toml.backends;
    }
}

/// Apply `DISPATCH_*` environment variable overrides
pub fn apply_env_overrides(config: &mut DispatchConfig) {
    apply_env_from(config, |key| std::env::var(key).ok());
}

/// Apply overrides read through `lookup`
fn apply_env_from(config: &mut DispatchConfig, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(
        lookup: &impl Fn(&str) -> Option<String>,
        key: &str,
    ) -> Option<T> {
        let raw = lookup(key)?;
        match raw.trim().parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(key, value = %raw, "Ignoring unparseable environment override");
                None
            }
        }
    }

    let mut touched = false;

    if let Some(n) = parsed(&lookup, "DISPATCH_MAX_CONCURRENT") {
        config.queue.max_concurrent = n;
        touched = true;
    }
    if let Some(ms) = parsed(&lookup, "DISPATCH_TIMEOUT_MS") {
        config.queue.default_timeout = Duration::from_millis(ms);
        touched = true;
    }
    if let Some(n) = parsed(&lookup, "DISPATCH_MAX_RETRIES") {
        config.retry.max_retries = n;
        touched = true;
    }
    if let Some(n) = parsed(&lookup, "DISPATCH_FAILURE_THRESHOLD") {
        config.breaker.failure_threshold = n;
        touched = true;
    }
    if let Some(dir) = lookup("DISPATCH_CACHE_DIR") {
        config.cache_dir = if dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(dir))
        };
        touched = true;
    }
    if let Some(secs) = parsed(&lookup, "DISPATCH_CACHE_TTL_SECS") {
        config.cache.default_ttl = Duration::from_secs(secs);
        touched = true;
    }
    if let Some(capacity) = parsed(&lookup, "DISPATCH_CACHE_CAPACITY") {
        config.cache.capacity = capacity;
        touched = true;
    }

    if touched {
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Concurrency ceiling override
    pub max_concurrent: Option<usize>,
    /// Default timeout override (milliseconds)
    pub timeout_ms: Option<u64>,
    /// Retry count override
    pub max_retries: Option<u32>,
    /// Durable cache directory override
    pub cache_dir: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set concurrency ceiling override
    #[must_use]
    pub fn with_max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = Some(n);
        self
    }

    /// Set default timeout override
    #[must_use]
    pub fn with_timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = Some(ms);
        self
    }

    /// Set retry count override
    #[must_use]
    pub fn with_max_retries(mut self, n: u32) -> Self {
        self.max_retries = Some(n);
        self
    }

    /// Set durable cache directory override
    #[must_use]
    pub fn with_cache_dir(mut self, dir: PathBuf) -> Self {
        self.cache_dir = Some(dir);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut DispatchConfig) {
        if self.max_concurrent.is_some()
            || self.timeout_ms.is_some()
            || self.max_retries.is_some()
            || self.cache_dir.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(n) = self.max_concurrent {
            config.queue.max_concurrent = n;
        }
        if let Some(ms) = self.timeout_ms {
            config.queue.default_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = self.max_retries {
            config.retry.max_retries = n;
        }
        if let Some(ref dir) = self.cache_dir {
            config.cache_dir = Some(dir.clone());
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
