//! Dispatch CLI - run prompts through the resilient dispatch layer
//!
//! Loads the dispatch configuration, builds one HTTP backend per
//! `[[backends]]` entry and sends a single prompt through the cache, queue
//! and router.
//!
//! # Usage
//!
//! ```bash
//! # Ask the configured pool
//! dispatch run "Summarise this paragraph"
//!
//! # Code task, high priority, bypassing the cache
//! dispatch run --kind code --priority 10 --no-cache "Write a bubble sort"
//!
//! # Show the effective configuration
//! dispatch --config ./dispatch.toml status
//!
//! # Drop expired cache records / drop all of them
//! dispatch cache-clean
//! dispatch cache-clear
//!
//! # Verbose logging
//! RUST_LOG=dispatch_core=debug dispatch run "hello"
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dispatch_core::{
    load_config_from_path, BackendEntry, ChatRequest, ChatResponse, ConfigOverrides, Dispatched,
    DispatchConfig, Dispatcher, ExecuteOptions, FileStore, FingerprintCache, HttpBackend,
};
use tracing::{info, warn};

/// Resilient dispatch for AI model backends
#[derive(Parser, Debug)]
#[command(name = "dispatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long, env = "DISPATCH_CONFIG", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a prompt through the dispatcher
    Run {
        /// Prompt text
        prompt: String,

        /// Task kind used for capability routing and cache keys
        #[arg(short = 'k', long, default_value = "chat")]
        kind: String,

        /// System prompt prepended to the conversation
        #[arg(short = 's', long)]
        system: Option<String>,

        /// Queue priority (higher runs first)
        #[arg(short = 'p', long, default_value_t = 0, allow_negative_numbers = true)]
        priority: i32,

        /// Per-request timeout in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,

        /// Skip the cache for this request
        #[arg(long)]
        no_cache: bool,

        /// Override the concurrency ceiling
        #[arg(long, value_name = "N")]
        max_concurrent: Option<usize>,

        /// Override the retry count
        #[arg(long, value_name = "N")]
        max_retries: Option<u32>,

        /// Override the durable cache directory
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },

    /// Show the effective configuration and backends
    Status,

    /// Remove expired cache records
    CacheClean,

    /// Remove every cache record
    CacheClear,
}

/// Initialize logging
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("dispatch={level},dispatch_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load, override and validate the configuration
fn resolve_config(path: Option<PathBuf>, overrides: &ConfigOverrides) -> Result<DispatchConfig> {
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Build the dispatcher: one HTTP backend per entry, premium held back
async fn build_dispatcher(config: &DispatchConfig) -> Result<Dispatcher<ChatRequest, ChatResponse>> {
    let premium_name = config.router.premium.as_deref();
    let mut builder = Dispatcher::builder().config(config);

    for spec in &config.backends {
        let backend = HttpBackend::from_spec(spec)
            .with_context(|| format!("Failed to create backend '{}'", spec.name))?;

        if Some(spec.name.as_str()) == premium_name {
            builder = builder.premium(Arc::new(backend), config.router.premium_policy);
        } else {
            builder = builder
                .backend(BackendEntry::new(Arc::new(backend)).with_capabilities(&spec.capabilities));
        }
    }

    if let Some(dir) = &config.cache_dir {
        let store = FileStore::open(dir)
            .await
            .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;
        builder = builder.durable_store(Arc::new(store));
    }

    Ok(builder.build())
}

/// Open the durable cache on its own, for maintenance commands
async fn open_cache(config: &DispatchConfig) -> Result<FingerprintCache<Dispatched<ChatResponse>>> {
    let dir = config
        .cache_dir
        .as_ref()
        .context("Durable cache is disabled (no cache directory configured)")?;
    let store = FileStore::open(dir)
        .await
        .with_context(|| format!("Failed to open cache directory {}", dir.display()))?;
    Ok(FingerprintCache::with_store(config.cache.clone(), Arc::new(store)))
}

fn print_status(config: &DispatchConfig) {
    println!("Configuration: {}", config.source());
    if let Some(path) = &config.config_file_path {
        println!("  file: {}", path.display());
    }
    println!();
    println!("Queue:");
    println!("  max_concurrent:   {}", config.queue.max_concurrent);
    println!("  default_timeout:  {:?}", config.queue.default_timeout);
    println!("  max_queue_depth:  {}", config.queue.max_queue_depth);
    println!("Retry:");
    println!("  max_retries:      {}", config.retry.max_retries);
    println!("  initial_delay:    {:?}", config.retry.initial_delay);
    println!("  max_delay:        {:?}", config.retry.max_delay);
    println!("  multiplier:       {}", config.retry.backoff_multiplier);
    println!("Circuit breaker:");
    println!("  failure_threshold: {}", config.breaker.failure_threshold);
    println!("  reset_timeout:     {:?}", config.breaker.reset_timeout);
    println!("  half_open_calls:   {}", config.breaker.half_open_max_calls);
    println!("Cache:");
    println!("  capacity:         {}", config.cache.capacity);
    println!("  default_ttl:      {:?}", config.cache.default_ttl);
    match &config.cache_dir {
        Some(dir) => println!("  durable dir:      {}", dir.display()),
        None => println!("  durable dir:      (disabled)"),
    }
    println!();

    if config.backends.is_empty() {
        println!("Backends: none configured");
        return;
    }
    println!("Backends (fallback order):");
    for spec in &config.backends {
        let mut tags = Vec::new();
        if config.router.premium.as_deref() == Some(spec.name.as_str()) {
            tags.push("premium".to_string());
        }
        if config.router.deny_list.contains(&spec.name) {
            tags.push("denied".to_string());
        }
        if let Some(var) = &spec.api_key_env {
            if std::env::var_os(var).is_none() {
                tags.push(format!("{var} unset"));
            }
        }
        let caps = if spec.capabilities.is_empty() {
            "-".to_string()
        } else {
            spec.capabilities.join(",")
        };
        let tags = if tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", tags.join(", "))
        };
        println!("  {:<16} {:<32} caps={caps}{tags}", spec.name, spec.model);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Run {
            prompt,
            kind,
            system,
            priority,
            timeout_ms,
            no_cache,
            max_concurrent,
            max_retries,
            cache_dir,
        } => {
            let mut overrides = ConfigOverrides::new();
            if let Some(n) = max_concurrent {
                overrides = overrides.with_max_concurrent(n);
            }
            if let Some(n) = max_retries {
                overrides = overrides.with_max_retries(n);
            }
            if let Some(dir) = cache_dir {
                overrides = overrides.with_cache_dir(dir);
            }
            let config = resolve_config(cli.config, &overrides)?;
            if config.backends.is_empty() {
                anyhow::bail!("No backends configured. Add [[backends]] entries to the config file.");
            }

            let dispatcher = build_dispatcher(&config).await?;

            let mut request = ChatRequest::new(prompt);
            if let Some(system) = system {
                request = request.with_system(system);
            }
            let mut options = ExecuteOptions::default().with_priority(priority);
            if let Some(ms) = timeout_ms {
                options = options.with_timeout(Duration::from_millis(ms));
            }
            if no_cache {
                options = options.uncached();
            }

            let outcome = dispatcher.execute(&kind, request, options).await;
            dispatcher.shutdown();

            match outcome {
                Ok(outcome) => {
                    info!(
                        request_id = %outcome.request_id,
                        backend = %outcome.backend_used,
                        from_cache = outcome.from_cache,
                        "Request completed"
                    );
                    println!("{}", serde_json::to_string_pretty(&outcome)?);
                }
                Err(e) => {
                    warn!(error = %e, kind = ?e.kind(), "Request failed");
                    eprintln!("{}", e.user_message());
                    std::process::exit(1);
                }
            }
        }

        Command::Status => {
            let config = resolve_config(cli.config, &ConfigOverrides::new())?;
            print_status(&config);
        }

        Command::CacheClean => {
            let config = resolve_config(cli.config, &ConfigOverrides::new())?;
            let cache = open_cache(&config).await?;
            let removed = cache.cleanup().await;
            println!("Removed {removed} expired cache records");
        }

        Command::CacheClear => {
            let config = resolve_config(cli.config, &ConfigOverrides::new())?;
            let cache = open_cache(&config).await?;
            cache.clear().await;
            println!("Cache cleared");
        }
    }

    Ok(())
}
