//! Two-tier fingerprint cache
//!
//! A bounded in-memory tier sits in front of an optional [`DurableStore`].
//!
//! - `get` checks memory, then the durable tier; durable hits are promoted
//! - `set` writes both tiers; a durable failure is logged and counted, never
//!   surfaced, and never touches the memory tier
//! - expiry is checked when an entry is read; `cleanup` purges both tiers
//! - when the memory tier is full the oldest insertion is evicted

pub mod fingerprint;
pub mod store;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use fingerprint::fingerprint;
pub use store::{CacheRecord, DurableStore, FileStore, MemoryStore};

// ============================================================================
// Errors and Config
// ============================================================================

/// Cache failures
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem error in the durable tier
    #[error("cache I/O error at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Value or payload could not be (de)serialized
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable record failed verification
    #[error("corrupt cache record at {path}: {reason}")]
    Corrupt {
        /// Record file
        path: PathBuf,
        /// What failed
        reason: String,
    },
}

/// Cache sizing and lifetime
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Entries kept in memory
    pub capacity: usize,
    /// TTL used when `set` is given none
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            default_ttl: Duration::from_secs(3600),
        }
    }
}

/// Current time as Unix millis
fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Memory Tier
// ============================================================================

/// An entry in the memory tier
#[derive(Clone, Debug)]
pub struct CacheEntry<V> {
    /// Cached value
    pub value: V,
    /// Creation time, Unix millis
    pub created_at_ms: i64,
    /// Expiry time, Unix millis
    pub expires_at_ms: i64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

struct MemoryTier<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// Insertion order, oldest first
    order: VecDeque<String>,
}

impl<V> MemoryTier<V> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(entry)
    }

    /// Insert as the newest entry; returns how many entries were evicted
    fn insert(&mut self, key: String, entry: CacheEntry<V>, capacity: usize) -> usize {
        self.remove(&key);
        self.entries.insert(key.clone(), entry);
        self.order.push_back(key);

        let mut evicted = 0;
        while self.entries.len() > capacity {
            let Some(oldest) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&oldest);
            evicted += 1;
        }
        evicted
    }
}

// ============================================================================
// Stats
// ============================================================================

/// Cache counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries in the memory tier
    pub entries: usize,
    /// Hits served from memory
    pub memory_hits: u64,
    /// Hits served from the durable tier
    pub durable_hits: u64,
    /// Lookups that found nothing live
    pub misses: u64,
    /// Entries evicted for capacity
    pub evictions: u64,
    /// Durable-tier operations that failed
    pub durable_errors: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    durable_errors: AtomicU64,
}

// ============================================================================
// Fingerprint Cache
// ============================================================================

/// Expiring cache keyed by request fingerprint
pub struct FingerprintCache<V> {
    config: CacheConfig,
    memory: Mutex<MemoryTier<V>>,
    durable: Option<Arc<dyn DurableStore>>,
    counters: Counters,
}

impl<V> FingerprintCache<V>
where
    V: Serialize + DeserializeOwned + Clone + Send + Sync,
{
    /// Memory-only cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            memory: Mutex::new(MemoryTier::new()),
            durable: None,
            counters: Counters::default(),
        }
    }

    /// Cache backed by a durable tier
    pub fn with_store(config: CacheConfig, store: Arc<dyn DurableStore>) -> Self {
        Self {
            durable: Some(store),
            ..Self::new(config)
        }
    }

    /// Sizing in use
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn durable_failed(&self, op: &str, key: &str, error: &CacheError) {
        self.counters.durable_errors.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(op, fingerprint = key, error = %error, "Durable cache tier failed");
    }

    fn promote(&self, key: &str, entry: CacheEntry<V>) {
        let evicted = self
            .memory
            .lock()
            .insert(key.to_string(), entry, self.config.capacity);
        self.counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
    }

    /// Look up a live entry in memory; expired entries are dropped on sight.
    /// `Err(())` means the key was present but expired.
    fn memory_lookup(&self, key: &str) -> Result<Option<V>, ()> {
        let now = now_ms();
        let mut memory = self.memory.lock();
        match memory.entries.get(key) {
            None => return Ok(None),
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        memory.remove(key);
        Err(())
    }

    async fn durable_lookup(&self, key: &str) -> Option<CacheEntry<V>> {
        let store = self.durable.as_ref()?;
        let record = match store.load(key).await {
            Ok(Some(record)) => record,
            Ok(None) => return None,
            Err(e) => {
                self.durable_failed("load", key, &e);
                return None;
            }
        };

        if record.is_expired(now_ms()) {
            if let Err(e) = store.remove(key).await {
                self.durable_failed("remove", key, &e);
            }
            return None;
        }

        match serde_json::from_value(record.value) {
            Ok(value) => Some(CacheEntry {
                value,
                created_at_ms: record.created_at_ms,
                expires_at_ms: record.expires_at_ms,
            }),
            Err(e) => {
                self.durable_failed("decode", key, &CacheError::from(e));
                None
            }
        }
    }

    /// Fetch a live value
    pub async fn get(&self, key: &str) -> Option<V> {
        match self.memory_lookup(key) {
            Ok(Some(value)) => {
                self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            Ok(None) => {}
            Err(()) => {
                // the durable copy shares the same expiry
                if let Some(store) = &self.durable {
                    if let Err(e) = store.remove(key).await {
                        self.durable_failed("remove", key, &e);
                    }
                }
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        }

        match self.durable_lookup(key).await {
            Some(entry) => {
                let value = entry.value.clone();
                self.promote(key, entry);
                self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(fingerprint = key, "Promoted durable cache hit");
                Some(value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store `value` under `key` for `ttl` (or the default TTL)
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let created_at_ms = now_ms();
        let expires_at_ms =
            created_at_ms.saturating_add(i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX));

        let record_value = self
            .durable
            .as_ref()
            .map(|_| serde_json::to_value(&value));

        self.promote(
            key,
            CacheEntry {
                value,
                created_at_ms,
                expires_at_ms,
            },
        );

        let (Some(store), Some(record_value)) = (&self.durable, record_value) else {
            return;
        };
        let result = match record_value {
            Ok(value) => {
                store
                    .store(&CacheRecord {
                        fingerprint: key.to_string(),
                        value,
                        created_at_ms,
                        expires_at_ms,
                    })
                    .await
            }
            Err(e) => Err(CacheError::from(e)),
        };
        if let Err(e) = result {
            self.durable_failed("store", key, &e);
        }
    }

    /// Whether a live entry exists (does not count as a hit)
    pub async fn has(&self, key: &str) -> bool {
        match self.memory_lookup(key) {
            Ok(Some(_)) => true,
            Err(()) => false,
            Ok(None) => self.durable_lookup(key).await.is_some(),
        }
    }

    /// Remove `key` from both tiers
    pub async fn delete(&self, key: &str) -> bool {
        let in_memory = self.memory.lock().remove(key).is_some();
        let in_durable = match &self.durable {
            Some(store) => store.remove(key).await.unwrap_or_else(|e| {
                self.durable_failed("remove", key, &e);
                false
            }),
            None => false,
        };
        in_memory || in_durable
    }

    /// Empty both tiers
    pub async fn clear(&self) {
        {
            let mut memory = self.memory.lock();
            memory.entries.clear();
            memory.order.clear();
        }
        if let Some(store) = &self.durable {
            if let Err(e) = store.clear().await {
                self.durable_failed("clear", "*", &e);
            }
        }
    }

    /// Purge expired entries from both tiers, returning how many were removed
    pub async fn cleanup(&self) -> usize {
        let now = now_ms();
        let from_memory = {
            let mut memory = self.memory.lock();
            let expired: Vec<String> = memory
                .entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &expired {
                memory.remove(key);
            }
            expired.len()
        };

        let from_durable = match &self.durable {
            Some(store) => store.purge_expired(now).await.unwrap_or_else(|e| {
                self.durable_failed("purge", "*", &e);
                0
            }),
            None => 0,
        };

        tracing::debug!(from_memory, from_durable, "Cache cleanup");
        from_memory + from_durable
    }

    /// Entries in the memory tier
    pub fn len(&self) -> usize {
        self.memory.lock().entries.len()
    }

    /// Whether the memory tier is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counters snapshot
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            durable_errors: self.counters.durable_errors.load(Ordering::Relaxed),
        }
    }
}

impl<V> std::fmt::Debug for FingerprintCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FingerprintCache")
            .field("config", &self.config)
            .field("durable", &self.durable.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn memory_only(capacity: usize) -> FingerprintCache<String> {
        FingerprintCache::new(CacheConfig {
            capacity,
            ..CacheConfig::default()
        })
    }

    /// Durable tier whose writes always fail
    struct BrokenStore;

    #[async_trait]
    impl DurableStore for BrokenStore {
        async fn load(&self, _: &str) -> Result<Option<CacheRecord>, CacheError> {
            Ok(None)
        }
        async fn store(&self, record: &CacheRecord) -> Result<(), CacheError> {
            Err(CacheError::Corrupt {
                path: PathBuf::from(&record.fingerprint),
                reason: "disk full".into(),
            })
        }
        async fn remove(&self, _: &str) -> Result<bool, CacheError> {
            Ok(false)
        }
        async fn clear(&self) -> Result<usize, CacheError> {
            Ok(0)
        }
        async fn purge_expired(&self, _: i64) -> Result<usize, CacheError> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let cache = memory_only(10);
        cache.set("k", "v".to_string(), None).await;

        assert_eq!(cache.get("k").await, Some("v".to_string()));
        assert!(cache.has("k").await);
        assert_eq!(cache.stats().memory_hits, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_never_returned() {
        let cache = memory_only(10);
        cache.set("k", "v".to_string(), Some(Duration::from_millis(30))).await;
        assert!(cache.has("k").await);

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(cache.get("k").await, None);
        assert!(!cache.has("k").await);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_immediately_expired() {
        let cache = memory_only(10);
        cache.set("k", "v".to_string(), Some(Duration::ZERO)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_evicts_oldest_insertion() {
        let cache = memory_only(2);
        cache.set("a", "1".to_string(), None).await;
        cache.set("b", "2".to_string(), None).await;
        // reading does not refresh insertion order
        assert!(cache.get("a").await.is_some());
        cache.set("c", "3".to_string(), None).await;

        assert_eq!(cache.get("a").await, None);
        assert!(cache.get("b").await.is_some());
        assert!(cache.get("c").await.is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_durable_hit_promoted() {
        let store = Arc::new(MemoryStore::new());
        let first: FingerprintCache<String> =
            FingerprintCache::with_store(CacheConfig::default(), store.clone());
        first.set("k", "persisted".to_string(), None).await;

        // a new cache over the same store simulates a restart
        let second: FingerprintCache<String> =
            FingerprintCache::with_store(CacheConfig::default(), store);
        assert!(second.is_empty());
        assert_eq!(second.get("k").await, Some("persisted".to_string()));
        assert_eq!(second.len(), 1);
        assert_eq!(second.stats().durable_hits, 1);
    }

    #[tokio::test]
    async fn test_expired_durable_record_never_promoted() {
        let store = Arc::new(MemoryStore::new());
        let past = now_ms() - 1_000;
        store
            .store(&CacheRecord {
                fingerprint: "k".to_string(),
                value: serde_json::json!("stale"),
                created_at_ms: past - 60_000,
                expires_at_ms: past,
            })
            .await
            .unwrap();
        let cache: FingerprintCache<String> =
            FingerprintCache::with_store(CacheConfig::default(), store.clone());

        assert!(!cache.has("k").await);
        assert_eq!(cache.get("k").await, None);
        assert!(cache.is_empty());
        assert!(store.is_empty());
        assert_eq!(cache.stats().durable_hits, 0);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_durable_failure_keeps_memory_tier() {
        let cache: FingerprintCache<String> =
            FingerprintCache::with_store(CacheConfig::default(), Arc::new(BrokenStore));
        cache.set("k", "v".to_string(), None).await;

        assert_eq!(cache.get("k").await, Some("v".to_string()));
        assert_eq!(cache.stats().durable_errors, 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let store = Arc::new(MemoryStore::new());
        let cache: FingerprintCache<String> =
            FingerprintCache::with_store(CacheConfig::default(), store.clone());
        cache.set("a", "1".to_string(), None).await;
        cache.set("b", "2".to_string(), None).await;

        assert!(cache.delete("a").await);
        assert!(!cache.delete("a").await);
        assert!(!cache.has("a").await);

        cache.clear().await;
        assert!(cache.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_cleanup_purges_both_tiers() {
        let store = Arc::new(MemoryStore::new());
        let cache: FingerprintCache<String> =
            FingerprintCache::with_store(CacheConfig::default(), store.clone());
        cache.set("short", "1".to_string(), Some(Duration::from_millis(10))).await;
        cache.set("long", "2".to_string(), None).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(cache.cleanup().await, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
