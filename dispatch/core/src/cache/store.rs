//! Durable cache tier
//!
//! [`FileStore`] keeps one file per fingerprint:
//!
//! ```text
//! <crc32 of body, 8 hex digits>\n
//! <body: JSON CacheRecord>
//! ```
//!
//! Writes go to a temporary file that is renamed into place, so a crash never
//! leaves a half-written record under the real name. A file whose checksum or
//! JSON does not verify is treated as a miss and deleted.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::CacheError;

/// Serialized form of a cache entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Request fingerprint
    pub fingerprint: String,
    /// Cached value
    pub value: serde_json::Value,
    /// Creation time, Unix millis
    pub created_at_ms: i64,
    /// Expiry time, Unix millis
    pub expires_at_ms: i64,
}

impl CacheRecord {
    /// Whether the record is expired at `now_ms`
    #[must_use]
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at_ms
    }
}

/// Persistent backing tier for the fingerprint cache
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Fetch a record; corrupt records read as `None`
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheRecord>, CacheError>;

    /// Insert or replace a record
    async fn store(&self, record: &CacheRecord) -> Result<(), CacheError>;

    /// Remove a record, returning whether one existed
    async fn remove(&self, fingerprint: &str) -> Result<bool, CacheError>;

    /// Remove everything, returning how many records were dropped
    async fn clear(&self) -> Result<usize, CacheError>;

    /// Remove records expired at `now_ms`
    async fn purge_expired(&self, now_ms: i64) -> Result<usize, CacheError>;
}

// ============================================================================
// File Store
// ============================================================================

const RECORD_EXTENSION: &str = "json";

/// Directory-backed store
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| CacheError::Io {
                path: dir.clone(),
                source,
            })?;
        Ok(Self { dir })
    }

    /// Directory holding the records
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, fingerprint: &str) -> PathBuf {
        let safe = !fingerprint.is_empty()
            && fingerprint.len() <= 128
            && fingerprint
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        let name = if safe {
            fingerprint.to_string()
        } else {
            hex::encode(Sha256::digest(fingerprint.as_bytes()))
        };
        self.dir.join(format!("{name}.{RECORD_EXTENSION}"))
    }

    fn encode(record: &CacheRecord) -> Result<String, CacheError> {
        let body = serde_json::to_string(record)?;
        Ok(format!("{:08x}\n{body}", crc32fast::hash(body.as_bytes())))
    }

    fn decode(path: &Path, contents: &str) -> Result<CacheRecord, CacheError> {
        let corrupt = |reason: &str| CacheError::Corrupt {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        let (checksum, body) = contents
            .split_once('\n')
            .ok_or_else(|| corrupt("missing checksum line"))?;
        let expected = u32::from_str_radix(checksum.trim(), 16)
            .map_err(|_| corrupt("unreadable checksum"))?;
        if crc32fast::hash(body.as_bytes()) != expected {
            return Err(corrupt("checksum mismatch"));
        }
        serde_json::from_str(body).map_err(|e| corrupt(&e.to_string()))
    }

    async fn read_record(&self, path: &Path) -> Result<Option<CacheRecord>, CacheError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CacheError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let decoded = String::from_utf8(bytes)
            .map_err(|_| CacheError::Corrupt {
                path: path.to_path_buf(),
                reason: "not valid UTF-8".to_string(),
            })
            .and_then(|contents| Self::decode(path, &contents));

        match decoded {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Discarding corrupt cache record");
                let _ = tokio::fs::remove_file(path).await;
                Ok(None)
            }
        }
    }

    async fn record_paths(&self) -> Result<Vec<PathBuf>, CacheError> {
        let io_err = |source| CacheError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(io_err)?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == RECORD_EXTENSION) {
                paths.push(path);
            }
        }
        Ok(paths)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheRecord>, CacheError> {
        let path = self.path_for(fingerprint);
        Ok(self
            .read_record(&path)
            .await?
            .filter(|record| record.fingerprint == fingerprint))
    }

    async fn store(&self, record: &CacheRecord) -> Result<(), CacheError> {
        let path = self.path_for(&record.fingerprint);
        let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
        let contents = Self::encode(record)?;

        let io_err = |source| CacheError::Io {
            path: path.clone(),
            source,
        };
        if let Err(e) = tokio::fs::write(&tmp, contents).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(e));
        }
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<bool, CacheError> {
        let path = self.path_for(fingerprint);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.record_paths().await? {
            if tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<usize, CacheError> {
        let mut removed = 0;
        for path in self.record_paths().await? {
            let expired = match self.read_record(&path).await {
                Ok(Some(record)) => record.is_expired(now_ms),
                // corrupt records were already deleted by read_record
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable cache record");
                    false
                }
            };
            if expired && tokio::fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ============================================================================
// Memory Store
// ============================================================================

/// In-process store for ephemeral dispatchers and tests
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, CacheRecord>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn load(&self, fingerprint: &str) -> Result<Option<CacheRecord>, CacheError> {
        Ok(self.records.get(fingerprint).map(|r| r.value().clone()))
    }

    async fn store(&self, record: &CacheRecord) -> Result<(), CacheError> {
        self.records
            .insert(record.fingerprint.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, fingerprint: &str) -> Result<bool, CacheError> {
        Ok(self.records.remove(fingerprint).is_some())
    }

    async fn clear(&self) -> Result<usize, CacheError> {
        let count = self.records.len();
        self.records.clear();
        Ok(count)
    }

    async fn purge_expired(&self, now_ms: i64) -> Result<usize, CacheError> {
        let before = self.records.len();
        self.records.retain(|_, record| !record.is_expired(now_ms));
        Ok(before.saturating_sub(self.records.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fingerprint: &str, expires_at_ms: i64) -> CacheRecord {
        CacheRecord {
            fingerprint: fingerprint.to_string(),
            value: json!({"content": "OK"}),
            created_at_ms: 1_000,
            expires_at_ms,
        }
    }

    #[tokio::test]
    async fn test_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.store(&record("abc123", 5_000)).await.unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.load("abc123").await.unwrap(), Some(record("abc123", 5_000)));
        assert_eq!(reopened.load("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_store_discards_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.store(&record("abc123", 5_000)).await.unwrap();

        let path = store.path_for("abc123");
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let truncated = &contents[..contents.len() - 5];
        tokio::fs::write(&path, truncated).await.unwrap();

        assert_eq!(store.load("abc123").await.unwrap(), None);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_file_store_discards_non_utf8_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.store(&record("old", 2_000)).await.unwrap();
        let bad = dir.path().join("aaa-bad.json");
        tokio::fs::write(&bad, [0xFF, 0xFE, 0x00]).await.unwrap();

        assert_eq!(store.load("aaa-bad").await.unwrap(), None);
        assert!(!bad.exists());

        tokio::fs::write(&bad, [0xFF, 0xFF, 0xFF]).await.unwrap();
        assert_eq!(store.purge_expired(1_000_000).await.unwrap(), 1);
        assert!(store.load("old").await.unwrap().is_none());
        assert!(!bad.exists());
    }

    #[tokio::test]
    async fn test_file_store_purge_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.store(&record("old", 2_000)).await.unwrap();
        store.store(&record("fresh", 9_000)).await.unwrap();

        assert_eq!(store.purge_expired(5_000).await.unwrap(), 1);
        assert!(store.load("old").await.unwrap().is_none());
        assert!(store.load("fresh").await.unwrap().is_some());

        assert_eq!(store.clear().await.unwrap(), 1);
        assert!(!store.remove("fresh").await.unwrap());
    }

    #[tokio::test]
    async fn test_unsafe_keys_hashed_to_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.store(&record("../escape me", 9_000)).await.unwrap();

        assert!(store.path_for("../escape me").starts_with(dir.path()));
        assert!(store.load("../escape me").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryStore::new();
        store.store(&record("a", 2_000)).await.unwrap();
        store.store(&record("b", 9_000)).await.unwrap();

        assert_eq!(store.purge_expired(5_000).await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.remove("b").await.unwrap());
        assert!(store.is_empty());
    }
}
