//! Cache backend implementations.

use super::key::CacheKey;
use crate::{Error, Result};
use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

const RECORD_SUFFIX: &str = "cache";

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

pub(crate) fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn empty_metadata() -> Value {
    Value::Object(Map::new())
}

/// One cached result: opaque payload, creation time (epoch seconds) and
/// domain metadata. Metadata is always an object on disk, `{}` when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub payload: Value,
    pub created_at: f64,
    #[serde(default = "empty_metadata")]
    pub metadata: Value,
}

impl CacheRecord {
    pub fn new(payload: Value, metadata: Value) -> Self {
        let metadata = if metadata.is_null() { empty_metadata() } else { metadata };
        Self { payload, created_at: now_epoch(), metadata }
    }
    pub fn is_expired(&self, ttl: Duration, now: f64) -> bool {
        now - self.created_at > ttl.as_secs_f64()
    }
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>>;
    async fn set(&self, key: &CacheKey, record: &CacheRecord) -> Result<()>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    /// Remove every record older than `ttl` at `now`; returns the number removed.
    async fn purge_expired(&self, ttl: Duration, now: f64) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
    async fn len(&self) -> Result<usize>;
    fn name(&self) -> &'static str;
}

/// Process-local tier, bounded by least-recently-used eviction.
pub struct MemoryCache {
    entries: Mutex<LruCache<String, CacheRecord>>,
}

impl MemoryCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self { entries: Mutex::new(LruCache::new(cap)) }
    }
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, CacheRecord>>> {
        self.entries.lock().map_err(|_| Error::poisoned("memory_cache"))
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>> {
        Ok(self.lock()?.get(&key.hash).cloned())
    }
    async fn set(&self, key: &CacheKey, record: &CacheRecord) -> Result<()> {
        self.lock()?.put(key.hash.clone(), record.clone());
        Ok(())
    }
    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.lock()?.pop(&key.hash).is_some())
    }
    async fn purge_expired(&self, ttl: Duration, now: f64) -> Result<usize> {
        let mut entries = self.lock()?;
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, r)| r.is_expired(ttl, now))
            .map(|(k, _)| k.clone())
            .collect();
        for k in &expired {
            entries.pop(k);
        }
        Ok(expired.len())
    }
    async fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }
    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Durable tier: one JSON file per key, `<digest>.cache`, under `root`.
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    /// Creates `root` if absent. A failure here is logged; writes retry the
    /// directory creation.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if let Err(e) = std::fs::create_dir_all(&root) {
            tracing::error!(root = %root.display(), error = %e, "failed to create cache directory");
        }
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn record_path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(format!("{}.{}", key.hash, RECORD_SUFFIX))
    }

    async fn record_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.root).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().map(|ext| ext == RECORD_SUFFIX).unwrap_or(false) {
                files.push(path);
            }
        }
        Ok(files)
    }

    async fn read_record(path: &Path) -> Result<Option<CacheRecord>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl CacheBackend for FileCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CacheRecord>> {
        Self::read_record(&self.record_path(key)).await
    }
    async fn set(&self, key: &CacheKey, record: &CacheRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let data = serde_json::to_vec(record)?;
        let path = self.record_path(key);
        // write-then-rename so readers never observe a half-written record
        let tmp = path.with_extension(format!("tmp{}", TMP_SEQ.fetch_add(1, Ordering::Relaxed)));
        let written = match tokio::fs::write(&tmp, &data).await {
            Ok(()) => tokio::fs::rename(&tmp, &path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        Self::remove(&self.record_path(key)).await
    }
    async fn purge_expired(&self, ttl: Duration, now: f64) -> Result<usize> {
        let mut removed = 0;
        for path in self.record_files().await? {
            match Self::read_record(&path).await {
                Ok(Some(record)) if record.is_expired(ttl, now) => {
                    if Self::remove(&path).await? {
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "skipping unreadable cache record");
                }
            }
        }
        Ok(removed)
    }
    async fn clear(&self) -> Result<()> {
        for path in self.record_files().await? {
            Self::remove(&path).await?;
        }
        Ok(())
    }
    async fn len(&self) -> Result<usize> {
        Ok(self.record_files().await?.len())
    }
    fn name(&self) -> &'static str {
        "file"
    }
}
