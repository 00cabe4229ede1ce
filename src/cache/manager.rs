//! Two-tier cache manager.

use super::backend::{now_epoch, CacheBackend, CacheRecord, FileCache, MemoryCache};
use super::key::{CacheKey, CacheKeyGenerator, RegulationQuery};
use crate::Error;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Durable tier location; created if absent.
    pub root: PathBuf,
    #[serde(rename = "ttl_seconds", with = "crate::config::duration_secs")]
    pub ttl: Duration,
    pub enabled: bool,
    pub max_memory_entries: usize,
    /// Payloads whose serialized form exceeds this many bytes are not cached.
    pub max_entry_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("data/cache"),
            ttl: Duration::from_secs(3600),
            enabled: true,
            max_memory_entries: 10_000,
            max_entry_size: 10 * 1024 * 1024,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_memory_entries(mut self, max: usize) -> Self {
        self.max_memory_entries = max;
        self
    }

    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub memory_entry_count: usize,
    pub durable_entry_count: usize,
    pub ttl_seconds: f64,
    pub root: PathBuf,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Entries removed by one [`CacheManager::sweep`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub memory_removed: usize,
    pub durable_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.memory_removed + self.durable_removed
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    errors: AtomicU64,
}

/// In-process tier in front of a durable tier, sharing one TTL.
///
/// Backend failures never reach the caller: a failed read is a miss and a
/// failed write is dropped. Both are logged and counted in [`CacheStats::errors`].
pub struct CacheManager {
    config: CacheConfig,
    memory: Box<dyn CacheBackend>,
    durable: Box<dyn CacheBackend>,
    keys: CacheKeyGenerator,
    counters: Counters,
}

impl CacheManager {
    pub fn new(config: CacheConfig) -> Self {
        let memory = Box::new(MemoryCache::new(config.max_memory_entries));
        let durable = Box::new(FileCache::new(config.root.clone()));
        tracing::info!(
            root = %config.root.display(),
            ttl_secs = config.ttl.as_secs_f64(),
            "cache initialized"
        );
        Self::with_backends(config, memory, durable)
    }

    pub fn with_backends(
        config: CacheConfig,
        memory: Box<dyn CacheBackend>,
        durable: Box<dyn CacheBackend>,
    ) -> Self {
        Self {
            config,
            memory,
            durable,
            keys: CacheKeyGenerator::new(),
            counters: Counters::default(),
        }
    }

    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    pub fn key_generator(&self) -> &CacheKeyGenerator {
        &self.keys
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn ttl(&self) -> Duration {
        self.config.ttl
    }

    fn backend_error(&self, tier: &'static str, op: &'static str, key: &CacheKey, e: &Error) {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        tracing::error!(tier, op, key = %key, error = %e, "cache backend error");
    }

    fn miss<T>(&self, key: &CacheKey) -> Option<T> {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(key = %key, namespace = ?key.namespace, "cache miss");
        None
    }

    /// Fetch the raw record. Durable hits are promoted into memory; an expired
    /// entry found in either tier is removed from both.
    pub async fn get_record(&self, key: &CacheKey) -> Option<CacheRecord> {
        if !self.config.enabled {
            return None;
        }
        let now = now_epoch();
        let ttl = self.config.ttl;

        match self.memory.get(key).await {
            Ok(Some(record)) if !record.is_expired(ttl, now) => {
                tracing::debug!(key = %key, tier = "memory", "cache hit");
                return Some(record);
            }
            Ok(Some(_)) => {
                self.evict(key).await;
                tracing::debug!(key = %key, "expired entry removed");
                return None;
            }
            Ok(None) => {}
            Err(e) => self.backend_error("memory", "get", key, &e),
        }

        match self.durable.get(key).await {
            Ok(Some(record)) if !record.is_expired(ttl, now) => {
                if let Err(e) = self.memory.set(key, &record).await {
                    self.backend_error("memory", "set", key, &e);
                }
                tracing::debug!(key = %key, tier = "durable", "cache hit");
                Some(record)
            }
            Ok(Some(_)) => {
                self.evict(key).await;
                tracing::debug!(key = %key, "expired entry removed");
                None
            }
            Ok(None) => None,
            Err(e) => {
                self.backend_error("durable", "get", key, &e);
                if matches!(e, Error::Serialization(_)) {
                    // unreadable record; drop it so later lookups go straight to upstream
                    self.evict(key).await;
                    tracing::warn!(key = %key, "corrupt cache record removed");
                }
                None
            }
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let Some(record) = self.get_record(key).await else {
            return self.miss(key);
        };
        match serde_json::from_value(record.payload) {
            Ok(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            Err(e) => {
                self.backend_error("decode", "get", key, &e.into());
                self.miss(key)
            }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T) {
        self.set_with_metadata(key, value, Value::Null).await
    }

    pub async fn set_with_metadata<T: Serialize>(&self, key: &CacheKey, value: &T, metadata: Value) {
        if !self.config.enabled {
            return;
        }
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                self.backend_error("encode", "set", key, &e.into());
                return;
            }
        };
        let size = serde_json::to_vec(&payload).map(|b| b.len()).unwrap_or(0);
        if size > self.config.max_entry_size {
            tracing::debug!(key = %key, size, "payload too large to cache");
            return;
        }
        let record = CacheRecord::new(payload, metadata);

        if let Err(e) = self.memory.set(key, &record).await {
            self.backend_error("memory", "set", key, &e);
        }
        match self.durable.set(key, &record).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, namespace = ?key.namespace, "cached");
            }
            Err(e) => self.backend_error("durable", "set", key, &e),
        }
    }

    async fn evict(&self, key: &CacheKey) -> bool {
        let mut removed = false;
        match self.memory.delete(key).await {
            Ok(deleted) => removed |= deleted,
            Err(e) => self.backend_error("memory", "delete", key, &e),
        }
        match self.durable.delete(key).await {
            Ok(deleted) => removed |= deleted,
            Err(e) => self.backend_error("durable", "delete", key, &e),
        }
        removed
    }

    /// Remove `key` from both tiers; true if either tier held it.
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.evict(key).await
    }

    /// Remove every expired entry from both tiers.
    pub async fn sweep(&self) -> SweepReport {
        let now = now_epoch();
        let ttl = self.config.ttl;
        let mut report = SweepReport::default();

        match self.memory.purge_expired(ttl, now).await {
            Ok(n) => report.memory_removed = n,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(tier = "memory", error = %e, "cache sweep failed");
            }
        }
        match self.durable.purge_expired(ttl, now).await {
            Ok(n) => report.durable_removed = n,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!(tier = "durable", error = %e, "cache sweep failed");
            }
        }

        if report.total() > 0 {
            tracing::info!(
                memory = report.memory_removed,
                durable = report.durable_removed,
                "cleared expired cache entries"
            );
        }
        report
    }

    pub async fn clear(&self) {
        if let Err(e) = self.memory.clear().await {
            tracing::error!(tier = "memory", error = %e, "cache clear failed");
        }
        if let Err(e) = self.durable.clear().await {
            tracing::error!(tier = "durable", error = %e, "cache clear failed");
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let memory_entry_count = self.memory.len().await.unwrap_or_else(|e| {
            tracing::error!(tier = "memory", error = %e, "cache count failed");
            0
        });
        let durable_entry_count = self.durable.len().await.unwrap_or_else(|e| {
            tracing::error!(tier = "durable", error = %e, "cache count failed");
            0
        });
        CacheStats {
            memory_entry_count,
            durable_entry_count,
            ttl_seconds: self.config.ttl.as_secs_f64(),
            root: self.config.root.clone(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }

    pub async fn get_regulation_search<T: DeserializeOwned>(&self, query: &RegulationQuery) -> Option<T> {
        self.get(&self.keys.regulation_search(query)).await
    }

    /// Stores `results` with the query (original casing) as record metadata.
    pub async fn set_regulation_search<T: Serialize>(&self, query: &RegulationQuery, results: &T) {
        let key = self.keys.regulation_search(query);
        self.set_with_metadata(&key, results, query.metadata()).await
    }

    pub async fn get_api_response(&self, operation: &str, fingerprint: &str) -> Option<String> {
        self.get(&self.keys.api_response(operation, fingerprint)).await
    }

    pub async fn set_api_response(&self, operation: &str, fingerprint: &str, response: &str) {
        let key = self.keys.api_response(operation, fingerprint);
        self.set_with_metadata(&key, &response, json!({ "operation": operation }))
            .await
    }
}
