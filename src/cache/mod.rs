//! 两级缓存模块：内存层加持久层，按 TTL 过期。
//!
//! # Result Cache Module
//!
//! Caches expensive results (regulatory searches, generative API responses)
//! behind a shared time-to-live, in two tiers:
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | Two-tier lookup, write-through, sweep and statistics |
//! | [`CacheConfig`] | Root directory, TTL and size limits |
//! | [`CacheBackend`] | Trait implemented by each tier |
//! | [`MemoryCache`] | In-process LRU tier |
//! | [`FileCache`] | Durable tier, one JSON record per key |
//! | [`CacheKeyGenerator`] | SHA-256 keys over canonical JSON, per namespace |
//!
//! Lookups consult memory first, then disk; a disk hit is promoted into memory.
//! Entries older than the TTL are misses and are removed from both tiers.
//!
//! ```rust,no_run
//! use callshield::cache::{CacheConfig, CacheManager, RegulationQuery};
//! use std::time::Duration;
//!
//! # async fn demo() {
//! let cache = CacheManager::new(
//!     CacheConfig::new()
//!         .with_root("data/cache")
//!         .with_ttl(Duration::from_secs(3600)),
//! );
//! let query = RegulationQuery::new("Germany", "fintech", ["payments"]);
//! if cache.get_regulation_search::<Vec<String>>(&query).await.is_none() {
//!     cache.set_regulation_search(&query, &vec!["PSD2".to_string()]).await;
//! }
//! # }
//! ```

mod backend;
mod key;
mod manager;

pub use backend::{CacheBackend, CacheRecord, FileCache, MemoryCache};
pub use key::{
    canonicalize, prompt_fingerprint, CacheKey, CacheKeyGenerator, RegulationQuery, API_RESPONSE,
    REGULATION_SEARCH,
};
pub use manager::{CacheConfig, CacheManager, CacheStats, SweepReport};
