use async_trait::async_trait;
use lru::LruCache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::models::Jurisdiction;

/// Compute SHA256 hash of content
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Key for a memoized embedding of `text`
pub fn embedding_key(text: &str) -> String {
    format!("embedding:{}", hash_content(text))
}

/// Key for a ranked query result set
pub fn query_key(text: &str, jurisdiction: Option<Jurisdiction>, top_k: usize) -> String {
    let scope = jurisdiction.map(|j| j.code()).unwrap_or("*");
    format!("query:{}:{}:{}", text, scope, top_k)
}

/// Key for a memoized risk assessment
pub fn risk_key(document_id: &str) -> String {
    format!("risk:{}", document_id)
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache backend error: {0}")]
    Backend(#[from] redis::RedisError),

    #[error("cache operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Key-value store with per-entry expiry
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Floor for how long a delete that missed the remote keeps the key hidden
const MIN_TOMBSTONE_TTL: Duration = Duration::from_secs(3600);

#[derive(Clone)]
enum Slot {
    Value(String),
    /// Deleted locally while the remote copy may still exist
    Deleted,
}

struct MemoryEntry {
    slot: Slot,
    expires_at: Instant,
}

/// Process-local LRU store; expired entries are dropped on read
pub struct MemoryStore {
    entries: Mutex<LruCache<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn lookup_slot(&self, key: &str) -> Option<Slot> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let expired = match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.slot.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    fn lookup(&self, key: &str) -> Option<String> {
        match self.lookup_slot(key) {
            Some(Slot::Value(value)) => Some(value),
            _ => None,
        }
    }

    fn put_slot(&self, key: &str, slot: Slot, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if ttl.is_zero() {
            entries.pop(key);
            return;
        }
        entries.put(
            key.to_string(),
            MemoryEntry {
                slot,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    fn insert(&self, key: &str, value: &str, ttl: Duration) {
        self.put_slot(key, Slot::Value(value.to_string()), ttl);
    }

    fn insert_tombstone(&self, key: &str, ttl: Duration) {
        self.put_slot(key, Slot::Deleted, ttl);
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop(key);
    }

    /// Number of stored entries, expired ones included until read
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.remove(key);
        Ok(())
    }
}

/// Redis-backed store (`GET` / `SET key value PX ttl`)
pub struct RedisStore {
    conn: ConnectionManager,
    op_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        op_timeout: Duration,
    ) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = tokio::time::timeout(connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| CacheError::Timeout(connect_timeout))??;

        Ok(Self { conn, op_timeout })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value = tokio::time::timeout(self.op_timeout, conn.get::<_, Option<String>>(key))
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))??;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        if ttl.is_zero() {
            return self.delete(key).await;
        }
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        tokio::time::timeout(self.op_timeout, conn.pset_ex::<_, _, ()>(key, value, millis))
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))??;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        tokio::time::timeout(self.op_timeout, conn.del::<_, ()>(key))
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))??;
        Ok(())
    }
}

/// Backend selected once at construction
pub enum CacheBackend {
    /// Remote store, with a local store holding writes and deletes the remote missed.
    ///
    /// Fallback entries shadow the remote until they expire or a later remote
    /// write for the same key succeeds.
    Remote {
        store: Box<dyn CacheStore>,
        fallback: MemoryStore,
    },
    Memory(MemoryStore),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Remote,
    Memory,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Remote calls answered by the local fallback
    pub fallbacks: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cache layer shared by the embedder, the query engine and the risk classifier.
///
/// Never surfaces backend errors: a failing remote call is served by the local
/// fallback store with the same TTL semantics.
pub struct ResultCache {
    backend: CacheBackend,
    hits: AtomicU64,
    misses: AtomicU64,
    fallbacks: AtomicU64,
    /// Longest TTL written so far, in milliseconds
    longest_ttl_ms: AtomicU64,
}

impl ResultCache {
    /// Build from config, degrading to the in-process store if the remote is unreachable
    pub async fn connect(config: &CacheConfig) -> Self {
        let Some(url) = config.redis_url.as_deref() else {
            tracing::info!("No cache backend configured, using in-process store");
            return Self::in_memory(config.memory_capacity);
        };

        match RedisStore::connect(
            url,
            Duration::from_millis(config.connect_timeout_ms),
            Duration::from_millis(config.op_timeout_ms),
        )
        .await
        {
            Ok(store) => {
                tracing::info!("Cache backend connection established");
                Self::with_remote(Box::new(store), config.memory_capacity)
            }
            Err(e) => {
                tracing::warn!("Cache backend unreachable ({}), using in-process store", e);
                Self::in_memory(config.memory_capacity)
            }
        }
    }

    pub fn in_memory(capacity: usize) -> Self {
        Self::with_backend(CacheBackend::Memory(MemoryStore::new(capacity)))
    }

    /// Remote store with a local fallback of `fallback_capacity` entries
    pub fn with_remote(store: Box<dyn CacheStore>, fallback_capacity: usize) -> Self {
        Self::with_backend(CacheBackend::Remote {
            store,
            fallback: MemoryStore::new(fallback_capacity),
        })
    }

    pub fn with_backend(backend: CacheBackend) -> Self {
        Self {
            backend,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            fallbacks: AtomicU64::new(0),
            longest_ttl_ms: AtomicU64::new(0),
        }
    }

    pub fn backend_kind(&self) -> BackendKind {
        match self.backend {
            CacheBackend::Remote { .. } => BackendKind::Remote,
            CacheBackend::Memory(_) => BackendKind::Memory,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let value = match &self.backend {
            CacheBackend::Memory(store) => store.lookup(key),
            CacheBackend::Remote { store, fallback } => match fallback.lookup_slot(key) {
                Some(Slot::Value(value)) => Some(value),
                Some(Slot::Deleted) => None,
                None => match store.get(key).await {
                    Ok(value) => value,
                    Err(e) => {
                        self.fallbacks.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!("Cache get failed, nothing in fallback store: {}", e);
                        None
                    }
                },
            },
        };

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache hit: {}", key_prefix(key));
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Cache miss: {}", key_prefix(key));
        }
        value
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) {
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
        self.longest_ttl_ms.fetch_max(ttl_ms, Ordering::Relaxed);

        match &self.backend {
            CacheBackend::Memory(store) => store.insert(key, value, ttl),
            CacheBackend::Remote { store, fallback } => match store.set(key, value, ttl).await {
                Ok(()) => fallback.remove(key),
                Err(e) => {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Cache set failed, writing fallback store: {}", e);
                    if ttl.is_zero() {
                        fallback.insert_tombstone(key, self.tombstone_ttl());
                    } else {
                        fallback.insert(key, value, ttl);
                    }
                }
            },
        }
    }

    pub async fn delete(&self, key: &str) {
        match &self.backend {
            CacheBackend::Memory(store) => store.remove(key),
            CacheBackend::Remote { store, fallback } => match store.delete(key).await {
                Ok(()) => fallback.remove(key),
                Err(e) => {
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Cache delete failed, hiding key locally: {}", e);
                    fallback.insert_tombstone(key, self.tombstone_ttl());
                }
            },
        }
    }

    /// Outlives any remote entry this cache wrote
    fn tombstone_ttl(&self) -> Duration {
        Duration::from_millis(self.longest_ttl_ms.load(Ordering::Relaxed)).max(MIN_TOMBSTONE_TTL)
    }

    /// Get and deserialize; an undecodable entry counts as absent
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Discarding undecodable cache entry {}: {}", key_prefix(key), e);
                None
            }
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        match serde_json::to_string(value) {
            Ok(raw) => self.set(key, &raw, ttl).await,
            Err(e) => tracing::warn!("Failed to serialize cache entry {}: {}", key_prefix(key), e),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Shortened key for log lines; query keys embed raw user text
fn key_prefix(key: &str) -> &str {
    match key.char_indices().nth(48) {
        Some((idx, _)) => &key[..idx],
        None => key,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn test_hash_content() {
        let content = "Hello, world!";
        let hash = hash_content(content);
        assert_eq!(hash.len(), 64); // SHA256 = 32 bytes = 64 hex chars

        // Same content should produce same hash
        assert_eq!(hash, hash_content(content));

        // Different content should produce different hash
        assert_ne!(hash, hash_content("Hello, Rust!"));
    }

    #[test]
    fn test_key_prefixes_are_disjoint() {
        assert!(embedding_key("x").starts_with("embedding:"));
        assert_eq!(query_key("aml", Some(Jurisdiction::Eu), 5), "query:aml:EU:5");
        assert_eq!(query_key("aml", None, 5), "query:aml:*:5");
        assert_eq!(risk_key("DOC-1"), "risk:DOC-1");
    }

    #[tokio::test]
    async fn test_set_then_get_returns_value() {
        let cache = ResultCache::in_memory(16);
        cache.set("query:a", "[1,2]", Duration::from_secs(1)).await;
        assert_eq!(cache.get("query:a").await.as_deref(), Some("[1,2]"));
    }

    #[tokio::test]
    async fn test_get_after_ttl_is_absent() {
        let cache = ResultCache::in_memory(16);
        cache.set("query:a", "v", Duration::from_secs(1)).await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("query:a").await, None);
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = ResultCache::in_memory(16);
        cache.set("k", "first", Duration::from_secs(60)).await;
        cache.set("k", "second", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_zero_ttl_clears_key() {
        let cache = ResultCache::in_memory(16);
        cache.set("k", "v", Duration::from_secs(60)).await;
        cache.set("k", "w", Duration::ZERO).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let cache = ResultCache::in_memory(16);
        cache.set("k", "v", Duration::from_secs(60)).await;
        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
    }

    #[test]
    fn test_memory_store_evicts_least_recently_used() {
        let store = MemoryStore::new(2);
        store.insert("a", "1", Duration::from_secs(60));
        store.insert("b", "2", Duration::from_secs(60));
        assert_eq!(store.lookup("a").as_deref(), Some("1"));
        store.insert("c", "3", Duration::from_secs(60));

        assert_eq!(store.len(), 2);
        assert_eq!(store.lookup("b"), None);
        assert_eq!(store.lookup("a").as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_json_roundtrip_and_stats() {
        let cache = ResultCache::in_memory(16);
        cache
            .set_json("embedding:x", &vec![0.5f32, 1.0], Duration::from_secs(60))
            .await;

        let vector: Option<Vec<f32>> = cache.get_json("embedding:x").await;
        assert_eq!(vector, Some(vec![0.5, 1.0]));
        let missing: Option<Vec<f32>> = cache.get_json("embedding:y").await;
        assert!(missing.is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[tokio::test]
    async fn test_undecodable_entry_is_treated_as_absent() {
        let cache = ResultCache::in_memory(16);
        cache.set("query:bad", "not json", Duration::from_secs(60)).await;
        let parsed: Option<Vec<String>> = cache.get_json("query:bad").await;
        assert!(parsed.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_backend_falls_back_to_memory() {
        let config = CacheConfig {
            // Nothing listens on port 1
            redis_url: Some("redis://127.0.0.1:1/0".to_string()),
            connect_timeout_ms: 500,
            ..CacheConfig::default()
        };

        let cache = ResultCache::connect(&config).await;
        assert_eq!(cache.backend_kind(), BackendKind::Memory);

        cache.set("risk:DOC-1", "{}", Duration::from_secs(1)).await;
        assert_eq!(cache.get("risk:DOC-1").await.as_deref(), Some("{}"));
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("risk:DOC-1").await, None);
    }

    #[tokio::test]
    async fn test_malformed_backend_url_falls_back_to_memory() {
        let config = CacheConfig {
            redis_url: Some("not-a-url".to_string()),
            ..CacheConfig::default()
        };
        let cache = ResultCache::connect(&config).await;
        assert_eq!(cache.backend_kind(), BackendKind::Memory);
    }

    #[tokio::test]
    async fn test_no_backend_configured_uses_memory() {
        let cache = ResultCache::connect(&CacheConfig::default()).await;
        assert_eq!(cache.backend_kind(), BackendKind::Memory);
    }

    /// In-process remote stand-in that can be switched into an outage
    struct FlakyStore {
        inner: MemoryStore,
        failing: Arc<AtomicBool>,
    }

    impl FlakyStore {
        fn new(failing: Arc<AtomicBool>) -> Self {
            Self {
                inner: MemoryStore::new(64),
                failing,
            }
        }

        fn check(&self) -> Result<(), CacheError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(CacheError::Timeout(Duration::from_millis(1)));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.check()?;
            CacheStore::get(&self.inner, key).await
        }

        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
            self.check()?;
            CacheStore::set(&self.inner, key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.check()?;
            CacheStore::delete(&self.inner, key).await
        }
    }

    fn flaky_cache() -> (ResultCache, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(false));
        let cache = ResultCache::with_remote(Box::new(FlakyStore::new(failing.clone())), 16);
        (cache, failing)
    }

    #[tokio::test]
    async fn test_remote_backend_roundtrip() {
        let (cache, _failing) = flaky_cache();
        assert_eq!(cache.backend_kind(), BackendKind::Remote);

        cache.set("k", "v", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
        cache.delete("k").await;
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.stats().fallbacks, 0);
    }

    #[tokio::test]
    async fn test_write_during_outage_is_not_shadowed_after_recovery() {
        let (cache, failing) = flaky_cache();
        cache.set("k", "v1", Duration::from_secs(60)).await;

        failing.store(true, Ordering::SeqCst);
        cache.set("k", "v2", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v2"));

        failing.store(false, Ordering::SeqCst);
        assert_eq!(cache.get("k").await.as_deref(), Some("v2"));

        cache.set("k", "v3", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v3"));
        assert_eq!(cache.stats().fallbacks, 1);
    }

    #[tokio::test]
    async fn test_outage_read_of_remote_only_key_is_miss() {
        let (cache, failing) = flaky_cache();
        cache.set("k", "v", Duration::from_secs(60)).await;

        failing.store(true, Ordering::SeqCst);
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.get("other").await, None);

        let stats = cache.stats();
        assert_eq!(stats.fallbacks, 2);
        assert_eq!(stats.misses, 2);

        failing.store(false, Ordering::SeqCst);
        assert_eq!(cache.get("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_delete_during_outage_survives_recovery() {
        let (cache, failing) = flaky_cache();
        cache.set("k", "v1", Duration::from_secs(60)).await;
        cache.set("z", "v1", Duration::from_secs(60)).await;

        failing.store(true, Ordering::SeqCst);
        cache.delete("k").await;
        cache.set("z", "ignored", Duration::ZERO).await;

        failing.store(false, Ordering::SeqCst);
        assert_eq!(cache.get("k").await, None);
        assert_eq!(cache.get("z").await, None);

        cache.set("k", "v2", Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await.as_deref(), Some("v2"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_set_get_only_observes_written_values() {
        let (cache, failing) = flaky_cache();
        let cache = Arc::new(cache);
        let written: Vec<String> = (0..8).map(|i| format!("v{}", i)).collect();

        let mut handles = Vec::new();
        for value in written.clone() {
            let cache = cache.clone();
            let written = written.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    cache.set("k", &value, Duration::from_secs(60)).await;
                    if let Some(seen) = cache.get("k").await {
                        assert!(written.contains(&seen), "unexpected value {}", seen);
                    }
                }
            }));
        }
        let toggler = {
            let failing = failing.clone();
            tokio::spawn(async move {
                for i in 0..100 {
                    failing.store(i % 2 == 0, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                }
            })
        };

        for handle in handles {
            handle.await.unwrap();
        }
        toggler.await.unwrap();
        failing.store(false, Ordering::SeqCst);

        let last = cache.get("k").await.expect("a value was written");
        assert!(written.contains(&last));
    }
}
