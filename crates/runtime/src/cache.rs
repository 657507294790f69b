//! Short-lived cache of merged leaderboard payloads

use crate::{metrics, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Key/value backend holding serialized payloads with an expiry.
///
/// A read must never return an entry past its expiry.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> Result<()>;
}

// ================================
// In-Process Store
// ================================

struct CacheEntry {
    payload: String,
    expires_at: Instant,
}

/// Unbounded in-process store with lazy expiry
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        {
            if let Some(entry) = self.entries.get(key) {
                if entry.expires_at > now {
                    return Ok(Some(entry.payload.clone()));
                }
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                payload: payload.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

// ================================
// Redis Store
// ================================

/// Store backed by Redis `SET .. PX` / `GET`
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let payload = redis::cmd("GET")
            .arg(key)
            .query_async::<_, Option<String>>(&mut conn)
            .await?;
        Ok(payload)
    }

    async fn set(&self, key: &str, payload: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(payload)
            .arg("PX")
            .arg(px_millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}

/// `PX` argument for `ttl`. Redis rejects a zero expiry.
fn px_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

// ================================
// Result Cache
// ================================

/// TTL cache with per-key single-flight recomputation
pub struct ResultCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    inflight: DashMap<String, Arc<Mutex<()>>>,
}

impl ResultCache {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            inflight: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key).await
    }

    pub async fn set(&self, key: &str, payload: &str) -> Result<()> {
        self.store.set(key, payload, self.ttl).await
    }

    /// Return the cached payload for `key`, or run `compute` and cache its
    /// output.
    ///
    /// Concurrent misses on one key wait for a single computation. Failed
    /// computations are not cached.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if let Some(hit) = self.lookup(key).await {
            metrics::CACHE_HITS_TOTAL.inc();
            return Ok(hit);
        }

        let gate = self.inflight.entry(key.to_string()).or_default().clone();
        let result = {
            let _guard = gate.lock().await;
            if let Some(hit) = self.lookup(key).await {
                metrics::CACHE_HITS_TOTAL.inc();
                Ok(hit)
            } else {
                metrics::CACHE_MISSES_TOTAL.inc();
                debug!("Cache miss for {}", key);
                match compute().await {
                    Ok(payload) => {
                        if let Err(e) = self.set(key, &payload).await {
                            warn!("Failed to cache {}: {}", key, e);
                        }
                        Ok(payload)
                    }
                    Err(e) => Err(e),
                }
            }
        };

        drop(gate);
        self.inflight
            .remove_if(key, |_, gate| Arc::strong_count(gate) == 1);
        result
    }

    /// Backend read failures degrade to a miss
    async fn lookup(&self, key: &str) -> Option<String> {
        match self.store.get(key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache read for {} failed: {}", key, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RuntimeError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_memory_store_expires_lazily() {
        let store = MemoryStore::new();
        store
            .set("leaderboard:overall", "[]", Duration::from_secs(30))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(store.get("leaderboard:overall").await.unwrap(), Some("[]".to_string()));

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("leaderboard:overall").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();
        store.set("a", "1", Duration::from_secs(30)).await.unwrap();
        store.set("b", "2", Duration::from_secs(30)).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.get("b").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("c").await.unwrap(), None);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_compute_once() {
        let cache = Arc::new(ResultCache::new(
            Arc::new(MemoryStore::new()),
            Duration::from_secs(30),
        ));
        let computations = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let computations = computations.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute("leaderboard:overall", || async move {
                        computations.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Ok("[{\"rank\":1}]".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap(), "[{\"rank\":1}]");
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
        assert!(cache.inflight.is_empty());
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let cache = ResultCache::new(Arc::new(MemoryStore::new()), Duration::from_secs(30));

        let first = cache
            .get_or_compute("k", || async {
                Err(RuntimeError::UpstreamUnavailable("down".to_string()))
            })
            .await;
        assert!(first.is_err());
        assert_eq!(cache.get("k").await.unwrap(), None);

        let second = cache.get_or_compute("k", || async { Ok("ok".to_string()) }).await;
        assert_eq!(second.unwrap(), "ok");
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("ok"));
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _: &str) -> Result<Option<String>> {
            Err(RuntimeError::Cache("connection refused".to_string()))
        }

        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<()> {
            Err(RuntimeError::Cache("connection refused".to_string()))
        }
    }

    #[test]
    fn test_px_expiry_is_clamped() {
        assert_eq!(px_millis(Duration::ZERO), 1);
        assert_eq!(px_millis(Duration::from_micros(500)), 1);
        assert_eq!(px_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(px_millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    #[ignore = "needs a Redis server at REDIS_URL or 127.0.0.1:6379"]
    async fn test_redis_store_round_trip() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let store = RedisStore::connect(&url).await.unwrap();
        let key = format!("memoree:test:{}", std::process::id());

        store.set(&key, "[]", Duration::from_millis(300)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("[]"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(store.get(&key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_broken_backend_degrades_to_recompute() {
        let cache = ResultCache::new(Arc::new(BrokenStore), Duration::from_secs(30));

        let payload = cache.get_or_compute("k", || async { Ok("fresh".to_string()) }).await;
        assert_eq!(payload.unwrap(), "fresh");
    }
}
