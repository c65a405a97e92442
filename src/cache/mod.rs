// Cache-aside side channel. Never the system of record: every caller must
// behave identically when the cache is empty, stale or unreachable.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::CacheConfig;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Cache operation failed: {0}")]
    OperationFailed(String),
}

/// Cache key builders.
pub mod keys {
    pub fn cart(user_id: i64) -> String {
        format!("cart:{}", user_id)
    }

    pub fn offer(offer_id: i64) -> String {
        format!("offer:{}", offer_id)
    }
}

#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
    async fn exists(&self, key: &str) -> Result<bool, CacheError>;
    async fn clear(&self) -> Result<(), CacheError>;
}

// In-memory cache implementation, also the fallback when Redis is unreachable
#[derive(Debug, Clone, Default)]
pub struct InMemoryCache {
    store: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn new(value: String, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }

    fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires_at| Instant::now() >= expires_at)
            .unwrap_or(false)
    }
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl CacheBackend for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        {
            let store = self.store.read().await;
            match store.get(key) {
                Some(entry) if !entry.is_expired() => return Ok(Some(entry.value.clone())),
                Some(_) => {}
                None => return Ok(None),
            }
        }
        self.store.write().await.remove(key);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut store = self.store.write().await;
        store.insert(key.to_string(), CacheEntry::new(value.to_string(), ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.store.write().await.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let store = self.store.read().await;
        Ok(store.get(key).map(|e| !e.is_expired()).unwrap_or(false))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.store.write().await.clear();
        Ok(())
    }
}

/// Cache that stores nothing; every read is a miss.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCache;

#[async_trait::async_trait]
impl CacheBackend for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool, CacheError> {
        Ok(false)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct RedisCache {
    client: redis::Client,
}

impl RedisCache {
    pub fn new(redis_url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    pub async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl CacheBackend for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        let result: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(result)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        match ttl {
            Some(ttl) => {
                let _: () = redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl.as_secs().max(1))
                    .arg(value)
                    .query_async(&mut conn)
                    .await?;
            }
            None => {
                let _: () = redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .query_async(&mut conn)
                    .await?;
            }
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        let found: i64 = redis::cmd("EXISTS").arg(key).query_async(&mut conn).await?;
        Ok(found > 0)
    }

    async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.client.get_async_connection().await?;
        let _: () = redis::cmd("FLUSHDB").query_async(&mut conn).await?;
        Ok(())
    }
}

// Cache factory
pub struct CacheFactory;

impl CacheFactory {
    pub async fn create_cache(config: &CacheConfig, redis_url: &str) -> Arc<dyn CacheBackend> {
        match config.cache_type.as_str() {
            "disabled" => {
                info!("Cache disabled");
                Arc::new(NoopCache)
            }
            "redis" => match RedisCache::new(redis_url) {
                Ok(cache) => match cache.ping().await {
                    Ok(()) => {
                        info!("Using Redis cache");
                        Arc::new(cache)
                    }
                    Err(e) => {
                        warn!("Failed to reach Redis ({}), falling back to in-memory cache", e);
                        Arc::new(InMemoryCache::new())
                    }
                },
                Err(e) => {
                    warn!("Invalid Redis URL ({}), falling back to in-memory cache", e);
                    Arc::new(InMemoryCache::new())
                }
            },
            _ => Arc::new(InMemoryCache::new()),
        }
    }
}

/// Read-through helper: a hit is deserialized, a miss (or any cache failure)
/// runs `load` and populates the cache on a best-effort basis.
pub async fn get_or_load<T, E, F, Fut>(
    cache: &dyn CacheBackend,
    key: &str,
    ttl: Duration,
    load: F,
) -> Result<T, E>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match cache.get(key).await {
        Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
            Ok(value) => {
                debug!(key, "cache hit");
                return Ok(value);
            }
            Err(e) => warn!(key, error = %e, "discarding undecodable cache entry"),
        },
        Ok(None) => debug!(key, "cache miss"),
        Err(e) => warn!(key, error = %e, "cache read failed"),
    }

    let value = load().await?;

    match serde_json::to_string(&value) {
        Ok(raw) => {
            if let Err(e) = cache.set(key, &raw, Some(ttl)).await {
                warn!(key, error = %e, "cache write failed");
            }
        }
        Err(e) => warn!(key, error = %e, "cache encode failed"),
    }

    Ok(value)
}

/// Deletes every key, logging rather than failing.
pub async fn invalidate(cache: &dyn CacheBackend, keys: &[String]) {
    for key in keys {
        if let Err(e) = cache.delete(key).await {
            warn!(key = %key, error = %e, "cache invalidation failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = InMemoryCache::new();
        cache
            .set("cart:1", "[]", Some(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(cache.exists("cart:1").await.unwrap());

        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(cache.get("cart:1").await.unwrap(), None);
        assert!(!cache.exists("cart:1").await.unwrap());
    }

    #[tokio::test]
    async fn get_or_load_only_loads_on_miss() {
        let cache = InMemoryCache::new();
        let mut calls = 0;

        let first: Result<Vec<i64>, CacheError> =
            get_or_load(&cache, "k", Duration::from_secs(60), || {
                calls += 1;
                async { Ok(vec![1, 2, 3]) }
            })
            .await;
        assert_eq!(first.unwrap(), vec![1, 2, 3]);

        let second: Result<Vec<i64>, CacheError> =
            get_or_load(&cache, "k", Duration::from_secs(60), || async {
                Ok(vec![9])
            })
            .await;
        assert_eq!(second.unwrap(), vec![1, 2, 3]);
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn noop_cache_always_loads() {
        let cache = NoopCache;
        let value: Result<i64, CacheError> =
            get_or_load(&cache, "offer:1", Duration::from_secs(60), || async { Ok(5) }).await;
        assert_eq!(value.unwrap(), 5);
        assert!(!cache.exists("offer:1").await.unwrap());
    }

    #[tokio::test]
    async fn invalidate_removes_keys() {
        let cache = InMemoryCache::new();
        cache.set(&keys::cart(4), "[]", None).await.unwrap();
        cache.set(&keys::offer(9), "{}", None).await.unwrap();

        invalidate(&cache, &[keys::cart(4), keys::offer(9)]).await;

        assert!(!cache.exists("cart:4").await.unwrap());
        assert!(!cache.exists("offer:9").await.unwrap());
    }

    #[tokio::test]
    async fn disabled_config_builds_noop_cache() {
        let config = CacheConfig {
            cache_type: "disabled".into(),
            ..Default::default()
        };
        let cache = CacheFactory::create_cache(&config, "redis://127.0.0.1:1").await;
        cache.set("a", "b", None).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), None);
    }
}
