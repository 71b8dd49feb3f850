//! Cache orchestration over pooled store connections.
//!
//! # Responsibilities
//! - Lookup with expiry check; every failure reads as a miss
//! - Best-effort writes with the TTL policy applied
//! - Purge by URL identity across query strings and build targets

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use url::Url;

use crate::cache::entry::{url_identity, CacheEntry, CacheKey};
use crate::cache::policy::TtlPolicy;
use crate::cache::store::{CacheConnection, CacheError, CacheStore};
use crate::config::CacheConfig;
use crate::observability::metrics;
use crate::pool::{Manager, Pool, PoolError, PoolStatus};

/// Pool manager producing store connections.
pub struct StoreManager {
    store: Arc<dyn CacheStore>,
}

#[async_trait]
impl Manager for StoreManager {
    type Resource = Box<dyn CacheConnection>;
    type Error = CacheError;

    async fn create(&self) -> Result<Self::Resource, CacheError> {
        self.store.connect().await
    }

    fn is_usable(&self, conn: &Self::Resource) -> bool {
        conn.is_open()
    }

    fn destroy(&self, mut conn: Self::Resource) {
        conn.close();
    }
}

impl From<PoolError<CacheError>> for CacheError {
    fn from(err: PoolError<CacheError>) -> Self {
        match err {
            PoolError::Closed => CacheError::Closed,
            PoolError::Create(e) => e,
        }
    }
}

/// Cache front used by the request pipeline.
pub struct Cache {
    store: Arc<dyn CacheStore>,
    pool: Pool<StoreManager>,
    policy: TtlPolicy,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        let manager = StoreManager {
            store: store.clone(),
        };
        Self {
            store,
            pool: Pool::from_config("cache", manager, &config.pool),
            policy: TtlPolicy::from_config(config),
        }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    pub fn pool(&self) -> &Pool<StoreManager> {
        &self.pool
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// A live entry for `key`, or `None` on miss, expiry or store failure.
    pub async fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.try_lookup(key).await {
            Ok(Some(entry)) if entry.is_fresh(SystemTime::now()) => {
                metrics::record_cache_lookup("hit");
                Some(entry)
            }
            Ok(_) => {
                metrics::record_cache_lookup("miss");
                None
            }
            Err(e) => {
                tracing::warn!(url = %key.url, error = %e, "Cache lookup failed, treating as miss");
                metrics::record_cache_lookup("error");
                None
            }
        }
    }

    async fn try_lookup(&self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.pool.acquire().await?;
        match conn.get(key).await {
            Ok(entry) => Ok(entry),
            Err(e) => {
                conn.discard();
                Err(e)
            }
        }
    }

    /// Store `entry` under `key`. Failures are logged and swallowed.
    /// Returns whether the entry was written.
    pub async fn store(&self, key: CacheKey, mut entry: CacheEntry) -> bool {
        let Some(ttl) = self.policy.prepare(&mut entry) else {
            return false;
        };
        entry.expire_after(ttl, SystemTime::now());

        let url = key.url.clone();
        match self.try_store(key, entry, ttl).await {
            Ok(()) => {
                tracing::debug!(url = %url, ttl_secs = ttl.as_secs(), "Cached response");
                metrics::record_cache_write("ok");
                true
            }
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Cache write failed");
                metrics::record_cache_write("error");
                false
            }
        }
    }

    async fn try_store(&self, key: CacheKey, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.pool.acquire().await?;
        match conn.set(key, entry, ttl).await {
            Ok(()) => Ok(()),
            Err(e) => {
                conn.discard();
                Err(e)
            }
        }
    }

    /// Delete every entry whose URL, ignoring query and fragment, matches `url`.
    /// Returns the number of entries removed.
    pub async fn purge(&self, url: &Url) -> Result<usize, CacheError> {
        let identity = url_identity(url.as_str());
        let mut conn = self.pool.acquire().await?;

        let keys = match conn.keys(identity).await {
            Ok(keys) => keys,
            Err(e) => {
                conn.discard();
                return Err(e);
            }
        };

        let mut removed = 0;
        for key in &keys {
            match conn.delete(key).await {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => {
                    conn.discard();
                    return Err(e);
                }
            }
        }

        tracing::info!(url = %identity, removed, "Purged cache entries");
        Ok(removed)
    }

    /// Remove expired entries from the store.
    pub fn sweep_expired(&self) -> usize {
        let swept = self.store.sweep_expired();
        if swept > 0 {
            tracing::debug!(store = self.store.name(), swept, "Swept expired cache entries");
        }
        swept
    }

    /// Drain the connection pool and close the store.
    pub async fn shutdown(&self) {
        self.pool.drain();
        self.store.close().await;
        tracing::info!(store = self.store.name(), "Cache store closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::MemoryStore;
    use crate::origin::BuildTarget;
    use axum::http::{HeaderMap, StatusCode};
    use bytes::Bytes;

    /// Store whose connections fail every operation.
    struct BrokenStore;

    struct BrokenConnection;

    #[async_trait]
    impl CacheStore for BrokenStore {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn connect(&self) -> Result<Box<dyn CacheConnection>, CacheError> {
            Ok(Box::new(BrokenConnection))
        }
    }

    #[async_trait]
    impl CacheConnection for BrokenConnection {
        async fn get(&mut self, _: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
            Err(CacheError::Backend("read".into()))
        }

        async fn set(&mut self, _: CacheKey, _: CacheEntry, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Backend("write".into()))
        }

        async fn delete(&mut self, _: &CacheKey) -> Result<bool, CacheError> {
            Err(CacheError::Backend("delete".into()))
        }

        async fn keys(&mut self, _: &str) -> Result<Vec<CacheKey>, CacheError> {
            Err(CacheError::Backend("keys".into()))
        }
    }

    fn key(url: &str) -> CacheKey {
        CacheKey::new(&Url::parse(url).unwrap(), BuildTarget::Es2022)
    }

    fn entry(status: StatusCode, body: &'static str) -> CacheEntry {
        CacheEntry::from_parts("u", status, &HeaderMap::new(), Bytes::from_static(body.as_bytes()))
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let cache = Cache::new(Arc::new(MemoryStore::new()), &CacheConfig::default());
        let k = key("https://p/react@18");

        assert!(cache.lookup(&k).await.is_none());
        assert!(cache.store(k.clone(), entry(StatusCode::OK, "code")).await);

        let hit = cache.lookup(&k).await.unwrap();
        assert_eq!(hit.body, Bytes::from_static(b"code"));
        assert_eq!(cache.pool_status().borrowed, 0);
    }

    #[tokio::test]
    async fn test_failures_are_misses() {
        let cache = Cache::new(Arc::new(BrokenStore), &CacheConfig::default());
        let k = key("https://p/react@18");

        assert!(!cache.store(k.clone(), entry(StatusCode::OK, "code")).await);
        assert!(cache.lookup(&k).await.is_none());
        assert!(cache.purge(&Url::parse("https://p/react@18").unwrap()).await.is_err());

        // broken handles are destroyed, not pooled
        let status = cache.pool_status();
        assert_eq!((status.size, status.borrowed), (0, 0));
    }

    #[tokio::test]
    async fn test_purge_ignores_query_and_target() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(store.clone(), &CacheConfig::default());

        let a = key("https://p/react@18?dev");
        let b = CacheKey::new(&Url::parse("https://p/react@18").unwrap(), BuildTarget::Es2015);
        let other = key("https://p/vue@3");
        for k in [&a, &b, &other] {
            cache.store(k.clone(), entry(StatusCode::OK, "x")).await;
        }

        let removed = cache.purge(&Url::parse("https://p/react@18?x=1").unwrap()).await.unwrap();
        assert_eq!(removed, 2);
        assert!(cache.lookup(&a).await.is_none());
        assert!(cache.lookup(&b).await.is_none());
        assert!(cache.lookup(&other).await.is_some());
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_entries() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(store.clone(), &CacheConfig::default());

        // the policy never stores a zero TTL, so write through a raw connection
        let mut conn = store.connect().await.unwrap();
        conn.set(key("https://p/old"), entry(StatusCode::OK, "old"), Duration::ZERO)
            .await
            .unwrap();
        cache.store(key("https://p/new"), entry(StatusCode::OK, "new")).await;

        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(store.len(), 1);
        assert!(cache.lookup(&key("https://p/new")).await.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_drains_pool() {
        let store = Arc::new(MemoryStore::new());
        let cache = Cache::new(store.clone(), &CacheConfig::default());
        cache.store(key("https://p/a"), entry(StatusCode::OK, "x")).await;

        cache.shutdown().await;
        assert!(cache.pool().is_closed());
        assert!(store.is_empty());
        assert!(cache.lookup(&key("https://p/a")).await.is_none());
    }
}
