//! Cache store backends.
//!
//! # Responsibilities
//! - Define the store seam ([`CacheStore`] opens [`CacheConnection`]s)
//! - Provide the embedded in-memory store
//!
//! # Design Decisions
//! - Connections are pooled by the orchestrator, so the trait is per-handle
//! - Stores enforce TTL themselves; the orchestrator still checks expiry

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::cache::entry::{CacheEntry, CacheKey};

/// Error from a cache backend. Never surfaced to clients.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache connection closed")]
    Closed,

    #[error("cache backend error: {0}")]
    Backend(String),
}

/// A cache backend able to open connections.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Open a new connection handle.
    async fn connect(&self) -> Result<Box<dyn CacheConnection>, CacheError>;

    /// Drop expired entries. Backends that expire keys on their own keep
    /// the default. Returns how many were removed.
    fn sweep_expired(&self) -> usize {
        0
    }

    /// Release backend-wide resources at shutdown.
    async fn close(&self) {}
}

/// One live handle to a cache backend.
#[async_trait]
pub trait CacheConnection: Send + Sync {
    async fn get(&mut self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError>;

    async fn set(&mut self, key: CacheKey, entry: CacheEntry, ttl: Duration) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    async fn delete(&mut self, key: &CacheKey) -> Result<bool, CacheError>;

    /// Keys whose URL identity (URL without query) equals `identity`.
    async fn keys(&mut self, identity: &str) -> Result<Vec<CacheKey>, CacheError>;

    /// Whether the handle can be reused.
    fn is_open(&self) -> bool {
        true
    }

    fn close(&mut self) {}
}

/// Embedded store on a concurrent map shared by every connection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<CacheKey, CacheEntry>>,
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
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<Box<dyn CacheConnection>, CacheError> {
        Ok(Box::new(MemoryConnection {
            entries: Some(self.entries.clone()),
        }))
    }

    fn sweep_expired(&self) -> usize {
        let now = SystemTime::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        before.saturating_sub(self.entries.len())
    }

    async fn close(&self) {
        self.entries.clear();
    }
}

struct MemoryConnection {
    entries: Option<Arc<DashMap<CacheKey, CacheEntry>>>,
}

impl MemoryConnection {
    fn entries(&self) -> Result<&DashMap<CacheKey, CacheEntry>, CacheError> {
        self.entries.as_deref().ok_or(CacheError::Closed)
    }
}

#[async_trait]
impl CacheConnection for MemoryConnection {
    async fn get(&mut self, key: &CacheKey) -> Result<Option<CacheEntry>, CacheError> {
        let entries = self.entries()?;
        let now = SystemTime::now();
        let entry = entries.get(key).map(|e| e.value().clone());
        match entry {
            Some(entry) if entry.is_fresh(now) => Ok(Some(entry)),
            Some(_) => {
                entries.remove_if(key, |_, e| !e.is_fresh(now));
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&mut self, key: CacheKey, mut entry: CacheEntry, ttl: Duration) -> Result<(), CacheError> {
        entry.expire_after(ttl, SystemTime::now());
        self.entries()?.insert(key, entry);
        Ok(())
    }

    async fn delete(&mut self, key: &CacheKey) -> Result<bool, CacheError> {
        Ok(self.entries()?.remove(key).is_some())
    }

    async fn keys(&mut self, identity: &str) -> Result<Vec<CacheKey>, CacheError> {
        Ok(self
            .entries()?
            .iter()
            .filter(|e| e.key().identity() == identity)
            .map(|e| e.key().clone())
            .collect())
    }

    fn is_open(&self) -> bool {
        self.entries.is_some()
    }

    fn close(&mut self) {
        self.entries = None;
    }
}
