//! Bounded pool with semaphore backpressure and RAII release.
//!
//! # Responsibilities
//! - Hand out at most `max` resources at a time
//! - Reuse idle resources before creating new ones
//! - Destroy broken or discarded resources instead of reusing them
//! - Keep `min` resources alive through eviction passes

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::PoolConfig;
use crate::pool::Manager;

/// Error returned by [`Pool::acquire`].
#[derive(Debug, Error)]
pub enum PoolError<E: std::error::Error + 'static> {
    /// The pool has been drained.
    #[error("pool is closed")]
    Closed,

    /// The manager failed to create a resource.
    #[error("failed to create pooled resource: {0}")]
    Create(#[source] E),
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub max: usize,
    /// Live resources (available + borrowed).
    pub size: usize,
    pub available: usize,
    pub borrowed: usize,
    /// Callers waiting for a slot.
    pub pending: usize,
}

struct Idle<R> {
    resource: R,
    since: Instant,
}

struct Inner<M: Manager> {
    name: &'static str,
    manager: M,
    min: usize,
    max: usize,
    idle: Mutex<VecDeque<Idle<M::Resource>>>,
    permits: Arc<Semaphore>,
    size: AtomicUsize,
    borrowed: AtomicUsize,
    pending: AtomicUsize,
    closed: AtomicBool,
}

impl<M: Manager> Inner<M> {
    fn idle(&self) -> MutexGuard<'_, VecDeque<Idle<M::Resource>>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn destroy(&self, resource: M::Resource) {
        self.size.fetch_sub(1, Ordering::SeqCst);
        self.manager.destroy(resource);
    }
}

/// A bounded pool of resources created by a [`Manager`].
pub struct Pool<M: Manager> {
    inner: Arc<Inner<M>>,
}

impl<M: Manager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: Manager> std::fmt::Debug for Pool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.name)
            .field("status", &self.status())
            .finish()
    }
}

impl<M: Manager> Pool<M> {
    /// Create an empty pool. `max` is clamped to at least 1.
    pub fn new(name: &'static str, manager: M, min: usize, max: usize) -> Self {
        let max = max.max(1);
        Self {
            inner: Arc::new(Inner {
                name,
                manager,
                min: min.min(max),
                max,
                idle: Mutex::new(VecDeque::new()),
                permits: Arc::new(Semaphore::new(max)),
                size: AtomicUsize::new(0),
                borrowed: AtomicUsize::new(0),
                pending: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_config(name: &'static str, manager: M, config: &PoolConfig) -> Self {
        Self::new(name, manager, config.min, config.max)
    }

    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    /// Borrow a resource, waiting while `max` resources are out.
    pub async fn acquire(&self) -> Result<Pooled<M>, PoolError<M::Error>> {
        let permit = {
            let _waiting = PendingGuard::enter(&self.inner.pending);
            self.inner
                .permits
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| PoolError::Closed)?
        };

        loop {
            let next = self.inner.idle().pop_back();
            let Some(idle) = next else { break };
            if self.inner.manager.is_usable(&idle.resource) {
                return Ok(self.lend(idle.resource, permit));
            }
            tracing::debug!(pool = self.inner.name, "Destroying unusable idle resource");
            self.inner.destroy(idle.resource);
        }

        let resource = self
            .inner
            .manager
            .create()
            .await
            .map_err(PoolError::Create)?;
        self.inner.size.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(pool = self.inner.name, size = self.inner.size.load(Ordering::SeqCst), "Created pooled resource");

        Ok(self.lend(resource, permit))
    }

    fn lend(&self, resource: M::Resource, permit: OwnedSemaphorePermit) -> Pooled<M> {
        self.inner.borrowed.fetch_add(1, Ordering::SeqCst);
        Pooled {
            resource: Some(resource),
            discard: false,
            pool: self.inner.clone(),
            _permit: permit,
        }
    }

    /// Pre-create resources up to the `min` floor.
    pub async fn warm(&self) -> Result<(), PoolError<M::Error>> {
        while !self.inner.closed.load(Ordering::SeqCst)
            && self.inner.size.load(Ordering::SeqCst) < self.inner.min
        {
            let resource = self
                .inner
                .manager
                .create()
                .await
                .map_err(PoolError::Create)?;
            self.inner.size.fetch_add(1, Ordering::SeqCst);
            self.inner.idle().push_back(Idle {
                resource,
                since: Instant::now(),
            });
        }
        Ok(())
    }

    /// Destroy resources idle for at least `idle_for`, keeping `min` alive.
    /// Returns the number destroyed.
    pub fn evict(&self, idle_for: Duration) -> usize {
        let mut evicted = Vec::new();
        {
            let mut idle = self.inner.idle();
            let mut size = self.inner.size.load(Ordering::SeqCst);
            while size > self.inner.min {
                match idle.front() {
                    Some(oldest) if oldest.since.elapsed() >= idle_for => {
                        if let Some(oldest) = idle.pop_front() {
                            evicted.push(oldest.resource);
                            size -= 1;
                        }
                    }
                    _ => break,
                }
            }
        }

        let count = evicted.len();
        for resource in evicted {
            self.inner.destroy(resource);
        }
        if count > 0 {
            tracing::debug!(pool = self.inner.name, evicted = count, "Evicted idle resources");
        }
        count
    }

    /// Stop handing out resources and destroy every idle one.
    /// Borrowed resources are destroyed when their guards drop.
    pub fn drain(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.permits.close();

        let idle: Vec<_> = self.inner.idle().drain(..).collect();
        for entry in idle {
            self.inner.destroy(entry.resource);
        }
        tracing::info!(pool = self.inner.name, "Pool drained");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            max: self.inner.max,
            size: self.inner.size.load(Ordering::SeqCst),
            available: self.inner.idle().len(),
            borrowed: self.inner.borrowed.load(Ordering::SeqCst),
            pending: self.inner.pending.load(Ordering::SeqCst),
        }
    }
}

/// Counts a caller as pending for as long as it waits, even if cancelled.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A borrowed resource. Returned to the pool (or destroyed) on drop.
pub struct Pooled<M: Manager> {
    resource: Option<M::Resource>,
    discard: bool,
    pool: Arc<Inner<M>>,
    // Released after the resource is back in the idle set.
    _permit: OwnedSemaphorePermit,
}

impl<M: Manager> Pooled<M> {
    /// Destroy the resource instead of returning it to the pool.
    pub fn discard(mut self) {
        self.discard = true;
    }
}

impl<M: Manager> Deref for Pooled<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        self.resource
            .as_ref()
            .expect("pooled resource is present until drop")
    }
}

impl<M: Manager> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource
            .as_mut()
            .expect("pooled resource is present until drop")
    }
}

impl<M: Manager> Drop for Pooled<M> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        self.pool.borrowed.fetch_sub(1, Ordering::SeqCst);

        if self.discard
            || self.pool.closed.load(Ordering::SeqCst)
            || !self.pool.manager.is_usable(&resource)
        {
            self.pool.destroy(resource);
        } else {
            self.pool.idle().push_back(Idle {
                resource,
                since: Instant::now(),
            });
        }
    }
}
