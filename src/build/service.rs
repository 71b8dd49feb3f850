//! Build offload front used by the pipeline.
//!
//! # Responsibilities
//! - Dispatch transforms to pooled worker threads, or to the blocking
//!   thread pool when workers are disabled
//! - Abort the wait when the request is cancelled
//! - Retire workers that were cancelled mid-job or died

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::build::transform::{Transform, TransformError, TransformInput, TransformOutput};
use crate::build::worker::WorkerManager;
use crate::config::WorkerConfig;
use crate::observability::metrics;
use crate::pool::{Pool, PoolError, PoolStatus, Pooled};

enum Mode {
    Pooled(Pool<WorkerManager>),
    Inline(Arc<dyn Transform>),
}

pub struct BuildService {
    mode: Mode,
}

impl From<PoolError<std::io::Error>> for TransformError {
    fn from(err: PoolError<std::io::Error>) -> Self {
        match err {
            PoolError::Closed => TransformError::PoolClosed,
            PoolError::Create(e) => TransformError::Spawn(e),
        }
    }
}

impl BuildService {
    pub fn new(transform: Arc<dyn Transform>, config: &WorkerConfig) -> Self {
        let mode = if config.enabled {
            Mode::Pooled(Pool::from_config(
                "build",
                WorkerManager::new(transform),
                &config.pool,
            ))
        } else {
            Mode::Inline(transform)
        };
        Self { mode }
    }

    /// `None` when workers are disabled.
    pub fn pool_status(&self) -> Option<PoolStatus> {
        match &self.mode {
            Mode::Pooled(pool) => Some(pool.status()),
            Mode::Inline(_) => None,
        }
    }

    pub async fn warm(&self) -> Result<(), TransformError> {
        if let Mode::Pooled(pool) = &self.mode {
            pool.warm().await?;
        }
        Ok(())
    }

    pub fn evict(&self, idle_for: Duration) -> usize {
        match &self.mode {
            Mode::Pooled(pool) => pool.evict(idle_for),
            Mode::Inline(_) => 0,
        }
    }

    pub fn shutdown(&self) {
        if let Mode::Pooled(pool) = &self.mode {
            pool.drain();
        }
    }

    pub async fn transform(
        &self,
        input: TransformInput,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError> {
        let start = Instant::now();
        let result = match &self.mode {
            Mode::Pooled(pool) => run_pooled(pool, input, cancel).await,
            Mode::Inline(transform) => run_inline(transform.clone(), input, cancel).await,
        };

        let label = match &result {
            Ok(_) => "ok",
            Err(TransformError::Cancelled) => "cancelled",
            Err(_) => "error",
        };
        metrics::record_transform(label, start);
        result
    }
}

async fn run_pooled(
    pool: &Pool<WorkerManager>,
    input: TransformInput,
    cancel: &CancellationToken,
) -> Result<TransformOutput, TransformError> {
    let worker = tokio::select! {
        worker = pool.acquire() => worker?,
        _ = cancel.cancelled() => return Err(TransformError::Cancelled),
    };

    let inflight = Inflight {
        worker: Some(worker),
        job: cancel.child_token(),
    };
    let result = match &inflight.worker {
        Some(worker) => worker.run(input, &inflight.job).await,
        None => Err(TransformError::WorkerLost),
    };
    let retire = matches!(result, Err(TransformError::Cancelled | TransformError::WorkerLost));
    inflight.finish(retire);
    result
}

/// A borrowed worker with a job in flight. Dropped before `finish`, the job
/// is cancelled and the worker retired, never returned while still busy.
struct Inflight {
    worker: Option<Pooled<WorkerManager>>,
    job: CancellationToken,
}

impl Inflight {
    fn finish(mut self, retire: bool) {
        if let Some(worker) = self.worker.take() {
            if retire {
                tracing::debug!(worker = worker.id(), "Retiring build worker");
                worker.discard();
            }
        }
    }
}

impl Drop for Inflight {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.job.cancel();
            tracing::debug!(worker = worker.id(), "Build job abandoned, retiring worker");
            worker.discard();
        }
    }
}

async fn run_inline(
    transform: Arc<dyn Transform>,
    input: TransformInput,
    cancel: &CancellationToken,
) -> Result<TransformOutput, TransformError> {
    let token = cancel.clone();
    let task = tokio::task::spawn_blocking(move || transform.transform(&input, &token));

    tokio::select! {
        joined = task => joined.unwrap_or(Err(TransformError::WorkerLost)),
        _ = cancel.cancelled() => Err(TransformError::Cancelled),
    }
}
