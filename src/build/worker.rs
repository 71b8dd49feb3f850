//! Build worker threads and their pool manager.
//!
//! A worker is a dedicated OS thread with a job queue. Jobs carry a oneshot
//! reply channel so the async side never blocks on the transform.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::build::transform::{Transform, TransformError, TransformInput, TransformOutput};
use crate::pool::Manager;

struct Job {
    input: TransformInput,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<TransformOutput, TransformError>>,
}

/// A transform thread. Dropping it closes the queue; the thread exits after
/// its current job.
pub struct Worker {
    id: usize,
    jobs: mpsc::Sender<Job>,
    handle: JoinHandle<()>,
}

impl Worker {
    pub fn spawn(id: usize, transform: Arc<dyn Transform>) -> io::Result<Self> {
        let (jobs, queue) = mpsc::channel::<Job>();
        let handle = thread::Builder::new()
            .name(format!("build-worker-{id}"))
            .spawn(move || {
                for job in queue {
                    let result = if job.cancel.is_cancelled() {
                        Err(TransformError::Cancelled)
                    } else {
                        transform.transform(&job.input, &job.cancel)
                    };
                    let _ = job.reply.send(result);
                }
            })?;

        tracing::debug!(worker = id, "Build worker started");
        Ok(Self { id, jobs, handle })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Run one job. Returns `Cancelled` as soon as `cancel` fires, without
    /// waiting for the thread.
    pub async fn run(
        &self,
        input: TransformInput,
        cancel: &CancellationToken,
    ) -> Result<TransformOutput, TransformError> {
        let (reply, result) = oneshot::channel();
        self.jobs
            .send(Job {
                input,
                cancel: cancel.clone(),
                reply,
            })
            .map_err(|_| TransformError::WorkerLost)?;

        tokio::select! {
            result = result => result.unwrap_or(Err(TransformError::WorkerLost)),
            _ = cancel.cancelled() => Err(TransformError::Cancelled),
        }
    }
}

/// Pool manager spawning [`Worker`] threads.
pub struct WorkerManager {
    transform: Arc<dyn Transform>,
    next_id: AtomicUsize,
}

impl WorkerManager {
    pub fn new(transform: Arc<dyn Transform>) -> Self {
        Self {
            transform,
            next_id: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Manager for WorkerManager {
    type Resource = Worker;
    type Error = io::Error;

    async fn create(&self) -> Result<Worker, io::Error> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Worker::spawn(id, self.transform.clone())
    }

    fn is_usable(&self, worker: &Worker) -> bool {
        worker.is_alive()
    }

    fn destroy(&self, worker: Worker) {
        tracing::debug!(worker = worker.id(), "Build worker retired");
    }
}
