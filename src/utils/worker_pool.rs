// src/utils/worker_pool.rs
//! Bounded worker pool shared by every CPU- or process-bound stage.
//!
//! At most `size` jobs run at once. Callers beyond that wait for a slot, and once
//! `max_queued` callers are already waiting new submissions fail with
//! [`TrustError::Backpressure`] instead of piling up.

use crate::error::{Result, TrustError};
use log::debug;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit, TryAcquireError};

pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    max_queued: usize,
    queued: AtomicUsize,
}

/// Decrements the wait counter even if the waiting future is dropped.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(size: usize, max_queued: usize) -> Self {
        let size = size.max(1);
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            max_queued,
            queued: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        match self.permits.try_acquire() {
            Ok(permit) => return Ok(permit),
            Err(TryAcquireError::Closed) => {
                return Err(TrustError::WorkerFailure("worker pool closed".into()))
            }
            Err(TryAcquireError::NoPermits) => {}
        }

        let waiting = self.queued.fetch_add(1, Ordering::SeqCst);
        let _slot = QueueSlot(&self.queued);
        if waiting >= self.max_queued {
            return Err(TrustError::Backpressure { queued: waiting });
        }
        debug!("worker pool busy, {} job(s) waiting", waiting + 1);
        self.permits
            .acquire()
            .await
            .map_err(|_| TrustError::WorkerFailure("worker pool closed".into()))
    }

    /// Runs an async job (typically a subprocess call) while holding a pool slot.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _permit = self.acquire().await?;
        job.await
    }

    /// Runs a CPU-bound closure on the blocking thread pool while holding a slot.
    pub async fn spawn_blocking<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self.acquire().await?;
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| TrustError::WorkerFailure(e.to_string()))?
    }
}
