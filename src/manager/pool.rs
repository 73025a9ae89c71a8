//! Bounded worker pool for scan jobs.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

#[derive(Debug)]
struct PoolState {
    max_workers: usize,
    active: AtomicUsize,
    peak: AtomicUsize,
    completed: AtomicU64,
}

/// Limits the number of scan jobs running at once.
///
/// Cloning the pool shares its permits and counters.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    state: Arc<PoolState>,
}

impl WorkerPool {
    /// Creates a pool with `max_workers` slots (at least one).
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_workers)),
            state: Arc::new(PoolState {
                max_workers,
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                completed: AtomicU64::new(0),
            }),
        }
    }

    /// Waits for a free slot. The slot is released when dropped.
    pub async fn acquire(&self) -> Result<WorkerSlot, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(active, Ordering::SeqCst);
        Ok(WorkerSlot {
            _permit: permit,
            state: Arc::clone(&self.state),
        })
    }

    /// Returns the maximum number of concurrent jobs.
    pub fn max_workers(&self) -> usize {
        self.state.max_workers
    }

    /// Returns the number of slots currently held.
    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    /// Returns the highest number of slots held at once.
    pub fn peak(&self) -> usize {
        self.state.peak.load(Ordering::SeqCst)
    }

    /// Returns the number of slots released so far.
    pub fn completed(&self) -> u64 {
        self.state.completed.load(Ordering::Relaxed)
    }
}

/// A held slot in a [`WorkerPool`].
#[derive(Debug)]
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    state: Arc<PoolState>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.state.active.fetch_sub(1, Ordering::SeqCst);
        self.state.completed.fetch_add(1, Ordering::Relaxed);
    }
}
