//! Scan orchestration.
//!
//! The [`BatchOrchestrator`] partitions a bucket listing into batches and
//! hands each object to an [`ObjectScanner`] running inside a bounded
//! [`WorkerPool`]. The scanner polls results with [`poll_until_done`].

mod orchestrator;
mod poll;
mod pool;
mod scanner;

pub use orchestrator::{BatchOrchestrator, RunReport, RunSummary};
pub use poll::poll_until_done;
pub use pool::{WorkerPool, WorkerSlot};
pub use scanner::{ObjectScanner, PendingArtifact};
