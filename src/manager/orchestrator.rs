//! Batch orchestration of a whole bucket scan.

use crate::config::RunConfig;
use crate::core::{
    ArcArtifactClient, ArcObjectStore, ConfigError, ObjectDescriptor, ObjectOutcome, RunError,
    ScanStage, VerdictClass,
};
use crate::manager::pool::WorkerPool;
use crate::manager::scanner::{ObjectScanner, PendingArtifact};
use crate::report::{ReportEntry, VerdictReporter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tokio::task::JoinSet;
use uuid::Uuid;

/// Progress is logged every this many completions within a batch.
const PROGRESS_EVERY: usize = 10;

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Unique identifier of the run.
    pub run_id: Uuid,
    /// Bucket that was scanned.
    pub bucket: String,
    /// Objects in the listing.
    pub total: usize,
    /// Batches processed.
    pub batches: usize,
    /// Objects uploaded and scanned.
    pub scanned: usize,
    /// Clean verdicts.
    pub clean: usize,
    /// Unknown verdicts.
    pub unknown: usize,
    /// Malicious or suspicious verdicts.
    pub threats: usize,
    /// Unrecognised verdicts.
    pub unrecognized: usize,
    /// Scans that produced no verdict for the uploaded sample.
    pub no_verdict: usize,
    /// Objects skipped for size.
    pub skipped: usize,
    /// Jobs that failed.
    pub failed: usize,
    /// Threats removed from the bucket.
    pub mitigated: usize,
    /// Highest number of jobs that ran at once.
    pub peak_workers: usize,
    /// When the run started.
    pub started_at: Option<DateTime<Utc>>,
    /// Wall time of the run in milliseconds.
    pub duration_ms: u64,
}

impl RunSummary {
    fn record(&mut self, outcome: &ObjectOutcome) {
        match outcome {
            ObjectOutcome::Skipped { .. } => self.skipped += 1,
            ObjectOutcome::Failed { .. } => self.failed += 1,
            ObjectOutcome::Scanned(result) => {
                self.scanned += 1;
                match outcome.verdict_class() {
                    Some(VerdictClass::Clean) => self.clean += 1,
                    Some(VerdictClass::Unknown) => self.unknown += 1,
                    Some(VerdictClass::Threat) => self.threats += 1,
                    Some(VerdictClass::Unrecognized) => self.unrecognized += 1,
                    None => self.no_verdict += 1,
                }
                if result.mitigation.as_ref().is_some_and(|m| m.is_removed()) {
                    self.mitigated += 1;
                }
            }
        }
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Aggregate counters.
    pub summary: RunSummary,
    /// One outcome per listed object, in listing order.
    pub outcomes: Vec<ObjectOutcome>,
    /// Reported verdicts, in the order the scans completed.
    pub verdicts: Vec<ReportEntry>,
}

/// Partitions a bucket listing into batches and scans each batch with a
/// bounded number of concurrent jobs.
///
/// Batches run one after another; a batch finishes only when all of its jobs
/// have finished. A failing or panicking job never affects its siblings.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    scanner: ObjectScanner,
    reporter: VerdictReporter,
    config: RunConfig,
}

impl BatchOrchestrator {
    /// Creates an orchestrator, rejecting an invalid configuration.
    pub fn new(
        store: ArcObjectStore,
        client: ArcArtifactClient,
        config: RunConfig,
    ) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        Ok(Self {
            scanner: ObjectScanner::new(store, client, &config),
            reporter: VerdictReporter::new(),
            config,
        })
    }

    /// Returns the run configuration.
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Lists the bucket and scans every object in it.
    ///
    /// Only a listing failure is returned as an error.
    pub async fn run(&self) -> Result<RunReport, RunError> {
        let store = self.scanner.store();
        let objects = store.list().await.map_err(|e| {
            tracing::error!(
                bucket = store.bucket(),
                error = %e,
                "Unable to connect to bucket {}. {}",
                store.bucket(),
                e
            );
            RunError::from(e)
        })?;

        if !self.scanner.mitigation().is_enabled() {
            tracing::warn!(
                bucket = store.bucket(),
                "Mitigation disabled, threats will be reported but not removed"
            );
        }
        Ok(self.run_objects(objects).await)
    }

    /// Scans an already obtained listing.
    pub async fn run_objects(&self, objects: Vec<ObjectDescriptor>) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let total = objects.len();
        let batch_size = self.config.batch_size;
        let pool = WorkerPool::new(self.config.max_workers);

        tracing::info!(
            run_id = %run_id,
            total,
            batch_size,
            max_workers = self.config.max_workers,
            "Processing {} files in batches of {} using {} worker threads",
            total,
            batch_size,
            self.config.max_workers
        );

        let mut summary = RunSummary {
            run_id,
            bucket: self.scanner.store().bucket().to_string(),
            total,
            started_at: Some(started_at),
            ..RunSummary::default()
        };
        let mut outcomes = Vec::with_capacity(total);
        let mut verdicts = Vec::new();

        for (index, batch) in objects.chunks(batch_size).enumerate() {
            let number = index + 1;
            let first = index * batch_size + 1;
            tracing::info!(
                batch = number,
                "Processing batch {}: files {} to {} ({} files)",
                number,
                first,
                first + batch.len() - 1,
                batch.len()
            );

            let batch_outcomes = self
                .run_batch(batch, &pool, &mut summary, &mut verdicts)
                .await;
            outcomes.extend(batch_outcomes);
            summary.batches += 1;
            tracing::info!(batch = number, "Completed batch {}", number);
        }

        summary.peak_workers = pool.peak();
        summary.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            run_id = %run_id,
            total,
            scanned = summary.scanned,
            threats = summary.threats,
            failed = summary.failed,
            skipped = summary.skipped,
            "Completed processing all {} files",
            total
        );

        RunReport {
            summary,
            outcomes,
            verdicts,
        }
    }

    /// Runs one batch to completion.
    ///
    /// Each outcome is reported and counted as soon as its job finishes. The
    /// returned outcomes keep the batch's order.
    async fn run_batch(
        &self,
        batch: &[ObjectDescriptor],
        pool: &WorkerPool,
        summary: &mut RunSummary,
        verdicts: &mut Vec<ReportEntry>,
    ) -> Vec<ObjectOutcome> {
        let mut jobs = JoinSet::new();
        let mut pending = HashMap::with_capacity(batch.len());

        for (position, object) in batch.iter().cloned().enumerate() {
            let scanner = self.scanner.clone();
            let pool = pool.clone();
            let job_object = object.clone();
            let artifact = PendingArtifact::new();
            let job_artifact = artifact.clone();
            let handle = jobs.spawn(async move {
                let outcome = match pool.acquire().await {
                    Ok(_slot) => scanner.scan_tracked(job_object, &job_artifact).await,
                    Err(e) => ObjectOutcome::Failed {
                        object: job_object,
                        stage: ScanStage::Uploading,
                        reason: e.to_string(),
                        receipt: None,
                    },
                };
                (position, outcome)
            });
            pending.insert(handle.id(), (position, object, artifact));
        }

        let mut finished: Vec<(usize, ObjectOutcome)> = Vec::with_capacity(batch.len());
        while let Some(joined) = jobs.join_next_with_id().await {
            let (position, outcome) = match joined {
                Ok((id, done)) => {
                    pending.remove(&id);
                    done
                }
                Err(e) => {
                    let Some((position, object, artifact)) = pending.remove(&e.id()) else {
                        tracing::error!(error = %e, "Scan job failed");
                        continue;
                    };
                    tracing::error!(key = %object.key, error = %e, "Scan job panicked");
                    if let Some(sha256) = artifact.take() {
                        self.scanner.cleanup(&object, &sha256).await;
                    }
                    let outcome = ObjectOutcome::Failed {
                        object,
                        stage: ScanStage::Failed,
                        reason: e.to_string(),
                        receipt: None,
                    };
                    (position, outcome)
                }
            };

            if let Some(entry) = outcome.batch_result().and_then(|r| self.reporter.report(r)) {
                verdicts.push(entry);
            }
            summary.record(&outcome);
            finished.push((position, outcome));

            let completed = finished.len();
            if completed % PROGRESS_EVERY == 0 {
                tracing::info!(
                    completed,
                    total = batch.len(),
                    "Batch progress: {}/{} files",
                    completed,
                    batch.len()
                );
            }
        }

        finished.sort_by_key(|(position, _)| *position);
        finished.into_iter().map(|(_, outcome)| outcome).collect()
    }
}
