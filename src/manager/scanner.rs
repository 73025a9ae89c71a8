//! Single-object scan pipeline.
//!
//! An [`ObjectScanner`] takes one object through
//! `Uploading → ScanLaunching → Polling → Verdicted → CleaningUp → Done`.
//! Every failure is absorbed into the returned [`ObjectOutcome`]; nothing
//! here aborts the run.
//!
//! Once an upload succeeds, the uploaded artifact is deleted from the scan
//! service exactly once before the job returns, whatever happens after.

use crate::config::{PollConfig, RunConfig};
use crate::core::hasher::{digests_match, sha256_hex};
use crate::core::{
    ArcArtifactClient, ArcObjectStore, ArtifactError, BatchResult, ObjectDescriptor,
    ObjectOutcome, ScanStage, UploadReceipt,
};
use crate::manager::poll::poll_until_done;
use crate::policy::MitigationPolicy;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Hash of a sample a job has uploaded but not yet cleaned up.
///
/// Shared with the job's owner so that a job which dies mid-scan can still
/// have its sample removed from the scan service.
#[derive(Debug, Clone, Default)]
pub struct PendingArtifact(Arc<Mutex<Option<String>>>);

impl PendingArtifact {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, sha256: &str) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(sha256.to_string());
    }

    /// Takes the hash still owed a cleanup, if any.
    pub fn take(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Scans one object end to end.
#[derive(Debug, Clone)]
pub struct ObjectScanner {
    store: ArcObjectStore,
    client: ArcArtifactClient,
    poll: PollConfig,
    max_file_size: u64,
    mitigation: MitigationPolicy,
}

impl ObjectScanner {
    /// Creates a scanner for the given collaborators and run configuration.
    pub fn new(store: ArcObjectStore, client: ArcArtifactClient, config: &RunConfig) -> Self {
        Self {
            store,
            client,
            poll: config.poll.clone(),
            max_file_size: config.max_file_size,
            mitigation: MitigationPolicy::new(config.mitigate),
        }
    }

    /// Returns the object store this scanner reads from.
    pub fn store(&self) -> &ArcObjectStore {
        &self.store
    }

    /// Returns the mitigation policy.
    pub fn mitigation(&self) -> MitigationPolicy {
        self.mitigation
    }

    /// Runs the pipeline for `object`.
    pub async fn scan(&self, object: ObjectDescriptor) -> ObjectOutcome {
        self.scan_tracked(object, &PendingArtifact::new()).await
    }

    /// Runs the pipeline for `object`, recording the uploaded sample in
    /// `pending` until its cleanup has started.
    pub async fn scan_tracked(
        &self,
        object: ObjectDescriptor,
        pending: &PendingArtifact,
    ) -> ObjectOutcome {
        if object.size >= self.max_file_size {
            tracing::warn!(
                key = %object.key,
                size = object.size,
                max_file_size = self.max_file_size,
                "Skipping {}: File size {} bytes exceeds maximum of {} bytes",
                object.key,
                object.size,
                self.max_file_size
            );
            return ObjectOutcome::Skipped {
                object,
                max_file_size: self.max_file_size,
            };
        }

        let start = Instant::now();
        tracing::debug!(key = %object.key, stage = %ScanStage::Uploading, "Scan job started");

        let data = match self.store.fetch(&object).await {
            Ok(data) => data,
            Err(e) => return self.failed(object, ScanStage::Uploading, e.to_string(), None),
        };
        let local_digest = sha256_hex(&data);

        let receipt = match self.client.upload(data, &object.name).await {
            Ok(receipt) => receipt,
            Err(e) => return self.failed(object, ScanStage::Uploading, e.to_string(), None),
        };
        pending.set(&receipt.sha256);
        tracing::info!(
            key = %object.key,
            sha256 = %receipt.sha256,
            "Uploaded {} to {}",
            object.name,
            receipt.sha256
        );
        if !digests_match(&local_digest, &receipt.sha256) {
            tracing::warn!(
                key = %object.key,
                local = %local_digest,
                reported = %receipt.sha256,
                "Scan service reported a different hash than the uploaded content"
            );
        }

        let handle = match self.client.launch_scan(&receipt.sha256).await {
            Ok(handle) => handle,
            Err(e) => {
                match &e {
                    ArtifactError::LaunchRejected { message, .. } => tracing::warn!(
                        key = %object.key,
                        sha256 = %receipt.sha256,
                        "{}. Unable to launch scan for file.",
                        message
                    ),
                    ArtifactError::RateLimited { status } => tracing::warn!(
                        key = %object.key,
                        status,
                        "Rate limit exceeded."
                    ),
                    other => tracing::warn!(
                        key = %object.key,
                        error = %other,
                        "Unable to launch scan for file"
                    ),
                }
                pending.take();
                self.cleanup(&object, &receipt.sha256).await;
                return ObjectOutcome::Failed {
                    object,
                    stage: ScanStage::ScanLaunching,
                    reason: e.to_string(),
                    receipt: Some(receipt),
                };
            }
        };
        tracing::info!(
            key = %object.key,
            scan_id = %handle.scan_id,
            stage = %ScanStage::Polling,
            "Scan {} submitted for analysis",
            handle.scan_id
        );

        let verdicts = match poll_until_done(self.client.as_ref(), &handle, &self.poll).await {
            Ok(verdicts) => Some(verdicts),
            Err(e) => {
                tracing::warn!(
                    key = %object.key,
                    scan_id = %handle.scan_id,
                    error = %e,
                    "No scan result for {}",
                    object.key
                );
                None
            }
        };

        let mut result = BatchResult {
            object,
            receipt,
            handle,
            verdicts,
            mitigation: None,
        };

        let matched = result.matching_verdict().map(|v| v.verdict.clone());
        match matched {
            Some(verdict) => {
                tracing::debug!(
                    key = %result.object.key,
                    verdict = %verdict,
                    stage = %ScanStage::Verdicted,
                    "Verdict selected"
                );
                result.mitigation = self
                    .mitigation
                    .apply(self.store.as_ref(), &result.object, &verdict)
                    .await;
            }
            None if result.verdicts.is_some() => {
                tracing::warn!(
                    key = %result.object.key,
                    sha256 = %result.receipt.sha256,
                    "Scan result did not contain a verdict for the uploaded sample"
                );
            }
            None => {}
        }

        pending.take();
        self.cleanup(&result.object, &result.receipt.sha256).await;
        tracing::debug!(
            key = %result.object.key,
            stage = %ScanStage::Done,
            duration_ms = start.elapsed().as_millis() as u64,
            "Scan job finished"
        );
        ObjectOutcome::Scanned(result)
    }

    /// Deletes an uploaded artifact. Failures are logged only.
    pub(crate) async fn cleanup(&self, object: &ObjectDescriptor, sha256: &str) {
        tracing::debug!(
            key = %object.key,
            sha256 = %sha256,
            stage = %ScanStage::CleaningUp,
            "Removing uploaded artifact"
        );
        if let Err(e) = self.client.delete_artifact(sha256).await {
            tracing::warn!(
                key = %object.key,
                sha256 = %sha256,
                error = %e,
                "Failed to remove uploaded artifact"
            );
        }
    }

    fn failed(
        &self,
        object: ObjectDescriptor,
        stage: ScanStage,
        reason: String,
        receipt: Option<UploadReceipt>,
    ) -> ObjectOutcome {
        tracing::error!(
            key = %object.key,
            stage = %stage,
            error = %reason,
            "Error processing file {}: {}",
            object.key,
            reason
        );
        ObjectOutcome::Failed {
            object,
            stage,
            reason,
            receipt,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{LaunchFailure, MockArtifactClient, MockObjectStore};
    use crate::core::{Verdict, VerdictClass};
    use crate::policy::MitigationOutcome;
    use std::sync::Arc;
    use std::time::Duration;

    fn config() -> RunConfig {
        RunConfig::new()
            .with_poll_interval(Duration::from_millis(10))
            .with_max_file_size(1024)
    }

    fn scanner(
        store: MockObjectStore,
        client: MockArtifactClient,
        config: &RunConfig,
    ) -> (ObjectScanner, Arc<MockObjectStore>, Arc<MockArtifactClient>) {
        let store = Arc::new(store);
        let client = Arc::new(client);
        let scanner = ObjectScanner::new(store.clone(), client.clone(), config);
        (scanner, store, client)
    }

    #[tokio::test(start_paused = true)]
    async fn test_clean_object() {
        let (scanner, store, client) = scanner(
            MockObjectStore::new("b").with_object("docs/a.txt", b"hello".to_vec()),
            MockArtifactClient::new(),
            &config(),
        );

        let outcome = scanner.scan(ObjectDescriptor::new("docs/a.txt", 5)).await;
        assert_eq!(outcome.verdict_class(), Some(VerdictClass::Clean));
        assert_eq!(outcome.summary(), "No threat found in docs/a.txt");
        assert_eq!(client.delete_calls_for(b"hello"), 1);
        assert!(store.contains("docs/a.txt"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_makes_no_calls() {
        let (scanner, store, client) = scanner(
            MockObjectStore::new("b").with_sized_object("big.iso", 1024),
            MockArtifactClient::new(),
            &config(),
        );

        let outcome = scanner.scan(ObjectDescriptor::new("big.iso", 1024)).await;
        assert!(outcome.is_skipped());
        assert!(store.fetched_keys().is_empty());
        assert_eq!(client.upload_count(), 0);
        assert_eq!(client.launch_count(), 0);
        assert!(client.deleted_artifacts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_threat_removed_when_mitigating() {
        let (scanner, store, client) = scanner(
            MockObjectStore::new("b").with_object("evil.exe", b"evil".to_vec()),
            MockArtifactClient::new().with_verdict_for(b"evil", Verdict::Malicious),
            &config(),
        );

        let outcome = scanner.scan(ObjectDescriptor::new("evil.exe", 4)).await;
        let result = outcome.batch_result().unwrap();
        assert_eq!(result.mitigation, Some(MitigationOutcome::Removed));
        assert!(!store.contains("evil.exe"));
        assert_eq!(client.delete_calls_for(b"evil"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threat_kept_when_not_mitigating() {
        let (scanner, store, _client) = scanner(
            MockObjectStore::new("b").with_object("evil.exe", b"evil".to_vec()),
            MockArtifactClient::new().with_verdict_for(b"evil", Verdict::Suspicious),
            &config().with_mitigation(false),
        );

        let outcome = scanner.scan(ObjectDescriptor::new("evil.exe", 4)).await;
        assert_eq!(
            outcome.batch_result().unwrap().mitigation,
            Some(MitigationOutcome::Disabled)
        );
        assert!(store.contains("evil.exe"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_launch_failure_still_cleans_up() {
        let (scanner, _store, client) = scanner(
            MockObjectStore::new("b")
                .with_object("a", b"a".to_vec())
                .with_object("b", b"b".to_vec()),
            MockArtifactClient::new()
                .with_launch_failure(b"a", LaunchFailure::RateLimited)
                .with_launch_failure(b"b", LaunchFailure::Rejected("bad sample".into())),
            &config(),
        );

        for key in ["a", "b"] {
            let outcome = scanner.scan(ObjectDescriptor::new(key, 1)).await;
            match outcome {
                ObjectOutcome::Failed {
                    stage, receipt, ..
                } => {
                    assert_eq!(stage, ScanStage::ScanLaunching);
                    assert!(receipt.is_some());
                }
                other => panic!("expected failure, got {:?}", other),
            }
        }
        assert_eq!(client.delete_calls_for(b"a"), 1);
        assert_eq!(client.delete_calls_for(b"b"), 1);
        assert_eq!(client.poll_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_failure_makes_no_cleanup() {
        let (scanner, _store, client) = scanner(
            MockObjectStore::new("b").with_object("a", b"a".to_vec()),
            MockArtifactClient::new().with_upload_failure(b"a"),
            &config(),
        );

        let outcome = scanner.scan(ObjectDescriptor::new("a", 1)).await;
        assert!(matches!(
            outcome,
            ObjectOutcome::Failed {
                stage: ScanStage::Uploading,
                receipt: None,
                ..
            }
        ));
        assert!(client.deleted_artifacts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_is_isolated() {
        let (scanner, _store, client) = scanner(
            MockObjectStore::new("b")
                .with_object("a", b"a".to_vec())
                .with_fetch_failure("a"),
            MockArtifactClient::new(),
            &config(),
        );

        let outcome = scanner.scan(ObjectDescriptor::new("a", 1)).await;
        assert!(outcome.is_failed());
        assert_eq!(client.upload_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeout_degrades_and_cleans_up() {
        let config = config().with_poll(
            PollConfig::new()
                .with_interval(Duration::from_secs(1))
                .with_max_attempts(3),
        );
        let (scanner, _store, client) = scanner(
            MockObjectStore::new("b").with_object("slow", b"slow".to_vec()),
            MockArtifactClient::new().with_unfinished_scan(b"slow"),
            &config,
        );

        let outcome = scanner.scan(ObjectDescriptor::new("slow", 4)).await;
        let result = outcome.batch_result().unwrap();
        assert!(result.verdicts.is_none());
        assert_eq!(outcome.summary(), "No verdict available for slow");
        assert_eq!(client.poll_count(), 3);
        assert_eq!(client.delete_calls_for(b"slow"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mismatched_verdict_is_ignored() {
        let (scanner, store, client) = scanner(
            MockObjectStore::new("b").with_object("a", b"a".to_vec()),
            MockArtifactClient::new()
                .with_verdict_for(b"a", Verdict::Clean)
                .with_extra_artifact("ffff", Verdict::Malicious),
            &config(),
        );

        let outcome = scanner.scan(ObjectDescriptor::new("a", 1)).await;
        assert_eq!(outcome.verdict_class(), Some(VerdictClass::Clean));
        assert!(store.contains("a"));
        assert_eq!(client.delete_calls_for(b"a"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_artifact_delete_failure_does_not_fail_job() {
        let (scanner, _store, client) = scanner(
            MockObjectStore::new("b").with_object("a", b"a".to_vec()),
            MockArtifactClient::new().with_delete_failure(b"a"),
            &config(),
        );

        let outcome = scanner.scan(ObjectDescriptor::new("a", 1)).await;
        assert_eq!(outcome.verdict_class(), Some(VerdictClass::Clean));
        assert_eq!(client.delete_calls_for(b"a"), 1);
    }
}
