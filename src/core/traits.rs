//! Collaborator traits.
//!
//! The scanner and orchestrator only talk to storage and to the scan
//! service through these two traits. Client instances are constructed once
//! per run and shared between workers behind an `Arc`.

use crate::core::error::{ArtifactError, StoreError};
use crate::core::types::{ObjectDescriptor, PollStatus, ScanHandle, UploadReceipt};

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Debug;
use std::sync::Arc;

/// Access to the bucket being scanned.
///
/// Implementations are bound to one bucket at construction time and must be
/// safe for concurrent use across workers.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync + Debug {
    /// Returns the name of the bucket this client reads from.
    fn bucket(&self) -> &str;

    /// Enumerates every object in the bucket.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Connection` if the bucket is unreachable or does
    /// not exist. A partial listing is never returned.
    async fn list(&self) -> Result<Vec<ObjectDescriptor>, StoreError>;

    /// Reads the full content of an object.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Fetch` on failure. This only affects the one object.
    async fn fetch(&self, object: &ObjectDescriptor) -> Result<Bytes, StoreError>;

    /// Deletes an object from the bucket.
    ///
    /// Callers treat this as best-effort and only log failures.
    async fn delete(&self, object: &ObjectDescriptor) -> Result<(), StoreError>;
}

/// Access to the scan service that holds uploaded samples.
#[async_trait]
pub trait ScanArtifactClient: Send + Sync + Debug {
    /// Returns the name of this scan service, used in logs.
    fn name(&self) -> &str;

    /// Uploads a sample.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::Upload` when the service answers with a status above 201.
    async fn upload(&self, data: Bytes, filename: &str) -> Result<UploadReceipt, ArtifactError>;

    /// Launches a scan of a previously uploaded sample.
    ///
    /// # Errors
    ///
    /// Returns `ArtifactError::LaunchRejected` when the service explains the refusal,
    /// and `ArtifactError::RateLimited` when it does not.
    async fn launch_scan(&self, sha256: &str) -> Result<ScanHandle, ArtifactError>;

    /// Polls once for the result of a scan.
    ///
    /// Returns `PollStatus::Pending` until the service reports `done` with a
    /// populated result.
    async fn poll_result(&self, handle: &ScanHandle) -> Result<PollStatus, ArtifactError>;

    /// Removes an uploaded sample from the service.
    ///
    /// Callers treat this as best-effort and only log failures.
    async fn delete_artifact(&self, sha256: &str) -> Result<(), ArtifactError>;
}

/// A shared object store client.
pub type ArcObjectStore = Arc<dyn ObjectStoreClient>;

/// A shared scan service client.
pub type ArcArtifactClient = Arc<dyn ScanArtifactClient>;
