//! In-memory collaborators for testing.
//!
//! [`MockObjectStore`] holds a bucket in memory and [`MockArtifactClient`]
//! simulates the scan service. Both record every call so tests can assert
//! on exactly what a run did, and both can be told to fail for specific
//! objects.
//!
//! # Examples
//!
//! ```rust
//! use bucketguard::backends::{MockArtifactClient, MockObjectStore};
//! use bucketguard::core::Verdict;
//! use std::time::Duration;
//!
//! let store = MockObjectStore::new("uploads")
//!     .with_object("docs/readme.txt", b"hello".to_vec())
//!     .with_object("bin/dropper.exe", b"evil".to_vec());
//!
//! let scanner = MockArtifactClient::new()
//!     .with_verdict_for(b"evil", Verdict::Malicious)
//!     .with_pending_polls(2)
//!     .with_latency(Duration::from_millis(5));
//! ```

use crate::core::hasher::sha256_hex;
use crate::core::{
    ArtifactError, ObjectDescriptor, ObjectStoreClient, PollStatus, ScanArtifactClient, ScanHandle,
    ScanVerdict, StoreError, UploadReceipt, Verdict,
};

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
struct MockObject {
    data: Bytes,
    size: u64,
}

/// An in-memory bucket.
#[derive(Debug)]
pub struct MockObjectStore {
    bucket: String,
    objects: Mutex<BTreeMap<String, MockObject>>,
    list_failure: Option<String>,
    fetch_failures: HashSet<String>,
    delete_failures: HashSet<String>,
    list_count: AtomicU64,
    fetched: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

impl MockObjectStore {
    /// Creates an empty bucket.
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(BTreeMap::new()),
            list_failure: None,
            fetch_failures: HashSet::new(),
            delete_failures: HashSet::new(),
            list_count: AtomicU64::new(0),
            fetched: Mutex::new(Vec::new()),
            deleted: Mutex::new(Vec::new()),
        }
    }

    /// Adds an object whose listed size is its content length.
    pub fn with_object(self, key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let size = data.len() as u64;
        self.insert(key.into(), MockObject { data, size });
        self
    }

    /// Adds an object that is listed with `size` bytes but holds no content.
    ///
    /// Useful for exercising the size threshold without allocating.
    pub fn with_sized_object(self, key: impl Into<String>, size: u64) -> Self {
        self.insert(
            key.into(),
            MockObject {
                data: Bytes::new(),
                size,
            },
        );
        self
    }

    /// Makes `list` fail as if the bucket did not exist.
    pub fn with_list_failure(mut self, message: impl Into<String>) -> Self {
        self.list_failure = Some(message.into());
        self
    }

    /// Makes `fetch` fail for one key.
    pub fn with_fetch_failure(mut self, key: impl Into<String>) -> Self {
        self.fetch_failures.insert(key.into());
        self
    }

    /// Makes `delete` fail for one key.
    pub fn with_delete_failure(mut self, key: impl Into<String>) -> Self {
        self.delete_failures.insert(key.into());
        self
    }

    /// Adds an object after construction.
    pub fn insert_object(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        let data = data.into();
        let size = data.len() as u64;
        self.insert(key.into(), MockObject { data, size });
    }

    fn insert(&self, key: String, object: MockObject) {
        lock(&self.objects).insert(key, object);
    }

    /// Returns `true` if the bucket still holds `key`.
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.objects).contains_key(key)
    }

    /// Returns the number of objects in the bucket.
    pub fn len(&self) -> usize {
        lock(&self.objects).len()
    }

    /// Returns `true` if the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many times the bucket was listed.
    pub fn list_count(&self) -> u64 {
        self.list_count.load(Ordering::Relaxed)
    }

    /// Returns the keys fetched so far, in call order.
    pub fn fetched_keys(&self) -> Vec<String> {
        lock(&self.fetched).clone()
    }

    /// Returns the keys deleted so far, in call order.
    pub fn deleted_keys(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }
}

#[async_trait]
impl ObjectStoreClient for MockObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self) -> Result<Vec<ObjectDescriptor>, StoreError> {
        self.list_count.fetch_add(1, Ordering::Relaxed);
        if let Some(message) = &self.list_failure {
            return Err(StoreError::connection(&self.bucket, message.clone()));
        }
        Ok(lock(&self.objects)
            .iter()
            .map(|(key, object)| ObjectDescriptor::new(key.clone(), object.size))
            .collect())
    }

    async fn fetch(&self, object: &ObjectDescriptor) -> Result<Bytes, StoreError> {
        lock(&self.fetched).push(object.key.clone());
        if self.fetch_failures.contains(&object.key) {
            return Err(StoreError::fetch(&object.key, "simulated fetch failure"));
        }
        lock(&self.objects)
            .get(&object.key)
            .map(|o| o.data.clone())
            .ok_or_else(|| StoreError::fetch(&object.key, "no such object"))
    }

    async fn delete(&self, object: &ObjectDescriptor) -> Result<(), StoreError> {
        if self.delete_failures.contains(&object.key) {
            return Err(StoreError::delete(&object.key, "simulated delete failure"));
        }
        match lock(&self.objects).remove(&object.key) {
            Some(_) => {
                lock(&self.deleted).push(object.key.clone());
                Ok(())
            }
            None => Err(StoreError::delete(&object.key, "no such object")),
        }
    }
}

/// How a scripted scan launch fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchFailure {
    /// Refused without an error body.
    RateLimited,
    /// Refused with an explicit error message.
    Rejected(String),
}

#[derive(Debug, Clone)]
struct MockScan {
    sha256: String,
    polls: u32,
}

/// A simulated scan service.
///
/// Samples are identified by the SHA-256 of their content, so behaviour is
/// configured per content rather than per object key.
#[derive(Debug)]
pub struct MockArtifactClient {
    name: String,
    default_verdict: Verdict,
    verdicts: HashMap<String, Verdict>,
    pending_polls: u32,
    pending_polls_for: HashMap<String, u32>,
    extra_artifacts: Vec<ScanVerdict>,
    latency: Option<Duration>,
    upload_failures: HashSet<String>,
    launch_failures: HashMap<String, LaunchFailure>,
    poll_failures: HashSet<String>,
    rate_limited_polls: HashMap<String, u32>,
    poll_panics: HashSet<String>,
    unfinished: HashSet<String>,
    delete_failures: HashSet<String>,
    scans: Mutex<HashMap<String, MockScan>>,
    upload_count: AtomicU64,
    launch_count: AtomicU64,
    poll_count: AtomicU64,
    deleted: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl MockArtifactClient {
    /// Creates a service that reports every sample clean on the first poll.
    pub fn new() -> Self {
        Self {
            name: "mock".to_string(),
            default_verdict: Verdict::Clean,
            verdicts: HashMap::new(),
            pending_polls: 0,
            pending_polls_for: HashMap::new(),
            extra_artifacts: Vec::new(),
            latency: None,
            upload_failures: HashSet::new(),
            launch_failures: HashMap::new(),
            poll_failures: HashSet::new(),
            rate_limited_polls: HashMap::new(),
            poll_panics: HashSet::new(),
            unfinished: HashSet::new(),
            delete_failures: HashSet::new(),
            scans: Mutex::new(HashMap::new()),
            upload_count: AtomicU64::new(0),
            launch_count: AtomicU64::new(0),
            poll_count: AtomicU64::new(0),
            deleted: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak_active: AtomicUsize::new(0),
        }
    }

    /// Sets the name of this service.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the verdict for samples without a specific one.
    pub fn with_default_verdict(mut self, verdict: Verdict) -> Self {
        self.default_verdict = verdict;
        self
    }

    /// Sets the verdict for a specific content.
    pub fn with_verdict_for(mut self, content: &[u8], verdict: Verdict) -> Self {
        self.verdicts.insert(sha256_hex(content), verdict);
        self
    }

    /// Number of polls answered `Pending` before a scan is done.
    pub fn with_pending_polls(mut self, polls: u32) -> Self {
        self.pending_polls = polls;
        self
    }

    /// Overrides the number of pending polls for scans of `content`.
    pub fn with_pending_polls_for(mut self, content: &[u8], polls: u32) -> Self {
        self.pending_polls_for.insert(sha256_hex(content), polls);
        self
    }

    /// Adds an artifact for an unrelated hash to every finished scan.
    pub fn with_extra_artifact(mut self, sha256: impl Into<String>, verdict: Verdict) -> Self {
        self.extra_artifacts.push(ScanVerdict::new(sha256, verdict));
        self
    }

    /// Sets a simulated latency applied to every upload.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes uploads of `content` fail.
    pub fn with_upload_failure(mut self, content: &[u8]) -> Self {
        self.upload_failures.insert(sha256_hex(content));
        self
    }

    /// Makes scan launches for `content` fail.
    pub fn with_launch_failure(mut self, content: &[u8], failure: LaunchFailure) -> Self {
        self.launch_failures.insert(sha256_hex(content), failure);
        self
    }

    /// Makes every poll for `content` fail.
    pub fn with_poll_failure(mut self, content: &[u8]) -> Self {
        self.poll_failures.insert(sha256_hex(content));
        self
    }

    /// Answers the first `polls` polls for `content` with a rate limit.
    pub fn with_rate_limited_polls(mut self, content: &[u8], polls: u32) -> Self {
        self.rate_limited_polls.insert(sha256_hex(content), polls);
        self
    }

    /// Makes polls for `content` panic.
    pub fn with_poll_panic(mut self, content: &[u8]) -> Self {
        self.poll_panics.insert(sha256_hex(content));
        self
    }

    /// Makes scans of `content` never finish.
    pub fn with_unfinished_scan(mut self, content: &[u8]) -> Self {
        self.unfinished.insert(sha256_hex(content));
        self
    }

    /// Makes artifact deletion for `content` fail.
    pub fn with_delete_failure(mut self, content: &[u8]) -> Self {
        self.delete_failures.insert(sha256_hex(content));
        self
    }

    /// Returns the number of uploads.
    pub fn upload_count(&self) -> u64 {
        self.upload_count.load(Ordering::Relaxed)
    }

    /// Returns the number of scan launches.
    pub fn launch_count(&self) -> u64 {
        self.launch_count.load(Ordering::Relaxed)
    }

    /// Returns the total number of polls.
    pub fn poll_count(&self) -> u64 {
        self.poll_count.load(Ordering::Relaxed)
    }

    /// Returns the hashes passed to `delete_artifact`, in call order.
    pub fn deleted_artifacts(&self) -> Vec<String> {
        lock(&self.deleted).clone()
    }

    /// Returns the number of `delete_artifact` calls for one content.
    pub fn delete_calls_for(&self, content: &[u8]) -> usize {
        let sha256 = sha256_hex(content);
        lock(&self.deleted).iter().filter(|h| **h == sha256).count()
    }

    /// Returns the highest number of uploads that were in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn verdict_for(&self, sha256: &str) -> Verdict {
        self.verdicts
            .get(sha256)
            .cloned()
            .unwrap_or_else(|| self.default_verdict.clone())
    }
}

impl Default for MockArtifactClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScanArtifactClient for MockArtifactClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn upload(&self, data: Bytes, _filename: &str) -> Result<UploadReceipt, ArtifactError> {
        self.upload_count.fetch_add(1, Ordering::Relaxed);
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(active, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        let sha256 = sha256_hex(&data);
        if self.upload_failures.contains(&sha256) {
            return Err(ArtifactError::Upload {
                status: 403,
                message: "simulated upload failure".into(),
            });
        }
        Ok(UploadReceipt::new(sha256, 200))
    }

    async fn launch_scan(&self, sha256: &str) -> Result<ScanHandle, ArtifactError> {
        let n = self.launch_count.fetch_add(1, Ordering::Relaxed) + 1;
        match self.launch_failures.get(sha256) {
            Some(LaunchFailure::RateLimited) => {
                return Err(ArtifactError::RateLimited { status: 429 })
            }
            Some(LaunchFailure::Rejected(message)) => {
                return Err(ArtifactError::LaunchRejected {
                    status: 400,
                    message: message.clone(),
                })
            }
            None => {}
        }

        let scan_id = format!("scan-{}", n);
        lock(&self.scans).insert(
            scan_id.clone(),
            MockScan {
                sha256: sha256.to_string(),
                polls: 0,
            },
        );
        Ok(ScanHandle::new(scan_id, sha256))
    }

    async fn poll_result(&self, handle: &ScanHandle) -> Result<PollStatus, ArtifactError> {
        self.poll_count.fetch_add(1, Ordering::Relaxed);

        let (sha256, polls) = {
            let mut scans = lock(&self.scans);
            let scan = scans.get_mut(&handle.scan_id).ok_or(ArtifactError::Poll {
                status: 404,
                message: format!("unknown scan {}", handle.scan_id),
            })?;
            scan.polls += 1;
            (scan.sha256.clone(), scan.polls)
        };

        if self.poll_panics.contains(&sha256) {
            panic!("simulated panic while polling {}", handle.scan_id);
        }
        if self.poll_failures.contains(&sha256) {
            return Err(ArtifactError::Poll {
                status: 500,
                message: "simulated poll failure".into(),
            });
        }
        if self
            .rate_limited_polls
            .get(&sha256)
            .is_some_and(|limited| polls <= *limited)
        {
            return Err(ArtifactError::RateLimited { status: 429 });
        }
        let pending_polls = self
            .pending_polls_for
            .get(&sha256)
            .copied()
            .unwrap_or(self.pending_polls);
        if self.unfinished.contains(&sha256) || polls <= pending_polls {
            return Ok(PollStatus::Pending);
        }

        let verdict = self.verdict_for(&sha256);
        let detail = serde_json::json!({ "sha256": sha256, "verdict": verdict.to_string() });
        let mut artifacts = self.extra_artifacts.clone();
        artifacts.push(ScanVerdict::new(sha256, verdict).with_detail(detail));
        Ok(PollStatus::Done(artifacts))
    }

    async fn delete_artifact(&self, sha256: &str) -> Result<(), ArtifactError> {
        lock(&self.deleted).push(sha256.to_string());
        if self.delete_failures.contains(sha256) {
            return Err(ArtifactError::Delete {
                sha256: sha256.to_string(),
                status: 500,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_store_roundtrip() {
        let store = MockObjectStore::new("bucket")
            .with_object("a/one.txt", b"one".to_vec())
            .with_sized_object("b/huge.bin", 1 << 40);

        let listing = store.list().await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[0].key, "a/one.txt");
        assert_eq!(listing[0].name, "one.txt");
        assert_eq!(listing[1].size, 1 << 40);

        let data = store.fetch(&listing[0]).await.unwrap();
        assert_eq!(&data[..], b"one");

        store.delete(&listing[0]).await.unwrap();
        assert!(!store.contains("a/one.txt"));
        assert_eq!(store.deleted_keys(), vec!["a/one.txt".to_string()]);
    }

    #[tokio::test]
    async fn test_mock_store_failures() {
        let store = MockObjectStore::new("bucket").with_list_failure("bucket not found");
        assert!(matches!(
            store.list().await,
            Err(StoreError::Connection { .. })
        ));

        let store = MockObjectStore::new("bucket")
            .with_object("k", b"v".to_vec())
            .with_fetch_failure("k");
        let object = ObjectDescriptor::new("k", 1);
        assert!(matches!(
            store.fetch(&object).await,
            Err(StoreError::Fetch { .. })
        ));
    }

    #[tokio::test]
    async fn test_mock_client_scan_flow() {
        let client = MockArtifactClient::new()
            .with_name("scripted")
            .with_verdict_for(b"evil", Verdict::Malicious)
            .with_pending_polls(1);
        assert_eq!(client.name(), "scripted");

        let receipt = client.upload(Bytes::from_static(b"evil"), "evil").await.unwrap();
        assert_eq!(receipt.sha256, sha256_hex(b"evil"));

        let handle = client.launch_scan(&receipt.sha256).await.unwrap();
        assert!(!client.poll_result(&handle).await.unwrap().is_done());

        match client.poll_result(&handle).await.unwrap() {
            PollStatus::Done(verdicts) => {
                assert_eq!(verdicts.len(), 1);
                assert_eq!(verdicts[0].verdict, Verdict::Malicious);
                assert!(verdicts[0].matches(&receipt.sha256));
            }
            PollStatus::Pending => panic!("scan should be done"),
        }
        assert_eq!(client.poll_count(), 2);

        client.delete_artifact(&receipt.sha256).await.unwrap();
        assert_eq!(client.delete_calls_for(b"evil"), 1);
    }

    #[tokio::test]
    async fn test_mock_store_late_insert() {
        let store = MockObjectStore::new("bucket").with_object("a", b"a".to_vec());
        store.insert_object("b", b"later".to_vec());

        let listing = store.list().await.unwrap();
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[1].key, "b");
        assert_eq!(listing[1].size, 5);
        assert_eq!(store.list_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_client_rate_limited_polls() {
        let client = MockArtifactClient::new().with_rate_limited_polls(b"x", 2);
        let receipt = client.upload(Bytes::from_static(b"x"), "x").await.unwrap();
        let handle = client.launch_scan(&receipt.sha256).await.unwrap();

        for _ in 0..2 {
            let err = client.poll_result(&handle).await.unwrap_err();
            assert!(err.is_transient());
        }
        assert!(client.poll_result(&handle).await.unwrap().is_done());
    }

    #[tokio::test]
    async fn test_mock_client_launch_failures() {
        let client = MockArtifactClient::new()
            .with_launch_failure(b"a", LaunchFailure::RateLimited)
            .with_launch_failure(b"b", LaunchFailure::Rejected("invalid sample".into()));

        assert!(matches!(
            client.launch_scan(&sha256_hex(b"a")).await,
            Err(ArtifactError::RateLimited { .. })
        ));
        assert!(matches!(
            client.launch_scan(&sha256_hex(b"b")).await,
            Err(ArtifactError::LaunchRejected { .. })
        ));
    }
}
