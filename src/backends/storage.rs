//! Cloud bucket access through `object_store`.
//!
//! Google Cloud Storage and Amazon S3 are both reached through the same
//! [`object_store::ObjectStore`] abstraction. Credentials come from the
//! environment the way each provider's SDK expects them
//! (`GOOGLE_APPLICATION_CREDENTIALS`, `AWS_ACCESS_KEY_ID`, ...).

use crate::config::{BucketTarget, Provider};
use crate::core::{ObjectDescriptor, ObjectStoreClient, StoreError};

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path;
use object_store::{ObjectStore, ObjectStoreExt};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// A bucket in Google Cloud Storage or Amazon S3.
#[derive(Clone)]
pub struct CloudObjectStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl CloudObjectStore {
    /// Connects to the bucket named by `target`.
    ///
    /// `project` is informational for GCS; the project is resolved from the
    /// service account credentials.
    pub fn connect(target: &BucketTarget, project: Option<&str>) -> Result<Self, StoreError> {
        let store: Arc<dyn ObjectStore> = match target.provider {
            Provider::Gcs => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(target.bucket.clone())
                    .build()
                    .map_err(|e| StoreError::configuration(e.to_string()))?,
            ),
            Provider::S3 => Arc::new(
                AmazonS3Builder::from_env()
                    .with_bucket_name(target.bucket.clone())
                    .build()
                    .map_err(|e| StoreError::configuration(e.to_string()))?,
            ),
        };

        tracing::info!(
            provider = %target.provider,
            bucket = %target.bucket,
            project = project.unwrap_or("-"),
            "Connected to bucket"
        );
        Ok(Self::with_store(target.bucket.clone(), store))
    }

    /// Wraps an existing store.
    pub fn with_store(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    fn location(key: &str) -> Path {
        Path::parse(key).unwrap_or_else(|_| Path::from(key))
    }
}

impl fmt::Debug for CloudObjectStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudObjectStore")
            .field("bucket", &self.bucket)
            .field("store", &self.store.to_string())
            .finish()
    }
}

#[async_trait]
impl ObjectStoreClient for CloudObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn list(&self) -> Result<Vec<ObjectDescriptor>, StoreError> {
        let start = Instant::now();
        let metas: Vec<_> = self
            .store
            .list(None)
            .try_collect()
            .await
            .map_err(|e| StoreError::connection(&self.bucket, e.to_string()))?;

        tracing::debug!(
            bucket = %self.bucket,
            objects = metas.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Bucket listed"
        );
        Ok(metas
            .into_iter()
            .map(|meta| ObjectDescriptor::new(meta.location.to_string(), meta.size))
            .collect())
    }

    async fn fetch(&self, object: &ObjectDescriptor) -> Result<Bytes, StoreError> {
        let location = Self::location(&object.key);
        let result = self
            .store
            .get(&location)
            .await
            .map_err(|e| StoreError::fetch(&object.key, e.to_string()))?;
        result
            .bytes()
            .await
            .map_err(|e| StoreError::fetch(&object.key, e.to_string()))
    }

    async fn delete(&self, object: &ObjectDescriptor) -> Result<(), StoreError> {
        let location = Self::location(&object.key);
        self.store
            .delete(&location)
            .await
            .map_err(|e| StoreError::delete(&object.key, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;
    use object_store::PutPayload;

    async fn seeded() -> CloudObjectStore {
        let memory = InMemory::new();
        memory
            .put(&Path::from("uploads/a.txt"), PutPayload::from_static(b"alpha"))
            .await
            .unwrap();
        memory
            .put(&Path::from("b.bin"), PutPayload::from_static(b"bravo!"))
            .await
            .unwrap();
        CloudObjectStore::with_store("test-bucket", Arc::new(memory))
    }

    #[tokio::test]
    async fn test_list_fetch_delete() {
        let store = seeded().await;
        assert_eq!(store.bucket(), "test-bucket");

        let mut listing = store.list().await.unwrap();
        listing.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(listing.len(), 2);
        assert_eq!(listing[1].key, "uploads/a.txt");
        assert_eq!(listing[1].name, "a.txt");
        assert_eq!(listing[1].size, 5);

        let data = store.fetch(&listing[1]).await.unwrap();
        assert_eq!(&data[..], b"alpha");

        store.delete(&listing[0]).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_missing_object() {
        let store = seeded().await;
        let missing = ObjectDescriptor::new("nope.txt", 1);
        assert!(matches!(
            store.fetch(&missing).await,
            Err(StoreError::Fetch { .. })
        ));
    }
}
