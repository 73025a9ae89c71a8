//! Collaborator implementations.
//!
//! This module contains implementations of the [`ObjectStoreClient`] and
//! [`ScanArtifactClient`] traits.
//!
//! ## Available Backends
//!
//! - [`mock`] - In-memory bucket and scan service for testing
//! - [`falcon`] - QuickScan Pro REST API (requires `falcon` feature)
//! - [`storage`] - GCS and S3 buckets via `object_store` (requires `cloud-storage` feature)
//!
//! ## Implementing a Custom Backend
//!
//! ```rust,ignore
//! use bucketguard::core::{ObjectDescriptor, ObjectStoreClient, StoreError};
//! use async_trait::async_trait;
//! use bytes::Bytes;
//!
//! #[derive(Debug)]
//! pub struct MyStore {
//!     bucket: String,
//! }
//!
//! #[async_trait]
//! impl ObjectStoreClient for MyStore {
//!     fn bucket(&self) -> &str {
//!         &self.bucket
//!     }
//!
//!     async fn list(&self) -> Result<Vec<ObjectDescriptor>, StoreError> {
//!         todo!()
//!     }
//!
//!     async fn fetch(&self, object: &ObjectDescriptor) -> Result<Bytes, StoreError> {
//!         todo!()
//!     }
//!
//!     async fn delete(&self, object: &ObjectDescriptor) -> Result<(), StoreError> {
//!         todo!()
//!     }
//! }
//! ```
//!
//! [`ObjectStoreClient`]: crate::core::ObjectStoreClient
//! [`ScanArtifactClient`]: crate::core::ScanArtifactClient

pub mod mock;

#[cfg(feature = "falcon")]
pub mod falcon;

#[cfg(feature = "cloud-storage")]
pub mod storage;

// Re-exports
pub use mock::{LaunchFailure, MockArtifactClient, MockObjectStore};

#[cfg(feature = "falcon")]
pub use falcon::{FalconClient, FalconConfig};

#[cfg(feature = "cloud-storage")]
pub use storage::CloudObjectStore;
