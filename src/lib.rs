//! # Bucketguard
//!
//! Malware scanning for Google Cloud Storage and Amazon S3 buckets through
//! the QuickScan Pro API, with bounded-concurrency batch runs and optional
//! removal of threats.
//!
//! ## Overview
//!
//! Bucketguard runs in two modes:
//!
//! - **Batch**: list a whole bucket, split the listing into batches, and scan
//!   each batch with a bounded number of concurrent jobs
//! - **Event**: scan the single object named by a storage notification
//!
//! Each object is fetched, uploaded to the scan service, scanned, polled to
//! completion, and reported. Threats are removed from the bucket when
//! mitigation is enabled. The uploaded sample is always deleted from the
//! scan service afterwards.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bucketguard::backends::{MockArtifactClient, MockObjectStore};
//! use bucketguard::{BatchOrchestrator, RunConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MockObjectStore::new("uploads").with_object("a.txt", b"hello".to_vec());
//!     let client = MockArtifactClient::new();
//!
//!     let orchestrator = BatchOrchestrator::new(
//!         Arc::new(store),
//!         Arc::new(client),
//!         RunConfig::new().with_batch_size(500).with_max_workers(8),
//!     )?;
//!     let report = orchestrator.run().await?;
//!     println!("{} threats", report.summary.threats);
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `default` - Includes both production backends
//! - `falcon` - QuickScan Pro REST client
//! - `cloud-storage` - GCS and S3 access through `object_store`
//!
//! ## Architecture
//!
//! - **Core**: Records, collaborator traits, and error handling
//! - **Backends**: Object store and scan service implementations
//! - **Manager**: Batch orchestration, the per-object pipeline, and polling
//! - **Policy**: Threat mitigation
//! - **Report**: Verdict classification and structured verdict events
//! - **Event**: Single-upload notifications

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod backends;
pub mod config;
pub mod core;
pub mod event;
pub mod manager;
pub mod policy;
pub mod report;
pub mod telemetry;

#[cfg(all(feature = "falcon", feature = "cloud-storage"))]
pub mod cli;

// Re-export commonly used types at the crate root
pub use crate::config::{BucketTarget, FalconCredentials, PollConfig, RunConfig, Settings};
pub use crate::core::{
    ArtifactError, BatchResult, ConfigError, ObjectDescriptor, ObjectOutcome, ObjectStoreClient,
    RunError, ScanArtifactClient, ScanVerdict, StoreError, Verdict,
};
pub use crate::event::{EventHandler, StorageEvent};
pub use crate::manager::{BatchOrchestrator, ObjectScanner, RunReport, RunSummary};
pub use crate::policy::MitigationPolicy;
pub use crate::report::VerdictReporter;

/// Prelude module for convenient imports.
///
/// ```rust
/// use bucketguard::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{PollConfig, RunConfig};
    pub use crate::core::{
        ArtifactError, BatchResult, ObjectDescriptor, ObjectOutcome, ObjectStoreClient,
        ScanArtifactClient, ScanVerdict, StoreError, Verdict, VerdictClass,
    };
    pub use crate::manager::{BatchOrchestrator, ObjectScanner, RunSummary};
    pub use crate::policy::MitigationPolicy;
}
