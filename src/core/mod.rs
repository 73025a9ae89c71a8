//! Core types and traits for the bucketguard library.
//!
//! - [`types`] - Object descriptors, receipts, handles, verdicts and outcomes
//! - [`traits`] - The object store and scan service collaborator traits
//! - [`error`] - Structured error types
//! - [`hasher`] - SHA-256 digests of object content

pub mod error;
pub mod hasher;
pub mod traits;
pub mod types;

pub use error::{ArtifactError, ConfigError, RunError, StoreError};
pub use traits::{ArcArtifactClient, ArcObjectStore, ObjectStoreClient, ScanArtifactClient};
pub use types::{
    BatchResult, ObjectDescriptor, ObjectOutcome, PollStatus, ScanHandle, ScanStage, ScanVerdict,
    UploadReceipt, Verdict, VerdictClass,
};
