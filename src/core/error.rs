//! Error types for the bucketguard library.
//!
//! Errors are split along the propagation policy of a scan run:
//!
//! - [`RunError`] is fatal and aborts the run before or during listing.
//! - [`StoreError`] and [`ArtifactError`] are raised by the collaborators and
//!   are caught per object by the scanner, except for a listing failure.
//! - [`ConfigError`] covers startup validation.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by the object store collaborator.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The bucket is unreachable or does not exist.
    #[error("unable to connect to bucket '{bucket}': {message}")]
    Connection {
        /// Bucket that could not be reached.
        bucket: String,
        /// Error message describing the failure.
        message: String,
    },

    /// An object could not be read.
    #[error("failed to fetch object '{key}': {message}")]
    Fetch {
        /// Key of the object.
        key: String,
        /// Error message describing the failure.
        message: String,
    },

    /// An object could not be deleted.
    #[error("failed to delete object '{key}': {message}")]
    Delete {
        /// Key of the object.
        key: String,
        /// Error message describing the failure.
        message: String,
    },

    /// The store could not be configured.
    #[error("object store configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl StoreError {
    /// Creates a `Connection` error.
    pub fn connection(bucket: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            bucket: bucket.into(),
            message: message.into(),
        }
    }

    /// Creates a `Fetch` error.
    pub fn fetch(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Fetch {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a `Delete` error.
    pub fn delete(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Delete {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Returns `true` if this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Configuration { .. })
    }
}

/// Errors raised by the scan service collaborator.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The upload returned a non-success status.
    #[error("upload failed with status {status}: {message}")]
    Upload {
        /// Status code returned by the service.
        status: u16,
        /// Error message describing the failure.
        message: String,
    },

    /// The service refused a call without a structured error body.
    #[error("rate limit exceeded (status {status})")]
    RateLimited {
        /// Status code returned by the service.
        status: u16,
    },

    /// The service rejected the scan launch with an explicit error.
    #[error("scan launch rejected with status {status}: {message}")]
    LaunchRejected {
        /// Status code returned by the service.
        status: u16,
        /// First error message from the response body.
        message: String,
    },

    /// A poll request failed.
    #[error("scan result request failed with status {status}: {message}")]
    Poll {
        /// Status code returned by the service.
        status: u16,
        /// Error message describing the failure.
        message: String,
    },

    /// The service returned a response that does not match the expected schema.
    #[error("malformed response from {operation}: {details}")]
    MalformedResponse {
        /// Operation whose response was malformed.
        operation: &'static str,
        /// Details about what was wrong.
        details: String,
    },

    /// Polling gave up before the scan finished.
    #[error("scan {scan_id} not finished after {attempts} polls ({elapsed:?})")]
    Timeout {
        /// Scan that was being polled.
        scan_id: String,
        /// Number of poll attempts made.
        attempts: u32,
        /// Time spent polling.
        elapsed: Duration,
    },

    /// The artifact could not be removed from the service.
    #[error("failed to delete artifact {sha256} (status {status})")]
    Delete {
        /// Hash of the artifact.
        sha256: String,
        /// Status code returned by the service.
        status: u16,
    },

    /// Authentication against the service failed.
    #[error("authentication failed: {reason}")]
    Authentication {
        /// Reason for authentication failure.
        reason: String,
    },

    /// The service could not be reached.
    #[error("connection to scan service failed: {message}")]
    Connection {
        /// Error message describing the failure.
        message: String,
    },

    /// The client could not be configured.
    #[error("scan service configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },
}

impl ArtifactError {
    /// Returns `true` if the same call may succeed when repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::RateLimited { .. })
    }

    /// Creates a `MalformedResponse` error.
    pub fn malformed(operation: &'static str, details: impl Into<String>) -> Self {
        Self::MalformedResponse {
            operation,
            details: details.into(),
        }
    }

    /// Creates a `Connection` error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Creates a `Configuration` error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }
}

/// Startup configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required credential was not supplied.
    #[error("{name} not set")]
    MissingCredential {
        /// Name of the missing credential.
        name: &'static str,
    },

    /// The scan target is not a supported bucket URL.
    #[error("invalid target '{target}': expected gs://BUCKET or s3://BUCKET")]
    InvalidTarget {
        /// The rejected target.
        target: String,
    },

    /// A GCS target was given without a project.
    #[error("target project ID not specified for bucket '{bucket}'")]
    MissingProject {
        /// Bucket that needs a project.
        bucket: String,
    },

    /// A configuration value is out of range.
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value was rejected.
        reason: String,
    },

    /// The settings file could not be read.
    #[error("reading settings file {path}: {source}")]
    Read {
        /// Path of the settings file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for this crate.
    #[error("parsing settings file: {0}")]
    Parse(#[from] toml::de::Error),

    /// The credentials secret payload could not be decoded.
    #[error("invalid credentials secret: {0}")]
    Secret(#[from] serde_json::Error),
}

impl ConfigError {
    /// Creates an `Invalid` error.
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Fatal errors that terminate a run.
#[derive(Debug, Error)]
pub enum RunError {
    /// Configuration was rejected before any work started.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The object listing could not be obtained.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The scan service client could not be constructed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_fatality() {
        assert!(StoreError::connection("b", "no such bucket").is_fatal());
        assert!(!StoreError::fetch("k", "denied").is_fatal());
        assert!(!StoreError::delete("k", "denied").is_fatal());
    }

    #[test]
    fn test_artifact_error_transient() {
        assert!(ArtifactError::connection("reset").is_transient());
        assert!(ArtifactError::RateLimited { status: 429 }.is_transient());
        assert!(!ArtifactError::malformed("poll", "missing scan").is_transient());
        assert!(!ArtifactError::LaunchRejected {
            status: 400,
            message: "bad hash".into()
        }
        .is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ArtifactError::Timeout {
            scan_id: "scan-9".into(),
            attempts: 5,
            elapsed: Duration::from_secs(15),
        };
        assert!(err.to_string().contains("scan-9"));
        assert!(err.to_string().contains("5 polls"));

        let err = ConfigError::MissingCredential {
            name: "FALCON_CLIENT_ID",
        };
        assert_eq!(err.to_string(), "FALCON_CLIENT_ID not set");
    }

    #[test]
    fn test_run_error_from_store() {
        let err: RunError = StoreError::connection("bucket-a", "404").into();
        assert!(matches!(err, RunError::Store(StoreError::Connection { .. })));
        assert!(err.to_string().contains("bucket-a"));
    }
}
