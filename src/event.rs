//! Single-upload event mode.
//!
//! Storage notifications from Google Cloud Storage (`{bucket, name, size}`)
//! and Amazon S3 (`Records[0].s3.bucket.name`, `Records[0].s3.object.key`)
//! are decoded into a [`StorageEvent`] and scanned by the same
//! [`ObjectScanner`] the batch mode uses.

use crate::config::{Provider, RunConfig};
use crate::core::{ArcArtifactClient, ArcObjectStore, ObjectDescriptor, ObjectOutcome};
use crate::manager::ObjectScanner;
use crate::report::VerdictReporter;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

/// Errors raised while decoding or handling a storage event.
#[derive(Debug, Error)]
pub enum EventError {
    /// The payload is not JSON.
    #[error("invalid event payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload is JSON but lacks a required field.
    #[error("malformed storage event: {details}")]
    Malformed {
        /// What was missing or wrong.
        details: String,
    },

    /// The event names a different bucket than the handler serves.
    #[error("event for bucket '{event}' delivered to handler for bucket '{handler}'")]
    BucketMismatch {
        /// Bucket named by the event.
        event: String,
        /// Bucket the handler is connected to.
        handler: String,
    },
}

impl EventError {
    fn malformed(details: impl Into<String>) -> Self {
        Self::Malformed {
            details: details.into(),
        }
    }
}

/// A new object reported by a storage notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEvent {
    /// Provider that sent the notification.
    pub provider: Provider,
    /// Bucket the object was written to.
    pub bucket: String,
    /// Decoded object key.
    pub key: String,
    /// Object size in bytes.
    pub size: u64,
}

#[derive(Deserialize)]
struct GcsNotification {
    bucket: String,
    name: String,
    size: Value,
}

#[derive(Deserialize)]
struct S3Notification {
    #[serde(rename = "Records")]
    records: Vec<S3Record>,
}

#[derive(Deserialize)]
struct S3Record {
    s3: S3Entity,
}

#[derive(Deserialize)]
struct S3Entity {
    bucket: S3Bucket,
    object: S3Object,
}

#[derive(Deserialize)]
struct S3Bucket {
    name: String,
}

#[derive(Deserialize)]
struct S3Object {
    key: String,
    size: Value,
}

impl StorageEvent {
    /// Decodes either notification format.
    pub fn from_json(raw: &str) -> Result<Self, EventError> {
        let value: Value = serde_json::from_str(raw)?;
        if value.get("Records").is_some() {
            Self::from_s3_value(value)
        } else {
            Self::from_gcs_value(value)
        }
    }

    /// Decodes a Cloud Storage `finalize` notification.
    pub fn from_gcs_json(raw: &str) -> Result<Self, EventError> {
        Self::from_gcs_value(serde_json::from_str(raw)?)
    }

    /// Decodes an S3 `ObjectCreated` notification. Only the first record is used.
    pub fn from_s3_json(raw: &str) -> Result<Self, EventError> {
        Self::from_s3_value(serde_json::from_str(raw)?)
    }

    fn from_gcs_value(value: Value) -> Result<Self, EventError> {
        let event: GcsNotification = serde_json::from_value(value)?;
        Ok(Self {
            provider: Provider::Gcs,
            bucket: event.bucket,
            key: unquote_plus(&event.name),
            size: parse_size(&event.size)?,
        })
    }

    fn from_s3_value(value: Value) -> Result<Self, EventError> {
        let event: S3Notification = serde_json::from_value(value)?;
        let record = event
            .records
            .into_iter()
            .next()
            .ok_or_else(|| EventError::malformed("notification has no records"))?;
        Ok(Self {
            provider: Provider::S3,
            bucket: record.s3.bucket.name,
            key: unquote_plus(&record.s3.object.key),
            size: parse_size(&record.s3.object.size)?,
        })
    }

    /// Returns the object this event refers to.
    pub fn object(&self) -> ObjectDescriptor {
        ObjectDescriptor::new(self.key.clone(), self.size)
    }
}

/// Decodes a form-encoded key: `+` becomes a space, then `%XX` escapes are
/// decoded. Keys with invalid escapes are returned with only `+` replaced.
pub fn unquote_plus(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    match urlencoding::decode(&spaced) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => spaced,
    }
}

/// Sizes arrive as a number from S3 and as a string from Cloud Storage.
fn parse_size(value: &Value) -> Result<u64, EventError> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| EventError::malformed(format!("invalid object size {}", n))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| EventError::malformed(format!("invalid object size '{}'", s))),
        other => Err(EventError::malformed(format!("invalid object size {}", other))),
    }
}

/// Scans the object named by one storage event.
#[derive(Debug, Clone)]
pub struct EventHandler {
    scanner: ObjectScanner,
    reporter: VerdictReporter,
}

impl EventHandler {
    /// Creates a handler for the bucket served by `store`.
    pub fn new(store: ArcObjectStore, client: ArcArtifactClient, config: &RunConfig) -> Self {
        Self {
            scanner: ObjectScanner::new(store, client, config),
            reporter: VerdictReporter::new(),
        }
    }

    /// Scans the event's object and reports its verdict.
    pub async fn handle(&self, event: &StorageEvent) -> Result<ObjectOutcome, EventError> {
        let bucket = self.scanner.store().bucket();
        if event.bucket != bucket {
            return Err(EventError::BucketMismatch {
                event: event.bucket.clone(),
                handler: bucket.to_string(),
            });
        }

        tracing::info!(
            provider = %event.provider,
            bucket = %event.bucket,
            key = %event.key,
            size = event.size,
            "Handling upload event"
        );
        let outcome = self.scanner.scan(event.object()).await;
        if let Some(result) = outcome.batch_result() {
            self.reporter.report(result);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockArtifactClient, MockObjectStore};
    use crate::core::Verdict;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_unquote_plus() {
        assert_eq!(unquote_plus("my+report%282024%29.pdf"), "my report(2024).pdf");
        assert_eq!(unquote_plus("a%2Bb"), "a+b");
        assert_eq!(unquote_plus("plain/key.txt"), "plain/key.txt");
        assert_eq!(unquote_plus("caf%C3%A9"), "café");
    }

    #[test]
    fn test_gcs_event() {
        let raw = r#"{"bucket":"uploads","name":"in/new+file.exe","size":"2048","contentType":"x"}"#;
        let event = StorageEvent::from_gcs_json(raw).unwrap();
        assert_eq!(event.provider, Provider::Gcs);
        assert_eq!(event.bucket, "uploads");
        assert_eq!(event.key, "in/new file.exe");
        assert_eq!(event.size, 2048);
        assert_eq!(event.object().name, "new file.exe");
    }

    #[test]
    fn test_s3_event() {
        let raw = r#"{
            "Records": [{
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": {"name": "landing"},
                    "object": {"key": "docs/q1%20plan.docx", "size": 1024}
                }
            }]
        }"#;
        let event = StorageEvent::from_json(raw).unwrap();
        assert_eq!(event.provider, Provider::S3);
        assert_eq!(event.bucket, "landing");
        assert_eq!(event.key, "docs/q1 plan.docx");
        assert_eq!(event.size, 1024);
    }

    #[test]
    fn test_malformed_events() {
        assert!(matches!(
            StorageEvent::from_s3_json(r#"{"Records":[]}"#),
            Err(EventError::Malformed { .. })
        ));
        assert!(matches!(
            StorageEvent::from_gcs_json(r#"{"bucket":"b","name":"k","size":"big"}"#),
            Err(EventError::Malformed { .. })
        ));
        assert!(matches!(
            StorageEvent::from_json("{"),
            Err(EventError::Json(_))
        ));
    }

    fn handler(store: MockObjectStore, client: MockArtifactClient, config: &RunConfig) -> EventHandler {
        EventHandler::new(Arc::new(store), Arc::new(client), config)
    }

    #[tokio::test(start_paused = true)]
    async fn test_handle_threat_event() {
        let store = MockObjectStore::new("uploads").with_object("in/bad.exe", b"bad".to_vec());
        let client = MockArtifactClient::new().with_verdict_for(b"bad", Verdict::Malicious);
        let config = RunConfig::new().with_poll_interval(Duration::from_millis(5));

        let event = StorageEvent::from_gcs_json(r#"{"bucket":"uploads","name":"in/bad.exe","size":3}"#)
            .unwrap();
        let outcome = handler(store, client, &config).handle(&event).await.unwrap();
        assert_eq!(outcome.summary(), "Verdict for in/bad.exe: malicious");
    }

    #[tokio::test]
    async fn test_handle_oversized_event() {
        let config = RunConfig::new().with_max_file_size(100);
        let event = StorageEvent {
            provider: Provider::S3,
            bucket: "landing".into(),
            key: "big.iso".into(),
            size: 100,
        };
        let outcome = handler(MockObjectStore::new("landing"), MockArtifactClient::new(), &config)
            .handle(&event)
            .await
            .unwrap();
        assert_eq!(
            outcome.summary(),
            "File (big.iso) exceeds maximum file scan size (100 bytes), skipped."
        );
    }

    #[tokio::test]
    async fn test_handle_rejects_other_bucket() {
        let event = StorageEvent {
            provider: Provider::Gcs,
            bucket: "elsewhere".into(),
            key: "k".into(),
            size: 1,
        };
        let result = handler(MockObjectStore::new("uploads"), MockArtifactClient::new(), &RunConfig::new())
            .handle(&event)
            .await;
        assert!(matches!(result, Err(EventError::BucketMismatch { .. })));
    }
}
