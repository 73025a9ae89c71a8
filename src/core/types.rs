//! Core types used throughout the bucketguard library.
//!
//! This module defines the records that flow through a scan run: the
//! object listing entries, the receipts and handles issued by the scan
//! service, the verdicts it returns, and the per-object outcome handed
//! back to the orchestrator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An object discovered in the bucket listing.
///
/// Immutable once produced; consumed exactly once by a scan job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectDescriptor {
    /// Full path/key of the object inside the bucket.
    pub key: String,

    /// Size of the object in bytes.
    pub size: u64,

    /// Base name of the object (last path segment of the key).
    pub name: String,
}

impl ObjectDescriptor {
    /// Creates a descriptor, deriving the base name from the key.
    pub fn new(key: impl Into<String>, size: u64) -> Self {
        let key = key.into();
        let name = base_name(&key).to_string();
        Self { key, size, name }
    }
}

impl fmt::Display for ObjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Returns the last `/`-separated segment of a key.
///
/// Keys ending in `/` keep the full key as their name.
pub fn base_name(key: &str) -> &str {
    match key.rsplit('/').next() {
        Some(name) if !name.is_empty() => name,
        _ => key,
    }
}

/// Receipt returned when object bytes are submitted to the scan service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// SHA-256 of the uploaded sample as reported by the scan service.
    pub sha256: String,

    /// HTTP-style status code of the upload call.
    pub status_code: u16,
}

impl UploadReceipt {
    /// Creates a new receipt.
    pub fn new(sha256: impl Into<String>, status_code: u16) -> Self {
        Self {
            sha256: sha256.into(),
            status_code,
        }
    }
}

/// Correlation key for a launched scan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanHandle {
    /// Identifier assigned by the scan service.
    pub scan_id: String,

    /// Hash of the sample the scan was launched against.
    pub sha256: String,
}

impl ScanHandle {
    /// Creates a new scan handle.
    pub fn new(scan_id: impl Into<String>, sha256: impl Into<String>) -> Self {
        Self {
            scan_id: scan_id.into(),
            sha256: sha256.into(),
        }
    }
}

/// Verdict reported by the scan service for one sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No threat found.
    Clean,
    /// The sample could not be scanned or the result is undetermined.
    Unknown,
    /// The sample is malicious.
    Malicious,
    /// The sample is suspicious.
    Suspicious,
    /// A verdict string this crate does not recognise, kept verbatim.
    Unrecognized(String),
}

impl Verdict {
    /// Parses a verdict string, ignoring ASCII case and surrounding whitespace.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "clean" => Self::Clean,
            "unknown" => Self::Unknown,
            "malicious" => Self::Malicious,
            "suspicious" => Self::Suspicious,
            _ => Self::Unrecognized(raw.to_string()),
        }
    }

    /// Returns the reporting bucket for this verdict.
    pub fn class(&self) -> VerdictClass {
        match self {
            Self::Clean => VerdictClass::Clean,
            Self::Unknown => VerdictClass::Unknown,
            Self::Malicious | Self::Suspicious => VerdictClass::Threat,
            Self::Unrecognized(_) => VerdictClass::Unrecognized,
        }
    }

    /// Returns `true` for malicious and suspicious verdicts.
    pub fn is_threat(&self) -> bool {
        self.class() == VerdictClass::Threat
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Unknown => write!(f, "unknown"),
            Self::Malicious => write!(f, "malicious"),
            Self::Suspicious => write!(f, "suspicious"),
            Self::Unrecognized(raw) => write!(f, "{}", raw),
        }
    }
}

/// The four reporting buckets a verdict falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictClass {
    /// Clean sample.
    Clean,
    /// Unscannable or undetermined sample.
    Unknown,
    /// Malicious or suspicious sample.
    Threat,
    /// Verdict string not recognised.
    Unrecognized,
}

impl fmt::Display for VerdictClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Unknown => write!(f, "unknown"),
            Self::Threat => write!(f, "threat"),
            Self::Unrecognized => write!(f, "unrecognized"),
        }
    }
}

/// A verdict for one file artifact, produced once polling observes `done`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanVerdict {
    /// Hash of the artifact the verdict applies to.
    pub sha256: String,

    /// Parsed verdict.
    pub verdict: Verdict,

    /// Raw artifact record as returned by the scan service.
    #[serde(default)]
    pub detail: serde_json::Value,
}

impl ScanVerdict {
    /// Creates a verdict with an empty detail record.
    pub fn new(sha256: impl Into<String>, verdict: Verdict) -> Self {
        Self {
            sha256: sha256.into(),
            verdict,
            detail: serde_json::Value::Null,
        }
    }

    /// Sets the raw artifact detail.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    /// Returns `true` if this verdict belongs to the given sample hash.
    pub fn matches(&self, sha256: &str) -> bool {
        self.sha256.eq_ignore_ascii_case(sha256)
    }
}

/// Result of a single poll of the scan service.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStatus {
    /// The scan has not finished, or finished without a populated result yet.
    Pending,
    /// The scan finished; the artifact verdicts are attached.
    Done(Vec<ScanVerdict>),
}

impl PollStatus {
    /// Returns `true` once the scan is done.
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }
}

/// Aggregate record for an object that was uploaded and scanned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult {
    /// The scanned object.
    pub object: ObjectDescriptor,

    /// Receipt of the upload.
    pub receipt: UploadReceipt,

    /// Handle of the launched scan.
    pub handle: ScanHandle,

    /// Verdicts returned by the scan service, or `None` if polling never completed.
    pub verdicts: Option<Vec<ScanVerdict>>,

    /// What mitigation did for this object, if a threat was found.
    pub mitigation: Option<crate::policy::MitigationOutcome>,
}

impl BatchResult {
    /// Returns the verdict whose hash matches the uploaded sample.
    ///
    /// Verdicts for any other hash are ignored.
    pub fn matching_verdict(&self) -> Option<&ScanVerdict> {
        self.verdicts
            .as_deref()?
            .iter()
            .find(|v| v.matches(&self.receipt.sha256))
    }
}

/// Stages of the single-object scan state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStage {
    /// Object exceeded the size threshold.
    Skipped,
    /// Fetching the object and uploading it to the scan service.
    Uploading,
    /// Launching the scan.
    ScanLaunching,
    /// Waiting for the scan to finish.
    Polling,
    /// Verdict selected and classified.
    Verdicted,
    /// Removing the uploaded artifact from the scan service.
    CleaningUp,
    /// Scan job finished.
    Done,
    /// Scan job failed before a scan could run.
    Failed,
}

impl ScanStage {
    /// Returns `true` for stages after which no further transition happens.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Skipped | Self::Done | Self::Failed)
    }
}

impl fmt::Display for ScanStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Skipped => "skipped",
            Self::Uploading => "uploading",
            Self::ScanLaunching => "scan_launching",
            Self::Polling => "polling",
            Self::Verdicted => "verdicted",
            Self::CleaningUp => "cleaning_up",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one scan job, as handed back to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectOutcome {
    /// The object was larger than the configured maximum; no API calls were made.
    Skipped {
        /// The skipped object.
        object: ObjectDescriptor,
        /// The threshold that was exceeded.
        max_file_size: u64,
    },

    /// The job failed before a scan could produce a result.
    Failed {
        /// The object that failed.
        object: ObjectDescriptor,
        /// Stage at which the failure happened.
        stage: ScanStage,
        /// Human-readable failure reason.
        reason: String,
        /// Receipt of the upload, if the upload had succeeded.
        receipt: Option<UploadReceipt>,
    },

    /// The object was uploaded and a scan ran (verdicts may still be missing).
    Scanned(BatchResult),
}

impl ObjectOutcome {
    /// Returns the object this outcome refers to.
    pub fn object(&self) -> &ObjectDescriptor {
        match self {
            Self::Skipped { object, .. } | Self::Failed { object, .. } => object,
            Self::Scanned(result) => &result.object,
        }
    }

    /// Returns the batch result for scanned objects.
    pub fn batch_result(&self) -> Option<&BatchResult> {
        match self {
            Self::Scanned(result) => Some(result),
            _ => None,
        }
    }

    /// Returns `true` if the object was skipped for size.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// Returns `true` if the job failed.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Returns the classification of the matching verdict, if any.
    pub fn verdict_class(&self) -> Option<VerdictClass> {
        self.batch_result()
            .and_then(BatchResult::matching_verdict)
            .map(|v| v.verdict.class())
    }

    /// One-line summary in the wording used by the single-event handlers.
    pub fn summary(&self) -> String {
        let key = &self.object().key;
        match self {
            Self::Skipped { max_file_size, .. } => format!(
                "File ({}) exceeds maximum file scan size ({} bytes), skipped.",
                key, max_file_size
            ),
            Self::Failed { stage, reason, .. } => {
                format!("Unable to scan {} ({} failed: {})", key, stage, reason)
            }
            Self::Scanned(result) => match result.matching_verdict() {
                None => format!("No verdict available for {}", key),
                Some(v) => match v.verdict.class() {
                    VerdictClass::Clean => format!("No threat found in {}", key),
                    VerdictClass::Unknown => format!("Unable to scan {}", key),
                    VerdictClass::Threat => format!("Verdict for {}: {}", key, v.verdict),
                    VerdictClass::Unrecognized => format!(
                        "Unrecognized response ({}) received from API for {}.",
                        v.verdict, key
                    ),
                },
            },
        }
    }
}
