//! Verdict classification and emission.

use crate::core::{BatchResult, VerdictClass};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity a verdict is reported at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportLevel {
    /// Clean, undetermined or unrecognised verdict.
    Info,
    /// Threat.
    Warn,
}

/// One reported verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    /// Event type.
    pub event_type: String,

    /// Timestamp of the event.
    pub timestamp: DateTime<Utc>,

    /// Object key.
    pub key: String,

    /// Hash of the uploaded sample.
    pub sha256: String,

    /// Scan identifier.
    pub scan_id: String,

    /// Raw verdict string.
    pub verdict: String,

    /// Reporting bucket of the verdict.
    pub class: VerdictClass,

    /// Level the entry was logged at.
    pub level: ReportLevel,

    /// Human-readable line.
    pub message: String,
}

/// Logs the verdict of each scanned object.
///
/// Reporting has no effect on the result itself; reporting the same result
/// twice yields the same entry apart from its timestamp.
#[derive(Debug, Clone, Copy, Default)]
pub struct VerdictReporter;

impl VerdictReporter {
    /// Creates a reporter.
    pub fn new() -> Self {
        Self
    }

    /// Reports the verdict matching the uploaded sample.
    ///
    /// Returns `None` when the result carries no verdict for the sample's
    /// hash; that case was already logged by the scanner.
    pub fn report(&self, result: &BatchResult) -> Option<ReportEntry> {
        let verdict = result.matching_verdict()?;
        let key = &result.object.key;
        let class = verdict.verdict.class();

        let (level, message) = match class {
            VerdictClass::Clean => (
                ReportLevel::Info,
                format!("Verdict for {}: {}", key, verdict.verdict),
            ),
            VerdictClass::Unknown => (
                ReportLevel::Info,
                format!("Unscannable/Unknown file {}: verdict {}", key, verdict.verdict),
            ),
            VerdictClass::Threat => (
                ReportLevel::Warn,
                format!("Verdict for {}: {}", key, verdict.verdict),
            ),
            VerdictClass::Unrecognized => (
                ReportLevel::Info,
                format!(
                    "Unrecognized response ({}) received from API for {}.",
                    verdict.verdict, key
                ),
            ),
        };

        match level {
            ReportLevel::Info => tracing::info!(key = %key, sha256 = %verdict.sha256, "{}", message),
            ReportLevel::Warn => tracing::warn!(key = %key, sha256 = %verdict.sha256, "{}", message),
        }

        let entry = ReportEntry {
            event_type: "verdict".to_string(),
            timestamp: Utc::now(),
            key: key.clone(),
            sha256: verdict.sha256.clone(),
            scan_id: result.handle.scan_id.clone(),
            verdict: verdict.verdict.to_string(),
            class,
            level,
            message,
        };
        emit_verdict(&entry);
        Some(entry)
    }
}

/// Emits the structured verdict event.
fn emit_verdict(entry: &ReportEntry) {
    tracing::info!(
        target: "bucketguard::report",
        event_type = %entry.event_type,
        key = %entry.key,
        sha256 = %entry.sha256,
        scan_id = %entry.scan_id,
        verdict = %entry.verdict,
        class = %entry.class,
        "Verdict reported"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ObjectDescriptor, ScanHandle, ScanVerdict, UploadReceipt, Verdict};

    fn result(verdicts: Option<Vec<ScanVerdict>>) -> BatchResult {
        BatchResult {
            object: ObjectDescriptor::new("in/file.doc", 12),
            receipt: UploadReceipt::new("aa11", 200),
            handle: ScanHandle::new("scan-7", "aa11"),
            verdicts,
            mitigation: None,
        }
    }

    #[test]
    fn test_levels_by_class() {
        let reporter = VerdictReporter::new();
        let cases = [
            (Verdict::Clean, ReportLevel::Info),
            (Verdict::Unknown, ReportLevel::Info),
            (Verdict::Malicious, ReportLevel::Warn),
            (Verdict::Suspicious, ReportLevel::Warn),
            (Verdict::Unrecognized("odd".into()), ReportLevel::Info),
        ];

        for (verdict, level) in cases {
            let entry = reporter
                .report(&result(Some(vec![ScanVerdict::new("aa11", verdict)])))
                .unwrap();
            assert_eq!(entry.level, level);
            assert_eq!(entry.scan_id, "scan-7");
        }
    }

    #[test]
    fn test_messages() {
        let reporter = VerdictReporter::new();
        let entry = reporter
            .report(&result(Some(vec![ScanVerdict::new("aa11", Verdict::Unknown)])))
            .unwrap();
        assert_eq!(entry.message, "Unscannable/Unknown file in/file.doc: verdict unknown");

        let entry = reporter
            .report(&result(Some(vec![ScanVerdict::new("aa11", Verdict::Malicious)])))
            .unwrap();
        assert_eq!(entry.message, "Verdict for in/file.doc: malicious");
        assert_eq!(entry.class, VerdictClass::Threat);
    }

    #[test]
    fn test_unmatched_results_are_skipped() {
        let reporter = VerdictReporter::new();
        assert!(reporter.report(&result(None)).is_none());
        assert!(reporter
            .report(&result(Some(vec![ScanVerdict::new("bb22", Verdict::Clean)])))
            .is_none());
    }

    #[test]
    fn test_report_is_repeatable() {
        let reporter = VerdictReporter::new();
        let batch = result(Some(vec![ScanVerdict::new("aa11", Verdict::Clean)]));
        let first = reporter.report(&batch).unwrap();
        let second = reporter.report(&batch).unwrap();
        assert_eq!(first.message, second.message);
        assert_eq!(first.class, second.class);
        assert_eq!(batch.verdicts.as_ref().map(Vec::len), Some(1));
    }
}
