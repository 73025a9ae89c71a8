//! Verdict reporting.
//!
//! Each verdict is logged as a human-readable line and emitted as a
//! structured event under the `bucketguard::report` target, so a tracing
//! subscriber can route verdicts separately from diagnostics.

mod reporter;

pub use reporter::{ReportEntry, ReportLevel, VerdictReporter};
