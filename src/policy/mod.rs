//! Mitigation policy for threat verdicts.
//!
//! Mitigation is advisory: a failed deletion never fails the scan job.

mod mitigation;

pub use mitigation::{MitigationAction, MitigationOutcome, MitigationPolicy};
