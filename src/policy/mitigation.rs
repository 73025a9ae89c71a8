//! Threat mitigation: removing objects with a threat verdict from the bucket.

use crate::core::{ObjectDescriptor, ObjectStoreClient, Verdict};

use serde::{Deserialize, Serialize};

/// The action mitigation decides on for one verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationAction {
    /// Nothing to do; the verdict is not a threat.
    None,
    /// Delete the object from the bucket.
    Remove,
    /// The verdict is a threat but mitigation is disabled.
    Retain,
}

/// What mitigation did for a threat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MitigationOutcome {
    /// The object was deleted from the bucket.
    Removed,
    /// Mitigation is disabled; the object is still in the bucket.
    Disabled,
    /// Deletion was attempted and failed.
    Failed {
        /// Error message from the object store.
        reason: String,
    },
}

impl MitigationOutcome {
    /// Returns `true` if the threat was removed.
    pub fn is_removed(&self) -> bool {
        matches!(self, Self::Removed)
    }
}

/// Decides on and applies mitigation for threat verdicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MitigationPolicy {
    enabled: bool,
}

impl MitigationPolicy {
    /// Creates a policy.
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Returns whether threats are removed.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Returns the action for a verdict.
    pub fn decide(&self, verdict: &Verdict) -> MitigationAction {
        match (verdict.is_threat(), self.enabled) {
            (false, _) => MitigationAction::None,
            (true, true) => MitigationAction::Remove,
            (true, false) => MitigationAction::Retain,
        }
    }

    /// Applies mitigation for a verdict on `object`.
    ///
    /// Returns `None` when the verdict is not a threat. Deletion failures are
    /// logged and reported in the outcome, never raised.
    pub async fn apply(
        &self,
        store: &dyn ObjectStoreClient,
        object: &ObjectDescriptor,
        verdict: &Verdict,
    ) -> Option<MitigationOutcome> {
        match self.decide(verdict) {
            MitigationAction::None => None,
            MitigationAction::Retain => {
                tracing::warn!(
                    key = %object.key,
                    bucket = store.bucket(),
                    "Threat discovered ({}). Mitigation disabled, threat persists in {} bucket.",
                    object.key,
                    store.bucket()
                );
                Some(MitigationOutcome::Disabled)
            }
            MitigationAction::Remove => match store.delete(object).await {
                Ok(()) => {
                    tracing::info!(
                        key = %object.key,
                        bucket = store.bucket(),
                        "Threat {} removed from bucket {}",
                        object.key,
                        store.bucket()
                    );
                    Some(MitigationOutcome::Removed)
                }
                Err(e) => {
                    tracing::warn!(
                        key = %object.key,
                        bucket = store.bucket(),
                        error = %e,
                        "Unable to remove threat {} from bucket {}",
                        object.key,
                        store.bucket()
                    );
                    Some(MitigationOutcome::Failed {
                        reason: e.to_string(),
                    })
                }
            },
        }
    }
}

impl Default for MitigationPolicy {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockObjectStore;

    #[test]
    fn test_decide() {
        let enabled = MitigationPolicy::new(true);
        assert_eq!(enabled.decide(&Verdict::Clean), MitigationAction::None);
        assert_eq!(enabled.decide(&Verdict::Unknown), MitigationAction::None);
        assert_eq!(enabled.decide(&Verdict::Malicious), MitigationAction::Remove);
        assert_eq!(enabled.decide(&Verdict::Suspicious), MitigationAction::Remove);

        let disabled = MitigationPolicy::new(false);
        assert_eq!(disabled.decide(&Verdict::Malicious), MitigationAction::Retain);
        assert_eq!(disabled.decide(&Verdict::Clean), MitigationAction::None);
    }

    #[tokio::test]
    async fn test_apply_removes_threat() {
        let store = MockObjectStore::new("bucket").with_object("evil.exe", b"x".to_vec());
        let object = ObjectDescriptor::new("evil.exe", 1);

        let outcome = MitigationPolicy::new(true)
            .apply(&store, &object, &Verdict::Malicious)
            .await;
        assert_eq!(outcome, Some(MitigationOutcome::Removed));
        assert!(!store.contains("evil.exe"));
    }

    #[tokio::test]
    async fn test_apply_disabled_keeps_object() {
        let store = MockObjectStore::new("bucket").with_object("evil.exe", b"x".to_vec());
        let object = ObjectDescriptor::new("evil.exe", 1);

        let outcome = MitigationPolicy::new(false)
            .apply(&store, &object, &Verdict::Suspicious)
            .await;
        assert_eq!(outcome, Some(MitigationOutcome::Disabled));
        assert!(store.contains("evil.exe"));
        assert!(store.deleted_keys().is_empty());
    }

    #[tokio::test]
    async fn test_apply_delete_failure_is_reported() {
        let store = MockObjectStore::new("bucket")
            .with_object("evil.exe", b"x".to_vec())
            .with_delete_failure("evil.exe");
        let object = ObjectDescriptor::new("evil.exe", 1);

        let outcome = MitigationPolicy::new(true)
            .apply(&store, &object, &Verdict::Malicious)
            .await;
        assert!(matches!(outcome, Some(MitigationOutcome::Failed { .. })));
        assert!(store.contains("evil.exe"));
    }

    #[tokio::test]
    async fn test_apply_clean_is_noop() {
        let store = MockObjectStore::new("bucket").with_object("ok.txt", b"x".to_vec());
        let object = ObjectDescriptor::new("ok.txt", 1);

        let outcome = MitigationPolicy::new(true)
            .apply(&store, &object, &Verdict::Clean)
            .await;
        assert_eq!(outcome, None);
        assert!(store.contains("ok.txt"));
    }
}
