//! Fixed-delay polling of scan results.

use crate::config::PollConfig;
use crate::core::{ArtifactError, PollStatus, ScanArtifactClient, ScanHandle, ScanVerdict};

use tokio::time::Instant;

/// Polls `handle` until the scan service reports it done.
///
/// Polls are separated by `config.interval`; no delay precedes the first
/// poll and none follows the last. Transient errors count as an attempt and
/// polling continues. Any other error is returned immediately. Once
/// `config.max_attempts` polls went unanswered, [`ArtifactError::Timeout`]
/// is returned.
pub async fn poll_until_done(
    client: &dyn ScanArtifactClient,
    handle: &ScanHandle,
    config: &PollConfig,
) -> Result<Vec<ScanVerdict>, ArtifactError> {
    let start = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match client.poll_result(handle).await {
            Ok(PollStatus::Done(verdicts)) => {
                tracing::debug!(
                    scan_id = %handle.scan_id,
                    attempts,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Scan complete"
                );
                return Ok(verdicts);
            }
            Ok(PollStatus::Pending) => {}
            Err(e) if e.is_transient() => {
                tracing::debug!(
                    scan_id = %handle.scan_id,
                    attempt = attempts,
                    error = %e,
                    "Transient poll failure, retrying"
                );
            }
            Err(e) => return Err(e),
        }

        if !config.should_poll(attempts) {
            return Err(ArtifactError::Timeout {
                scan_id: handle.scan_id.clone(),
                attempts,
                elapsed: start.elapsed(),
            });
        }
        tokio::time::sleep(config.interval).await;
    }
}
