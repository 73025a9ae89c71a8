//! QuickScan Pro scan service client.
//!
//! # Requirements
//!
//! - Falcon API client ID and secret with the QuickScan Pro scope
//! - Network access to the Falcon API base URL
//!
//! # API Usage
//!
//! 1. `POST /oauth2/token` exchanges the client credentials for a bearer token
//! 2. `POST /quickscanpro/entities/files/v1` uploads a sample
//! 3. `POST /quickscanpro/entities/scans/v1` launches a scan by hash
//! 4. `GET /quickscanpro/entities/scans/v1?ids=` polls the scan
//! 5. `DELETE /quickscanpro/entities/files/v1?ids=` removes the sample

use crate::config::{FalconCredentials, DEFAULT_BASE_URL};
use crate::core::{
    ArtifactError, PollStatus, ScanArtifactClient, ScanHandle, ScanVerdict, UploadReceipt, Verdict,
};

use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const FILES_PATH: &str = "/quickscanpro/entities/files/v1";
const SCANS_PATH: &str = "/quickscanpro/entities/scans/v1";
const TOKEN_PATH: &str = "/oauth2/token";

/// Tokens are refreshed this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Client configuration.
#[derive(Debug, Clone)]
pub struct FalconConfig {
    /// API credentials.
    pub credentials: FalconCredentials,

    /// Base URL for the API.
    pub base_url: String,

    /// Request timeout.
    pub timeout: Duration,
}

impl FalconConfig {
    /// Creates a configuration for the default cloud.
    pub fn new(credentials: FalconCredentials) -> Self {
        Self {
            credentials,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Sets the base URL. A trailing slash is ignored.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[derive(Debug)]
struct CachedToken {
    value: SecretString,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

/// Lifetimes that overflow `Instant` fall back to the default token lifetime.
fn token_expiry(now: Instant, expires_in: u64) -> Instant {
    now.checked_add(Duration::from_secs(expires_in))
        .unwrap_or_else(|| now + Duration::from_secs(default_expires_in()))
}

/// QuickScan Pro implementation of [`ScanArtifactClient`].
///
/// # Example
///
/// ```rust,ignore
/// use bucketguard::backends::{FalconClient, FalconConfig};
/// use bucketguard::config::FalconCredentials;
///
/// let credentials = FalconCredentials::new(Some(id), Some(secret))?;
/// let client = FalconClient::new(FalconConfig::new(credentials))?;
/// ```
#[derive(Debug)]
pub struct FalconClient {
    config: FalconConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

impl FalconClient {
    /// Creates a new client. No request is made until the first call.
    pub fn new(config: FalconConfig) -> Result<Self, ArtifactError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ArtifactError::configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Returns a valid bearer token, requesting a new one when needed.
    async fn bearer(&self) -> Result<String, ArtifactError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.value.expose_secret().to_string());
        }

        let credentials = &self.config.credentials;
        let response = self
            .client
            .post(self.url(TOKEN_PATH))
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.secret()),
            ])
            .send()
            .await
            .map_err(|e| ArtifactError::connection(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ArtifactError::connection(e.to_string()))?;
        let token = parse_token(status, &body)?;

        tracing::debug!(expires_in = token.expires_in, "Obtained API token");
        let value = token.access_token.clone();
        *cached = Some(CachedToken {
            value: SecretString::from(token.access_token),
            expires_at: token_expiry(Instant::now(), token.expires_in),
        });
        Ok(value)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(u16, String), ArtifactError> {
        let token = self.bearer().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| ArtifactError::connection(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ArtifactError::connection(e.to_string()))?;
        Ok((status, body))
    }
}

#[async_trait]
impl ScanArtifactClient for FalconClient {
    fn name(&self) -> &str {
        "quickscan-pro"
    }

    async fn upload(&self, data: Bytes, filename: &str) -> Result<UploadReceipt, ArtifactError> {
        let part = reqwest::multipart::Part::stream(data).file_name(filename.to_string());
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("scan", "true");

        let request = self.client.post(self.url(FILES_PATH)).multipart(form);
        let (status, body) = self.send(request).await?;
        parse_upload(status, &body)
    }

    async fn launch_scan(&self, sha256: &str) -> Result<ScanHandle, ArtifactError> {
        let payload = serde_json::json!({ "resources": [{ "sha256": sha256 }] });
        let request = self.client.post(self.url(SCANS_PATH)).json(&payload);
        let (status, body) = self.send(request).await?;
        parse_launch(status, &body, sha256)
    }

    async fn poll_result(&self, handle: &ScanHandle) -> Result<PollStatus, ArtifactError> {
        let request = self
            .client
            .get(self.url(SCANS_PATH))
            .query(&[("ids", handle.scan_id.as_str())]);
        let (status, body) = self.send(request).await?;
        parse_poll(status, &body)
    }

    async fn delete_artifact(&self, sha256: &str) -> Result<(), ArtifactError> {
        let request = self
            .client
            .delete(self.url(FILES_PATH))
            .query(&[("ids", sha256)]);
        let (status, _) = self.send(request).await?;
        check_delete(status, sha256)
    }
}

/// Response envelope shared by every QuickScan Pro endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    resources: Option<Vec<T>>,
    errors: Option<Vec<ApiMessage>>,
}

impl<T> Envelope<T> {
    fn first_resource(self) -> Option<T> {
        self.resources.and_then(|r| r.into_iter().next())
    }
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct FileResource {
    sha256: String,
}

#[derive(Debug, Deserialize)]
struct LaunchResource {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ScanResource {
    scan: Option<ScanState>,
    result: Option<ScanOutput>,
}

#[derive(Debug, Deserialize)]
struct ScanState {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ScanOutput {
    file_artifacts: Option<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    1799
}

fn decode<T: for<'de> Deserialize<'de>>(
    operation: &'static str,
    body: &str,
) -> Result<Envelope<T>, ArtifactError> {
    serde_json::from_str(body).map_err(|e| ArtifactError::malformed(operation, e.to_string()))
}

/// First error message of an envelope, if the body carries one.
fn first_error(body: &str) -> Option<String> {
    let envelope: Envelope<serde_json::Value> = serde_json::from_str(body).ok()?;
    envelope
        .errors?
        .into_iter()
        .next()
        .map(|e| e.message)
}

fn parse_token(status: u16, body: &str) -> Result<TokenResponse, ArtifactError> {
    if !(200..300).contains(&status) {
        return Err(ArtifactError::Authentication {
            reason: first_error(body).unwrap_or_else(|| format!("token request returned {}", status)),
        });
    }
    serde_json::from_str(body).map_err(|e| ArtifactError::malformed("token", e.to_string()))
}

/// Statuses above 201 are upload failures.
pub(crate) fn parse_upload(status: u16, body: &str) -> Result<UploadReceipt, ArtifactError> {
    if status > 201 {
        return Err(ArtifactError::Upload {
            status,
            message: first_error(body).unwrap_or_default(),
        });
    }
    let resource = decode::<FileResource>("upload", body)?
        .first_resource()
        .ok_or_else(|| ArtifactError::malformed("upload", "no file resource in response"))?;
    Ok(UploadReceipt::new(resource.sha256, status))
}

/// A refused launch with an error body is a rejection, without one a rate limit.
pub(crate) fn parse_launch(
    status: u16,
    body: &str,
    sha256: &str,
) -> Result<ScanHandle, ArtifactError> {
    if status >= 300 {
        return Err(match first_error(body) {
            Some(message) => ArtifactError::LaunchRejected { status, message },
            None => ArtifactError::RateLimited { status },
        });
    }
    let resource = decode::<LaunchResource>("launch_scan", body)?
        .first_resource()
        .ok_or_else(|| ArtifactError::malformed("launch_scan", "no scan resource in response"))?;
    Ok(ScanHandle::new(resource.id, sha256))
}

/// Anything short of `done` with populated artifacts is still pending.
///
/// A 429, or a refusal without an error body, is a rate limit.
pub(crate) fn parse_poll(status: u16, body: &str) -> Result<PollStatus, ArtifactError> {
    if status >= 300 {
        return Err(match first_error(body) {
            Some(message) if status != 429 => ArtifactError::Poll { status, message },
            _ => ArtifactError::RateLimited { status },
        });
    }
    let Some(resource) = decode::<ScanResource>("poll_result", body)?.first_resource() else {
        return Ok(PollStatus::Pending);
    };

    let done = resource.scan.as_ref().is_some_and(|s| s.status == "done");
    let artifacts = resource
        .result
        .and_then(|r| r.file_artifacts)
        .unwrap_or_default();
    if !done || artifacts.is_empty() {
        return Ok(PollStatus::Pending);
    }

    let verdicts = artifacts
        .into_iter()
        .filter_map(|artifact| {
            let sha256 = artifact.get("sha256").and_then(|v| v.as_str());
            let verdict = artifact.get("verdict").and_then(|v| v.as_str());
            match (sha256, verdict) {
                (Some(sha256), Some(verdict)) => {
                    let verdict = ScanVerdict::new(sha256, Verdict::parse(verdict));
                    Some(verdict.with_detail(artifact))
                }
                _ => {
                    tracing::warn!(
                        artifact = %artifact,
                        "Dropping file artifact without sha256 or verdict"
                    );
                    None
                }
            }
        })
        .collect();
    Ok(PollStatus::Done(verdicts))
}

pub(crate) fn check_delete(status: u16, sha256: &str) -> Result<(), ArtifactError> {
    if status > 201 {
        return Err(ArtifactError::Delete {
            sha256: sha256.to_string(),
            status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let credentials = FalconCredentials::new(Some("id".into()), Some("secret".into())).unwrap();
        let config = FalconConfig::new(credentials)
            .with_base_url("https://api.us-2.crowdstrike.com/")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(config.base_url, "https://api.us-2.crowdstrike.com");
        assert_eq!(config.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_parse_upload() {
        let body = r#"{"meta":{},"resources":[{"sha256":"abc123"}],"errors":[]}"#;
        let receipt = parse_upload(200, body).unwrap();
        assert_eq!(receipt.sha256, "abc123");
        assert_eq!(receipt.status_code, 200);

        let denied = r#"{"resources":null,"errors":[{"code":403,"message":"access denied"}]}"#;
        match parse_upload(403, denied) {
            Err(ArtifactError::Upload { status, message }) => {
                assert_eq!(status, 403);
                assert_eq!(message, "access denied");
            }
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            parse_upload(200, r#"{"resources":[]}"#),
            Err(ArtifactError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_parse_launch_distinguishes_refusals() {
        let ok = r#"{"resources":[{"id":"scan-42"}]}"#;
        let handle = parse_launch(200, ok, "abc").unwrap();
        assert_eq!(handle.scan_id, "scan-42");
        assert_eq!(handle.sha256, "abc");

        let rejected = r#"{"resources":[],"errors":[{"message":"invalid sha256"}]}"#;
        assert!(matches!(
            parse_launch(400, rejected, "abc"),
            Err(ArtifactError::LaunchRejected { .. })
        ));

        assert!(matches!(
            parse_launch(429, r#"{"resources":[],"errors":[]}"#, "abc"),
            Err(ArtifactError::RateLimited { status: 429 })
        ));
        assert!(matches!(
            parse_launch(429, "", "abc"),
            Err(ArtifactError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_parse_poll_pending_states() {
        let running = r#"{"resources":[{"scan":{"status":"in_progress"}}]}"#;
        assert_eq!(parse_poll(200, running).unwrap(), PollStatus::Pending);

        let done_empty = r#"{"resources":[{"scan":{"status":"done"},"result":{"file_artifacts":[]}}]}"#;
        assert_eq!(parse_poll(200, done_empty).unwrap(), PollStatus::Pending);

        let done_no_result = r#"{"resources":[{"scan":{"status":"done"}}]}"#;
        assert_eq!(parse_poll(200, done_no_result).unwrap(), PollStatus::Pending);

        assert_eq!(parse_poll(200, r#"{"resources":[]}"#).unwrap(), PollStatus::Pending);
    }

    #[test]
    fn test_parse_poll_done() {
        let body = r#"{
            "resources": [{
                "scan": {"status": "done"},
                "result": {"file_artifacts": [
                    {"sha256": "abc", "verdict": "Malicious", "file_type": "pe"},
                    {"sha256": "def", "verdict": "clean"}
                ]}
            }]
        }"#;
        match parse_poll(200, body).unwrap() {
            PollStatus::Done(verdicts) => {
                assert_eq!(verdicts.len(), 2);
                assert_eq!(verdicts[0].verdict, Verdict::Malicious);
                assert_eq!(verdicts[0].detail["file_type"], "pe");
                assert_eq!(verdicts[1].verdict, Verdict::Clean);
            }
            PollStatus::Pending => panic!("expected done"),
        }
    }

    #[test]
    fn test_parse_poll_drops_incomplete_artifacts() {
        let body = r#"{"resources":[{"scan":{"status":"done"},"result":{"file_artifacts":[
            {"verdict": "clean"},
            {"sha256": "abc", "verdict": "unknown"}
        ]}}]}"#;
        match parse_poll(200, body).unwrap() {
            PollStatus::Done(verdicts) => {
                assert_eq!(verdicts.len(), 1);
                assert_eq!(verdicts[0].sha256, "abc");
            }
            PollStatus::Pending => panic!("expected done"),
        }
    }

    #[test]
    fn test_parse_poll_error_status() {
        assert!(matches!(
            parse_poll(500, r#"{"errors":[{"message":"boom"}]}"#),
            Err(ArtifactError::Poll { status: 500, .. })
        ));
        assert!(matches!(
            parse_poll(200, "not json"),
            Err(ArtifactError::MalformedResponse { .. })
        ));
    }

    #[test]
    fn test_parse_poll_rate_limited() {
        let err = parse_poll(
            429,
            r#"{"errors":[{"code":429,"message":"API rate limit exceeded."}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ArtifactError::RateLimited { status: 429 }));
        assert!(err.is_transient());

        let err = parse_poll(503, "").unwrap_err();
        assert!(matches!(err, ArtifactError::RateLimited { status: 503 }));
        assert!(err.is_transient());
    }

    #[test]
    fn test_token_expiry_overflow() {
        let now = Instant::now();
        assert_eq!(token_expiry(now, 60), now + Duration::from_secs(60));
        assert_eq!(token_expiry(now, u64::MAX), now + Duration::from_secs(1799));
    }

    #[test]
    fn test_check_delete() {
        assert!(check_delete(200, "abc").is_ok());
        assert!(matches!(
            check_delete(404, "abc"),
            Err(ArtifactError::Delete { status: 404, .. })
        ));
    }

    #[test]
    fn test_parse_token() {
        let token = parse_token(201, r#"{"access_token":"t0k","expires_in":1799}"#).unwrap();
        assert_eq!(token.access_token, "t0k");
        assert_eq!(token.expires_in, 1799);

        assert!(matches!(
            parse_token(401, r#"{"errors":[{"message":"access denied"}]}"#),
            Err(ArtifactError::Authentication { .. })
        ));
    }
}
