//! Run configuration.
//!
//! [`RunConfig`] is immutable for the duration of a run and shared by
//! reference between the orchestrator and every scan job. [`Settings`] is the
//! optional TOML file the binary reads before applying CLI overrides.

use crate::core::ConfigError;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Default maximum scannable object size (256 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

/// Default number of objects per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default number of concurrent scan jobs within a batch.
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Default delay between scan result polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Default number of polls before a scan is given up on.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 200;

/// Default scan service base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.crowdstrike.com";

/// Fixed-delay polling bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between two polls of the same scan.
    pub interval: Duration,

    /// Maximum number of polls; `None` polls until the scan finishes.
    pub max_attempts: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: Some(DEFAULT_MAX_POLL_ATTEMPTS),
        }
    }
}

impl PollConfig {
    /// Creates a new poll configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Polls without an attempt limit.
    pub fn unbounded() -> Self {
        Self {
            max_attempts: None,
            ..Self::default()
        }
    }

    /// Sets the delay between polls.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Sets the maximum number of polls. Zero means unbounded.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = (attempts > 0).then_some(attempts);
        self
    }

    /// Returns whether another poll may be issued after `attempts` polls.
    pub fn should_poll(&self, attempts: u32) -> bool {
        match self.max_attempts {
            Some(max) => attempts < max,
            None => true,
        }
    }
}

/// Immutable configuration for one scan run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Number of objects per batch.
    pub batch_size: usize,

    /// Maximum number of concurrent scan jobs within a batch.
    pub max_workers: usize,

    /// Polling bounds for scan results.
    pub poll: PollConfig,

    /// Objects of this size or larger are skipped.
    pub max_file_size: u64,

    /// Whether objects with a threat verdict are deleted from the bucket.
    pub mitigate: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            poll: PollConfig::default(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            mitigate: true,
        }
    }
}

impl RunConfig {
    /// Creates a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size.
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Sets the worker pool size.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Sets the polling bounds.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the delay between polls.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    /// Sets the maximum scannable object size.
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Enables or disables mitigation.
    pub fn with_mitigation(mut self, enabled: bool) -> Self {
        self.mitigate = enabled;
        self
    }

    /// Checks that the configuration can drive a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::invalid("batch_size", "must be at least 1"));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::invalid("max_workers", "must be at least 1"));
        }
        if self.poll.interval.is_zero() {
            return Err(ConfigError::invalid("poll_interval", "must be non-zero"));
        }
        Ok(())
    }

    /// Returns the configuration if it is valid.
    pub fn validated(self) -> Result<Self, ConfigError> {
        self.validate()?;
        Ok(self)
    }
}

/// Storage provider of a bucket target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Google Cloud Storage (`gs://`).
    Gcs,
    /// Amazon S3 (`s3://`).
    S3,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gcs => write!(f, "gs"),
            Self::S3 => write!(f, "s3"),
        }
    }
}

/// A bucket to scan, parsed from `gs://BUCKET` or `s3://BUCKET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketTarget {
    /// Storage provider.
    pub provider: Provider,
    /// Bucket name.
    pub bucket: String,
}

impl BucketTarget {
    /// Parses a bucket URL.
    ///
    /// A trailing slash is accepted; any path below the bucket is rejected.
    pub fn parse(target: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidTarget {
            target: target.to_string(),
        };

        let (provider, rest) = if let Some(rest) = target.strip_prefix("gs://") {
            (Provider::Gcs, rest)
        } else if let Some(rest) = target.strip_prefix("s3://") {
            (Provider::S3, rest)
        } else {
            return Err(invalid());
        };

        let bucket = rest.trim_end_matches('/');
        if bucket.is_empty() || bucket.contains('/') {
            return Err(invalid());
        }

        Ok(Self {
            provider,
            bucket: bucket.to_string(),
        })
    }

    /// Creates a target directly from its parts.
    pub fn new(provider: Provider, bucket: impl Into<String>) -> Self {
        Self {
            provider,
            bucket: bucket.into(),
        }
    }
}

impl fmt::Display for BucketTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.provider, self.bucket)
    }
}

/// Scan service API credentials.
#[derive(Clone)]
pub struct FalconCredentials {
    /// OAuth2 client ID.
    pub client_id: String,
    /// OAuth2 client secret.
    pub client_secret: SecretString,
}

impl FalconCredentials {
    /// Creates credentials, rejecting empty values.
    pub fn new(
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Result<Self, ConfigError> {
        let client_id = client_id
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingCredential {
                name: "FALCON_CLIENT_ID",
            })?;
        let client_secret = client_secret
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::MissingCredential {
                name: "FALCON_CLIENT_SECRET",
            })?;
        Ok(Self {
            client_id,
            client_secret: SecretString::from(client_secret),
        })
    }

    /// Decodes a secrets-manager payload of the form
    /// `{"FalconClientId": "...", "FalconSecret": "..."}`.
    pub fn from_secret_json(raw: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct SecretPayload {
            #[serde(rename = "FalconClientId")]
            client_id: Option<String>,
            #[serde(rename = "FalconSecret")]
            client_secret: Option<String>,
        }

        let payload: SecretPayload = serde_json::from_str(raw)?;
        Self::new(payload.client_id, payload.client_secret)
    }

    /// Returns the secret for use in an authentication request.
    pub fn secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

impl fmt::Debug for FalconCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FalconCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Parses a boolean flag the way `MITIGATE_THREATS` is written (`TRUE`, `false`, `1`, ...).
pub fn parse_flag(raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::invalid(
            "mitigate",
            format!("'{}' is not a boolean", other),
        )),
    }
}

/// Settings file contents. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Scan run tuning.
    #[serde(default)]
    pub run: RunSettings,
    /// Log output.
    #[serde(default)]
    pub logging: LogSettings,
    /// Scan service endpoint.
    #[serde(default)]
    pub falcon: FalconSettings,
}

impl Settings {
    /// Loads settings from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    /// Parses settings from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }
}

/// `[run]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    /// Objects per batch.
    pub batch_size: usize,
    /// Concurrent scan jobs.
    pub max_workers: usize,
    /// Seconds between polls.
    pub poll_interval_secs: u64,
    /// Zero means unbounded.
    pub max_poll_attempts: u32,
    /// Size limit in bytes.
    pub max_file_size: u64,
    /// Remove threats from the bucket.
    pub mitigate: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_workers: DEFAULT_MAX_WORKERS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            mitigate: true,
        }
    }
}

impl RunSettings {
    /// Converts the section into a run configuration.
    pub fn to_run_config(&self) -> RunConfig {
        RunConfig {
            batch_size: self.batch_size,
            max_workers: self.max_workers,
            poll: PollConfig::new()
                .with_interval(Duration::from_secs(self.poll_interval_secs))
                .with_max_attempts(self.max_poll_attempts),
            max_file_size: self.max_file_size,
            mitigate: self.mitigate,
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines.
    pub json: bool,
    /// Empty disables the log file.
    pub file_path: String,
    /// Rotated files kept.
    pub max_files: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".into(),
            json: false,
            file_path: String::new(),
            max_files: 5,
        }
    }
}

/// `[falcon]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FalconSettings {
    /// API base URL.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for FalconSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            request_timeout_secs: 60,
        }
    }
}
