//! Command-line interface of the `bucketguard` binary.

use crate::backends::{CloudObjectStore, FalconClient, FalconConfig};
use crate::config::{parse_flag, BucketTarget, FalconCredentials, Provider, RunConfig, Settings};
use crate::core::ConfigError;
use crate::event::{EventHandler, StorageEvent};
use crate::manager::BatchOrchestrator;
use crate::telemetry::{self, LogOptions};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

/// Settings file read from the working directory when `--config` is absent.
const DEFAULT_SETTINGS_FILE: &str = "bucketguard.toml";

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "bucketguard", version)]
#[command(about = "Scan GCS and S3 buckets for malware with QuickScan Pro")]
pub struct Args {
    /// Command to run.
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to a settings TOML. If omitted, uses ./bucketguard.toml if present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace/debug/info/warn/error).
    #[arg(short = 'l', long, global = true)]
    pub log_level: Option<String>,

    /// Also write logs to this file, rotated daily.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Options shared by every command that talks to the scan service.
#[derive(clap::Args, Debug)]
pub struct ApiArgs {
    /// Falcon API client ID.
    #[arg(short = 'k', long = "key", env = "FALCON_CLIENT_ID", hide_env_values = true)]
    pub client_id: Option<String>,

    /// Falcon API client secret.
    #[arg(short = 's', long = "secret", env = "FALCON_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Falcon API base URL.
    #[arg(long, env = "BASE_URL")]
    pub base_url: Option<String>,

    /// Remove objects with a malicious or suspicious verdict.
    #[arg(long, env = "MITIGATE_THREATS", value_parser = parse_mitigate)]
    pub mitigate: Option<bool>,

    /// Objects of this many bytes or more are skipped.
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Seconds between two polls of a scan.
    #[arg(short = 'd', long = "check-delay")]
    pub check_delay: Option<u64>,

    /// Give up on a scan after this many polls (0 polls forever).
    #[arg(long)]
    pub max_poll_attempts: Option<u32>,
}

/// Subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan every object in a bucket.
    ScanBucket {
        /// Bucket to scan: gs://BUCKET or s3://BUCKET.
        #[arg(short = 't', long)]
        target: String,

        /// Project ID of a Cloud Storage bucket.
        #[arg(short = 'p', long)]
        project: Option<String>,

        /// Number of objects per batch.
        #[arg(short = 'b', long = "batch")]
        batch_size: Option<usize>,

        /// Number of concurrent scan jobs.
        #[arg(short = 'w', long = "workers")]
        max_workers: Option<usize>,

        #[command(flatten)]
        api: ApiArgs,
    },

    /// Scan the object named by one storage notification.
    HandleEvent {
        /// File holding a GCS or S3 notification payload.
        #[arg(long)]
        event: PathBuf,

        /// File holding `{"FalconClientId": ..., "FalconSecret": ...}`.
        #[arg(long)]
        secret_json: Option<PathBuf>,

        #[command(flatten)]
        api: ApiArgs,
    },
}

fn parse_mitigate(raw: &str) -> Result<bool, String> {
    parse_flag(raw).map_err(|e| e.to_string())
}

/// Runs the parsed command.
pub async fn dispatch(args: Args) -> Result<()> {
    let settings = load_settings(args.config.as_deref())?;
    let _guard = init_logging(&args, &settings)?;
    info!("Process startup complete, preparing to run scan");

    match args.cmd {
        Command::ScanBucket {
            target,
            project,
            batch_size,
            max_workers,
            api,
        } => {
            let mut config = run_config(&settings, &api);
            if let Some(size) = batch_size {
                config = config.with_batch_size(size);
            }
            if let Some(workers) = max_workers {
                config = config.with_max_workers(workers);
            }
            scan_bucket(&settings, &target, project.as_deref(), &api, config).await
        }
        Command::HandleEvent {
            event,
            secret_json,
            api,
        } => {
            let config = run_config(&settings, &api);
            handle_event(&settings, &event, secret_json.as_deref(), &api, config).await
        }
    }
}

fn load_settings(user: Option<&Path>) -> Result<Settings> {
    if let Some(path) = user {
        return Settings::load(path).with_context(|| format!("load settings: {}", path.display()));
    }
    let default = Path::new(DEFAULT_SETTINGS_FILE);
    if default.exists() {
        Settings::load(default).context("load settings: bucketguard.toml")
    } else {
        Ok(Settings::default())
    }
}

fn init_logging(args: &Args, settings: &Settings) -> Result<Option<WorkerGuard>> {
    let file = args.log_file.clone().or_else(|| {
        (!settings.logging.file_path.is_empty()).then(|| PathBuf::from(&settings.logging.file_path))
    });
    let options = LogOptions {
        level: args
            .log_level
            .clone()
            .unwrap_or_else(|| settings.logging.level.clone()),
        json: args.json_logs || settings.logging.json,
        file,
        max_files: settings.logging.max_files,
    };
    Ok(telemetry::init(&options)?)
}

fn run_config(settings: &Settings, api: &ApiArgs) -> RunConfig {
    let mut config = settings.run.to_run_config();
    if let Some(size) = api.max_file_size {
        config = config.with_max_file_size(size);
    }
    if let Some(secs) = api.check_delay {
        config = config.with_poll_interval(Duration::from_secs(secs));
    }
    if let Some(attempts) = api.max_poll_attempts {
        config.poll = config.poll.with_max_attempts(attempts);
    }
    if let Some(mitigate) = api.mitigate {
        config = config.with_mitigation(mitigate);
    }
    config
}

fn falcon_client(
    settings: &Settings,
    api: &ApiArgs,
    credentials: FalconCredentials,
) -> Result<FalconClient> {
    let base_url = api
        .base_url
        .clone()
        .unwrap_or_else(|| settings.falcon.base_url.clone());
    let config = FalconConfig::new(credentials)
        .with_base_url(base_url)
        .with_timeout(Duration::from_secs(settings.falcon.request_timeout_secs));
    Ok(FalconClient::new(config)?)
}

async fn scan_bucket(
    settings: &Settings,
    target: &str,
    project: Option<&str>,
    api: &ApiArgs,
    config: RunConfig,
) -> Result<()> {
    let target = BucketTarget::parse(target)?;
    if target.provider == Provider::Gcs && project.is_none() {
        return Err(ConfigError::MissingProject {
            bucket: target.bucket.clone(),
        }
        .into());
    }
    let credentials = FalconCredentials::new(api.client_id.clone(), api.client_secret.clone())?;
    let client = falcon_client(settings, api, credentials)?;
    let store = CloudObjectStore::connect(&target, project)
        .with_context(|| format!("connect to {}", target))?;

    let orchestrator = BatchOrchestrator::new(Arc::new(store), Arc::new(client), config)?;
    let report = orchestrator.run().await?;
    println!("{}", serde_json::to_string_pretty(&report.summary)?);
    Ok(())
}

async fn handle_event(
    settings: &Settings,
    event_path: &Path,
    secret_json: Option<&Path>,
    api: &ApiArgs,
    config: RunConfig,
) -> Result<()> {
    let raw = std::fs::read_to_string(event_path)
        .with_context(|| format!("read event: {}", event_path.display()))?;
    let event = StorageEvent::from_json(&raw)?;

    let credentials = match secret_json {
        Some(path) => {
            let secret = std::fs::read_to_string(path)
                .with_context(|| format!("read secret: {}", path.display()))?;
            FalconCredentials::from_secret_json(&secret)?
        }
        None => FalconCredentials::new(api.client_id.clone(), api.client_secret.clone())?,
    };
    let client = falcon_client(settings, api, credentials)?;
    let target = BucketTarget::new(event.provider, event.bucket.clone());
    let store = CloudObjectStore::connect(&target, None)
        .with_context(|| format!("connect to {}", target))?;

    let handler = EventHandler::new(Arc::new(store), Arc::new(client), &config.validated()?);
    let outcome = handler.handle(&event).await?;
    println!("{}", outcome.summary());
    Ok(())
}
