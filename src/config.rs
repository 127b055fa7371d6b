//! Environment-driven configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::{Error, Result, collaborators};

/// Runtime settings, read from the environment (`.env` supported via
/// dotenvy in `main`).
#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: String,
    /// Root for downloaded media and other local artifacts.
    pub storage_root: PathBuf,

    /// Attempt budget per stage.
    pub max_attempts: i64,
    /// Age past which an in-progress lease counts as stuck.
    pub stuck_threshold: Duration,
    /// Interval between recovery sweeps.
    pub sweep_interval: Duration,

    /// Interval between discovery runs.
    pub discovery_interval: Duration,
    /// Recency window handed to the scrapers.
    pub discovery_cutoff_days: i64,

    /// Per-stage worker counts.
    pub resolve_workers: usize,
    pub download_workers: usize,
    pub transcribe_workers: usize,
    /// Stage action timeout.
    pub action_timeout: Duration,
    /// Idle worker poll interval.
    pub poll_interval_ms: u64,

    /// Archive endpoints.
    pub house_archive_url: String,
    pub senate_api_url: String,
    pub senate_resolve_url: String,

    /// Transcription backend.
    pub transcriber_endpoint: String,
    pub transcriber_model: String,
    pub transcriber_api_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: var_or("DATABASE_URL", "sqlite:data/legisrec.db?mode=rwc"),
            storage_root: PathBuf::from(var_or("STORAGE_ROOT", "./data")),

            max_attempts: parse_var("MAX_ATTEMPTS", 3)?,
            stuck_threshold: Duration::from_secs(parse_var("STUCK_THRESHOLD_SECS", 1800)?),
            sweep_interval: Duration::from_secs(parse_var("SWEEP_INTERVAL_SECS", 60)?),

            discovery_interval: Duration::from_secs(parse_var("DISCOVERY_INTERVAL_SECS", 3600)?),
            discovery_cutoff_days: parse_var("DISCOVERY_CUTOFF_DAYS", 60)?,

            resolve_workers: parse_var("RESOLVE_WORKERS", 2)?,
            download_workers: parse_var("DOWNLOAD_WORKERS", 2)?,
            transcribe_workers: parse_var("TRANSCRIBE_WORKERS", 1)?,
            action_timeout: Duration::from_secs(parse_var("ACTION_TIMEOUT_SECS", 3600)?),
            poll_interval_ms: parse_var("WORKER_POLL_INTERVAL_MS", 500)?,

            house_archive_url: var_or("HOUSE_ARCHIVE_URL", collaborators::house::DEFAULT_ARCHIVE_URL),
            senate_api_url: var_or("SENATE_API_URL", collaborators::senate::DEFAULT_API_URL),
            senate_resolve_url: var_or(
                "SENATE_RESOLVE_URL",
                collaborators::senate::DEFAULT_RESOLVE_URL,
            ),

            transcriber_endpoint: var_or(
                "TRANSCRIBER_ENDPOINT",
                "https://api.openai.com/v1/audio/transcriptions",
            ),
            transcriber_model: var_or("TRANSCRIBER_MODEL", collaborators::whisper::DEFAULT_MODEL),
            transcriber_api_key: std::env::var("TRANSCRIBER_API_KEY").ok().filter(|k| !k.is_empty()),
        })
    }

    /// Directory downloaded media lands in.
    pub fn videos_dir(&self) -> PathBuf {
        self.storage_root.join("videos")
    }
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).ok().filter(|v| !v.is_empty()).unwrap_or_else(|| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) if !raw.is_empty() => raw
            .parse()
            .map_err(|e| Error::config(format!("invalid {name}={raw}: {e}"))),
        _ => Ok(default),
    }
}
