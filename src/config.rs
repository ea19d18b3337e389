//! Configuration — CLI flags, optional JSON file, and the validated
//! `EngineConfig` record handed to the builder and scheduler.
//!
//! Precedence: CLI flag > config file > built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

pub const DEFAULT_POLL_INTERVAL_MS: u64 = 750;
/// The remote service enforces its own minimum spacing; anything lower is clamped up.
pub const MIN_POLL_INTERVAL_MS: u64 = 600;
pub const DEFAULT_FRESHNESS_WINDOW_SECS: i64 = 7200;
pub const DEFAULT_ADVISORY_THRESHOLD: u32 = 10;
pub const DEFAULT_FIXED_BACKOFF_SECS: u64 = 5;
pub const DEFAULT_NTP_SERVER: &str = "pool.ntp.org";
pub const DEFAULT_CLOCK_TIMEOUT_MS: u64 = 5000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_CONTACT: &str = "https://github.com/trigger-watch/trigger-watch";

#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about, long_about = None)]
pub struct Settings {
    /// The nation using trigger-watch, sent to the API as identification
    #[arg(short = 'n', long)]
    pub nation: String,

    /// A comma-separated list of triggers to use instead of the trigger file
    #[arg(short = 't', long)]
    pub triggers: Option<String>,

    /// File with one trigger per line
    #[arg(long, default_value = "trigger_list.txt")]
    pub trigger_file: PathBuf,

    /// Milliseconds between API requests, minimum is 600
    #[arg(short = 'p', long)]
    pub poll_speed: Option<u64>,

    /// Ring the terminal bell when a target updates
    #[arg(short = 'b', long)]
    pub beep: bool,

    /// Optional JSON file with engine tunables
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Skip the release feed lookup at startup
    #[arg(long)]
    pub no_version_check: bool,

    /// NTP server used as the time authority
    #[arg(long)]
    pub ntp_server: Option<String>,
}

/// Tunables accepted from the optional JSON config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileConfig {
    pub poll_interval_ms: Option<u64>,
    pub freshness_window_seconds: Option<i64>,
    pub rate_limit_advisory_threshold: Option<u32>,
    pub fixed_backoff_seconds: Option<u64>,
    pub ntp_server: Option<String>,
    pub ntp_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub user_agent_contact: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

/// The explicit configuration record consumed by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Minimum spacing between two probes.
    pub poll_interval: Duration,
    /// Targets updated more recently than this are not watched.
    pub freshness_window_secs: i64,
    /// Requests-seen count above which the operator is warned.
    pub advisory_threshold: u32,
    /// Cooldown after a rate-limit signal without a retry-after hint.
    pub fixed_backoff: Duration,
    pub ntp_server: String,
    pub clock_timeout: Duration,
    /// Upper bound on one HTTP request, connect to last body byte.
    pub request_timeout: Duration,
    pub contact: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            freshness_window_secs: DEFAULT_FRESHNESS_WINDOW_SECS,
            advisory_threshold: DEFAULT_ADVISORY_THRESHOLD,
            fixed_backoff: Duration::from_secs(DEFAULT_FIXED_BACKOFF_SECS),
            ntp_server: DEFAULT_NTP_SERVER.to_string(),
            clock_timeout: Duration::from_millis(DEFAULT_CLOCK_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            contact: DEFAULT_CONTACT.to_string(),
        }
    }
}

impl EngineConfig {
    /// Merge CLI settings over the optional config file over defaults.
    pub fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let file = match &settings.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::merge(settings, file)
    }

    fn merge(settings: &Settings, file: FileConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let freshness_window_secs = file
            .freshness_window_seconds
            .unwrap_or(defaults.freshness_window_secs);
        if freshness_window_secs < 0 {
            return Err(ConfigError::Invalid(format!(
                "freshnessWindowSeconds must not be negative (got {})",
                freshness_window_secs
            )));
        }

        let fixed_backoff_secs = file
            .fixed_backoff_seconds
            .unwrap_or(DEFAULT_FIXED_BACKOFF_SECS);
        if fixed_backoff_secs == 0 {
            return Err(ConfigError::Invalid("fixedBackoffSeconds must be at least 1".into()));
        }

        let request_timeout_ms = file
            .request_timeout_ms
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS);
        if request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("requestTimeoutMs must be at least 1".into()));
        }

        let poll_ms = settings
            .poll_speed
            .or(file.poll_interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        Ok(Self {
            poll_interval: clamp_poll_interval(poll_ms),
            freshness_window_secs,
            advisory_threshold: file
                .rate_limit_advisory_threshold
                .unwrap_or(defaults.advisory_threshold),
            fixed_backoff: Duration::from_secs(fixed_backoff_secs),
            ntp_server: settings
                .ntp_server
                .clone()
                .or(file.ntp_server)
                .unwrap_or(defaults.ntp_server),
            clock_timeout: file
                .ntp_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.clock_timeout),
            request_timeout: Duration::from_millis(request_timeout_ms),
            contact: file.user_agent_contact.unwrap_or(defaults.contact),
        })
    }
}

/// Clamp a requested poll interval up to the service floor.
pub fn clamp_poll_interval(requested_ms: u64) -> Duration {
    if requested_ms < MIN_POLL_INTERVAL_MS {
        warn!(
            requested_ms,
            floor_ms = MIN_POLL_INTERVAL_MS,
            "Poll speed below minimum — clamping up"
        );
        Duration::from_millis(MIN_POLL_INTERVAL_MS)
    } else {
        Duration::from_millis(requested_ms)
    }
}
