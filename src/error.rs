//! Error taxonomy for the engine and its outer surfaces.
//!
//! Probe failures are data, not control flow: the scheduler branches on
//! `ProbeError` variants to decide between retiring, retrying, or aborting.

use std::time::Duration;

use thiserror::Error;

/// Failure to obtain the authoritative UTC time.
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("time authority {server} unreachable: {source}")]
    Unreachable {
        server: String,
        #[source]
        source: std::io::Error,
    },
    #[error("time authority {server} did not answer within {timeout:?}")]
    Timeout { server: String, timeout: Duration },
    #[error("malformed time reply: {0}")]
    Malformed(String),
}

/// Typed failure of a single probe.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("target not found")]
    NotFound,
    #[error("rate limit exceeded (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("transient fetch failure: {0}")]
    Transient(String),
    #[error("fatal probe failure: {0}")]
    Fatal(String),
}

impl ProbeError {
    /// Whether the remote service signalled request-budget exhaustion.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ProbeError::RateLimited { .. })
    }
}

/// Conditions that end a run without completing it.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("clock unavailable: {0}")]
    ClockUnavailable(#[from] ClockError),
    #[error("probe for {target} failed: {source}")]
    Probe {
        target: String,
        #[source]
        source: ProbeError,
    },
    #[error("run cancelled by operator")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum TargetListError {
    #[error("target list {0} did not exist; a template was created, populate it and restart")]
    TemplateCreated(String),
    #[error("target list is empty")]
    Empty,
    #[error("failed to access target list {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum VersionError {
    #[error("release feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("release feed returned {0}")]
    Status(u16),
}
