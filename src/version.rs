//! Release check — compares the running version with the latest release.
//!
//! Purely informational: called once at startup, never touches the engine.

use std::cmp::Ordering;

use serde::Deserialize;
use tracing::{info, warn};

use crate::error::VersionError;

pub const RELEASE_FEED: &str =
    "https://api.github.com/repos/trigger-watch/trigger-watch/releases/latest";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionStatus {
    /// The remote release is newer than this build.
    NewerAvailable,
    /// This build is ahead of the latest release.
    AheadOfRelease,
    UpToDate,
    /// Fewer than three dot-separated parts.
    Malformed,
    /// A part is not an integer.
    Experimental,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Compare `remote` against `local`, part by part.
pub fn compare_versions(remote: &str, local: &str) -> VersionStatus {
    let split = |v: &str| -> Vec<String> {
        v.trim()
            .trim_start_matches('v')
            .splitn(3, '.')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect()
    };
    let remote = split(remote);
    let local = split(local);
    if remote.len() < 3 || local.len() < 3 {
        return VersionStatus::Malformed;
    }

    for (a, b) in remote.iter().zip(&local) {
        let (Ok(a), Ok(b)) = (a.parse::<u32>(), b.parse::<u32>()) else {
            return VersionStatus::Experimental;
        };
        match a.cmp(&b) {
            Ordering::Greater => return VersionStatus::NewerAvailable,
            Ordering::Less => return VersionStatus::AheadOfRelease,
            Ordering::Equal => {}
        }
    }
    VersionStatus::UpToDate
}

pub async fn fetch_latest_release(
    client: &reqwest::Client,
    feed: &str,
    user_agent: &str,
) -> Result<Release, VersionError> {
    let resp = client
        .get(feed)
        .header(reqwest::header::USER_AGENT, user_agent)
        .send()
        .await?;
    if !resp.status().is_success() {
        return Err(VersionError::Status(resp.status().as_u16()));
    }
    Ok(resp.json().await?)
}

/// Fetch the latest release and log how this build compares.
/// Failures are logged and swallowed.
pub async fn check_latest_release(client: &reqwest::Client, user_agent: &str) -> Option<VersionStatus> {
    info!("Checking for newer versions...");
    let release = match fetch_latest_release(client, RELEASE_FEED, user_agent).await {
        Ok(r) => r,
        Err(e) => {
            warn!("Version check failed: {}", e);
            return None;
        }
    };

    let status = compare_versions(&release.tag_name, env!("CARGO_PKG_VERSION"));
    match status {
        VersionStatus::NewerAvailable => info!(
            release = %release.tag_name,
            "A newer version of trigger-watch has been released"
        ),
        VersionStatus::AheadOfRelease => warn!(
            "You are using a bleeding-edge build, it is recommended to use the latest official release"
        ),
        VersionStatus::UpToDate => info!("trigger-watch is up to date"),
        VersionStatus::Malformed => warn!(
            "Invalid semantic versioning — it is recommended to use the latest official release"
        ),
        VersionStatus::Experimental => warn!("You are using an experimental build, here be dragons"),
    }
    Some(status)
}
