//! Watch set — the prioritized queue of pending targets.
//!
//! Built once per run: every raw name is normalized, de-duplicated, probed
//! once, filtered, and the survivors are stable-sorted by their last
//! update. Targets that last updated earliest are expected to update next.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use super::rate_limit::RateLimiter;
use crate::config::EngineConfig;
use crate::error::ProbeError;
use crate::probe::{ProbeQuery, TargetProbe};

/// Replaces whitespace inside target names.
pub const JOIN_SEPARATOR: &str = "_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    NotFound,
    AlreadyUpdated,
    /// The target has never updated, so there is no baseline.
    NoUpdateHistory,
    FetchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryStatus {
    Pending,
    Fired,
    Removed(RemovalReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WatchEntry {
    pub name: String,
    /// Last update observed at admission. Never changes afterwards.
    pub baseline_timestamp: i64,
    pub status: EntryStatus,
}

impl WatchEntry {
    pub fn pending(name: impl Into<String>, baseline_timestamp: i64) -> Self {
        Self {
            name: name.into(),
            baseline_timestamp,
            status: EntryStatus::Pending,
        }
    }
}

/// Pending entries, ascending by baseline (ties keep input order).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSet {
    entries: VecDeque<WatchEntry>,
}

impl WatchSet {
    /// Sorts `entries` by baseline. Callers must only pass pending entries.
    pub fn from_entries(mut entries: Vec<WatchEntry>) -> Self {
        entries.sort_by_key(|e| e.baseline_timestamp);
        Self {
            entries: entries.into(),
        }
    }

    pub fn head(&self) -> Option<&WatchEntry> {
        self.entries.front()
    }

    pub(crate) fn pop_head(&mut self) -> Option<WatchEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchEntry> {
        self.entries.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    pub(crate) fn into_entries(self) -> Vec<WatchEntry> {
        self.entries.into()
    }
}

/// Trim, case-fold, and join whitespace-separated words.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(JOIN_SEPARATOR)
}

/// A candidate that did not make it into the watch set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedTarget {
    pub name: String,
    pub reason: RemovalReason,
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub watch_set: WatchSet,
    pub dropped: Vec<DroppedTarget>,
}

pub struct WatchSetBuilder<'a> {
    probe: &'a dyn TargetProbe,
    limiter: &'a mut RateLimiter,
    freshness_window_secs: i64,
    spacing: Duration,
}

impl<'a> WatchSetBuilder<'a> {
    pub fn new(
        probe: &'a dyn TargetProbe,
        limiter: &'a mut RateLimiter,
        config: &EngineConfig,
    ) -> Self {
        Self {
            probe,
            limiter,
            freshness_window_secs: config.freshness_window_secs,
            spacing: config.poll_interval,
        }
    }

    pub async fn build<S: AsRef<str>>(&mut self, names: &[S], now: i64) -> WatchSet {
        self.build_report(names, now).await.watch_set
    }

    /// Like `build`, also returning every dropped candidate and why.
    pub async fn build_report<S: AsRef<str>>(&mut self, names: &[S], now: i64) -> BuildReport {
        let mut seen = HashSet::new();
        let candidates: Vec<String> = names
            .iter()
            .map(|raw| normalize_name(raw.as_ref()))
            .filter(|name| !name.is_empty() && seen.insert(name.clone()))
            .collect();

        info!(candidates = candidates.len(), "Sorting triggers");

        let mut admitted = Vec::new();
        let mut dropped = Vec::new();

        for (i, name) in candidates.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.spacing).await;
            }
            match self.admit(&name, now).await {
                Ok(baseline) => admitted.push(WatchEntry::pending(name, baseline)),
                Err(reason) => dropped.push(DroppedTarget { name, reason }),
            }
        }

        let watch_set = WatchSet::from_entries(admitted);
        info!(
            admitted = watch_set.len(),
            dropped = dropped.len(),
            "Sorted {} triggers",
            watch_set.len()
        );
        BuildReport { watch_set, dropped }
    }

    /// Probe one candidate; `Ok` carries its baseline.
    async fn admit(&mut self, name: &str, now: i64) -> Result<i64, RemovalReason> {
        let state = loop {
            match self.limiter.probe(self.probe, name, ProbeQuery::Admission).await {
                // Backoff is armed; try the same name again once it elapses.
                Err(ProbeError::RateLimited { .. }) => continue,
                Err(ProbeError::NotFound) => {
                    warn!(region = %name, "Target does not exist — it will not be checked");
                    return Err(RemovalReason::NotFound);
                }
                Err(e) => {
                    warn!(region = %name, "Failed to fetch data: {} — it will not be checked", e);
                    return Err(RemovalReason::FetchFailed);
                }
                Ok(state) => break state,
            }
        };

        if !state.exists {
            warn!(region = %name, "Target does not exist — it will not be checked");
            return Err(RemovalReason::NotFound);
        }
        match state.last_update {
            None => {
                warn!(region = %name, "Target is a new region with no update history");
                Err(RemovalReason::NoUpdateHistory)
            }
            Some(last) if now - last < self.freshness_window_secs => {
                warn!(region = %name, last_update = last, "Target has already updated");
                Err(RemovalReason::AlreadyUpdated)
            }
            Some(last) => Ok(last),
        }
    }
}
