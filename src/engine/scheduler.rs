//! Poll scheduler — the engine's control loop.
//!
//! Always polls the head of the watch set (earliest predicted update)
//! until it fires, then advances. No round-robin: the head is the entry
//! most likely to change next, so polling anything else wastes budget.
//!
//! Per iteration:
//! 1. wait the poll interval
//! 2. probe the head (through the rate limiter)
//! 3. not found → retire the head silently
//! 4. rate limited → keep the head, retry after the backoff
//! 5. any other failure → abort the run
//! 6. changed timestamp → emit an `UpdateEvent` and remove the head
//!
//! Every suspension point observes the cancellation token.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::rate_limit::RateLimiter;
use super::watch_set::{EntryStatus, RemovalReason, WatchEntry, WatchSet};
use crate::config::EngineConfig;
use crate::error::{EngineError, ProbeError};
use crate::probe::{ObservedState, ProbeQuery, TargetProbe};

type Polled = Result<ObservedState, ProbeError>;

/// A target transitioned from pending to fired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateEvent {
    pub name: String,
    pub fired_at_wall_clock: DateTime<Utc>,
    pub baseline_timestamp: i64,
    pub observed_timestamp: i64,
}

/// Running → Draining (set emptied) → Complete, or → Aborted from either.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Draining,
    Complete,
    Aborted,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub state: RunState,
    /// Every state the run passed through, in order.
    pub transitions: Vec<RunState>,
    pub total: usize,
    pub fired: Vec<UpdateEvent>,
    /// Entries removed mid-run (target disappeared).
    pub retired: Vec<WatchEntry>,
    /// Entries still pending when the run aborted.
    pub remaining: Vec<WatchEntry>,
    pub polls: u64,
    pub rate_limited: u32,
}

impl RunSummary {
    fn new(total: usize) -> Self {
        Self {
            state: RunState::Running,
            transitions: vec![RunState::Running],
            total,
            fired: Vec::new(),
            retired: Vec::new(),
            remaining: Vec::new(),
            polls: 0,
            rate_limited: 0,
        }
    }

    fn enter(&mut self, state: RunState) {
        debug!(?state, "Run state changed");
        self.state = state;
        self.transitions.push(state);
    }
}

/// A run that ended early. Events fired before the abort still stand.
#[derive(Debug, Error)]
#[error("run aborted: {source}")]
pub struct Aborted {
    pub summary: RunSummary,
    #[source]
    pub source: EngineError,
}

pub struct PollScheduler<'a> {
    probe: &'a dyn TargetProbe,
    limiter: &'a mut RateLimiter,
    poll_interval: Duration,
    cancel: CancellationToken,
}

impl<'a> PollScheduler<'a> {
    pub fn new(
        probe: &'a dyn TargetProbe,
        limiter: &'a mut RateLimiter,
        config: &EngineConfig,
    ) -> Self {
        Self {
            probe,
            limiter,
            poll_interval: config.poll_interval,
            cancel: CancellationToken::new(),
        }
    }

    /// Abort the run as soon as `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Drive the watch set until it is empty or the run aborts.
    pub async fn run<F>(&mut self, mut watch_set: WatchSet, mut emit: F) -> Result<RunSummary, Aborted>
    where
        F: FnMut(&UpdateEvent),
    {
        let mut summary = RunSummary::new(watch_set.len());
        let rate_limited_before = self.limiter.rate_limited_count();
        info!(targets = summary.total, "📡 Watching for updates");
        if watch_set.is_empty() {
            summary.enter(RunState::Draining);
        }

        while let Some(head) = watch_set.head() {
            let name = head.name.clone();
            let baseline = head.baseline_timestamp;
            debug!(region = %name, baseline, "Waiting for next update");

            let result = match self.poll(&name).await {
                Ok(result) => result,
                Err(cancelled) => {
                    summary.rate_limited = self.limiter.rate_limited_count() - rate_limited_before;
                    return Err(abort(summary, watch_set, cancelled));
                }
            };
            summary.polls += 1;

            match result {
                Ok(state) if !state.exists => {
                    retire(&mut summary, &mut watch_set, &name);
                }
                Err(ProbeError::NotFound) => {
                    retire(&mut summary, &mut watch_set, &name);
                }
                // The limiter armed the backoff; the same head goes next.
                Err(ProbeError::RateLimited { .. }) => continue,
                Err(source) => {
                    error!(region = %name, "Error loading region data: {}", source);
                    summary.rate_limited = self.limiter.rate_limited_count() - rate_limited_before;
                    return Err(abort(
                        summary,
                        watch_set,
                        EngineError::Probe { target: name, source },
                    ));
                }
                Ok(state) => match state.last_update {
                    Some(observed) if observed != baseline => {
                        let mut entry = match watch_set.pop_head() {
                            Some(entry) => entry,
                            None => break,
                        };
                        entry.status = EntryStatus::Fired;

                        let event = UpdateEvent {
                            name: entry.name,
                            fired_at_wall_clock: Utc::now(),
                            baseline_timestamp: baseline,
                            observed_timestamp: observed,
                        };
                        info!(
                            region = %event.name,
                            observed,
                            progress = %format!("{}/{}", summary.fired.len() + 1, summary.total),
                            "🚨 Update detected"
                        );
                        emit(&event);
                        summary.fired.push(event);
                    }
                    Some(_) => {}
                    None => {
                        let source = ProbeError::Fatal("reply carried no last update".into());
                        error!(region = %name, "Error loading region data: {}", source);
                        summary.rate_limited = self.limiter.rate_limited_count() - rate_limited_before;
                        return Err(abort(
                            summary,
                            watch_set,
                            EngineError::Probe { target: name, source },
                        ));
                    }
                },
            }

            if watch_set.is_empty() {
                summary.enter(RunState::Draining);
            }
        }

        summary.enter(RunState::Complete);
        summary.rate_limited = self.limiter.rate_limited_count() - rate_limited_before;
        info!(
            fired = summary.fired.len(),
            retired = summary.retired.len(),
            polls = summary.polls,
            "All targets have updated"
        );
        Ok(summary)
    }

    /// Wait the poll interval, then probe. `Err` only on cancellation.
    async fn poll(&mut self, name: &str) -> Result<Polled, EngineError> {
        let cancel = self.cancel.clone();
        let probe = self.probe;
        let limiter = &mut *self.limiter;
        let interval = self.poll_interval;

        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = async {
                tokio::time::sleep(interval).await;
                limiter.probe(probe, name, ProbeQuery::LastUpdate).await
            } => Ok(result),
        }
    }
}

fn retire(summary: &mut RunSummary, watch_set: &mut WatchSet, name: &str) {
    warn!(region = %name, "Target cannot be found, skipping");
    if let Some(mut entry) = watch_set.pop_head() {
        entry.status = EntryStatus::Removed(RemovalReason::NotFound);
        summary.retired.push(entry);
    }
}

fn abort(mut summary: RunSummary, watch_set: WatchSet, source: EngineError) -> Aborted {
    summary.enter(RunState::Aborted);
    summary.remaining = watch_set
        .into_entries()
        .into_iter()
        .map(|mut entry| {
            entry.status = EntryStatus::Removed(RemovalReason::FetchFailed);
            entry
        })
        .collect();
    warn!(
        fired = summary.fired.len(),
        remaining = summary.remaining.len(),
        "Run ended early"
    );
    Aborted { summary, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::testing::ScriptedProbe;
    use tokio::time::Instant;

    fn watch_set(entries: &[(&str, i64)]) -> WatchSet {
        WatchSet::from_entries(
            entries
                .iter()
                .map(|(name, ts)| WatchEntry::pending(*name, *ts))
                .collect(),
        )
    }

    fn at(ts: i64) -> Result<ObservedState, ProbeError> {
        Ok(ObservedState::updated_at(ts))
    }

    async fn run(
        probe: &ScriptedProbe,
        set: WatchSet,
    ) -> (Result<RunSummary, Aborted>, Vec<UpdateEvent>) {
        let cfg = EngineConfig::default();
        let mut limiter = RateLimiter::from_config(&cfg);
        let mut events = Vec::new();
        let result = PollScheduler::new(probe, &mut limiter, &cfg)
            .run(set, |e| events.push(e.clone()))
            .await;
        (result, events)
    }

    fn names(events: &[UpdateEvent]) -> Vec<&str> {
        events.iter().map(|e| e.name.as_str()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_head_fires_on_fourth_probe() {
        let probe = ScriptedProbe::new()
            .script("alpha", vec![at(1000), at(1000), at(1000), at(1234)])
            .script("gamma", vec![at(1600)])
            .script("beta", vec![at(2100)]);

        let set = watch_set(&[("alpha", 1000), ("beta", 2000), ("gamma", 1500)]);
        let (result, events) = run(&probe, set).await;
        let summary = result.unwrap();

        assert_eq!(names(&events), vec!["alpha", "gamma", "beta"]);
        assert_eq!(events[0].observed_timestamp, 1234);
        assert_eq!(events[0].baseline_timestamp, 1000);
        assert_eq!(
            probe.calls(),
            vec!["alpha", "alpha", "alpha", "alpha", "gamma", "beta"]
        );
        assert_eq!(summary.state, RunState::Complete);
        assert_eq!(
            summary.transitions,
            vec![RunState::Running, RunState::Draining, RunState::Complete]
        );
        assert_eq!(summary.polls, 6);
        assert_eq!(summary.fired.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_poll_interval_before_each_probe() {
        let probe = ScriptedProbe::new().script("alpha", vec![at(1000), at(1001)]);
        let start = Instant::now();
        let (result, _) = run(&probe, watch_set(&[("alpha", 1000)])).await;
        result.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_head_is_kept() {
        let probe = ScriptedProbe::new()
            .script(
                "alpha",
                vec![
                    Err(ProbeError::RateLimited {
                        retry_after: Some(Duration::from_secs(10)),
                    }),
                    at(1234),
                ],
            )
            .script("gamma", vec![at(1600)]);

        let start = Instant::now();
        let (result, events) = run(&probe, watch_set(&[("alpha", 1000), ("gamma", 1500)])).await;
        let summary = result.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(probe.calls(), vec!["alpha", "alpha", "gamma"]);
        assert_eq!(names(&events), vec!["alpha", "gamma"]);
        assert_eq!(summary.rate_limited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_target_is_retired_without_event() {
        let probe = ScriptedProbe::new()
            .script("alpha", vec![Err(ProbeError::NotFound)])
            .script("gamma", vec![at(1500), at(1600)]);

        let (result, events) = run(&probe, watch_set(&[("alpha", 1000), ("gamma", 1500)])).await;
        let summary = result.unwrap();

        assert_eq!(names(&events), vec!["gamma"]);
        assert_eq!(summary.retired.len(), 1);
        assert_eq!(summary.retired[0].name, "alpha");
        assert_eq!(
            summary.retired[0].status,
            EntryStatus::Removed(RemovalReason::NotFound)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_retiring_last_entry_drains_run() {
        let probe = ScriptedProbe::new()
            .script("alpha", vec![at(1001)])
            .script("gamma", vec![Err(ProbeError::NotFound)]);

        let (result, events) = run(&probe, watch_set(&[("alpha", 1000), ("gamma", 1500)])).await;
        let summary = result.unwrap();

        assert_eq!(names(&events), vec!["alpha"]);
        assert_eq!(
            summary.transitions,
            vec![RunState::Running, RunState::Draining, RunState::Complete]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_aborts_run() {
        let probe = ScriptedProbe::new()
            .script("alpha", vec![at(1001)])
            .script("gamma", vec![Err(ProbeError::Transient("503".into()))]);

        let set = watch_set(&[("alpha", 1000), ("gamma", 1500), ("beta", 2000)]);
        let (result, events) = run(&probe, set).await;
        let aborted = result.unwrap_err();

        assert_eq!(names(&events), vec!["alpha"]);
        assert_eq!(aborted.summary.state, RunState::Aborted);
        assert_eq!(
            aborted.summary.transitions,
            vec![RunState::Running, RunState::Aborted]
        );
        assert_eq!(aborted.summary.fired.len(), 1);
        let remaining: Vec<_> = aborted.summary.remaining.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(remaining, vec!["gamma", "beta"]);
        assert!(aborted
            .summary
            .remaining
            .iter()
            .all(|e| e.status == EntryStatus::Removed(RemovalReason::FetchFailed)));
        assert!(matches!(
            aborted.source,
            EngineError::Probe { ref target, source: ProbeError::Transient(_) } if target == "gamma"
        ));
        assert!(!probe.calls().contains(&"beta".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_last_update_aborts_run() {
        let probe = ScriptedProbe::new().script(
            "alpha",
            vec![Ok(ObservedState {
                exists: true,
                ..Default::default()
            })],
        );
        let (result, events) = run(&probe, watch_set(&[("alpha", 1000)])).await;
        assert!(events.is_empty());
        assert!(matches!(
            result.unwrap_err().source,
            EngineError::Probe { source: ProbeError::Fatal(_), .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_watch_set_completes_immediately() {
        let probe = ScriptedProbe::new();
        let (result, events) = run(&probe, WatchSet::default()).await;
        let summary = result.unwrap();
        assert_eq!(summary.state, RunState::Complete);
        assert_eq!(
            summary.transitions,
            vec![RunState::Running, RunState::Draining, RunState::Complete]
        );
        assert_eq!(summary.polls, 0);
        assert!(events.is_empty());
        assert!(probe.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_unwinds_with_pending_entries() {
        // Never changes, so only cancellation can end the run.
        let probe = ScriptedProbe::new().script("alpha", vec![at(1000)]);
        let cfg = EngineConfig::default();
        let mut limiter = RateLimiter::from_config(&cfg);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let result = PollScheduler::new(&probe, &mut limiter, &cfg)
            .with_cancellation(cancel)
            .run(watch_set(&[("alpha", 1000)]), |_| {})
            .await;

        let aborted = result.unwrap_err();
        assert!(matches!(aborted.source, EngineError::Cancelled));
        assert_eq!(aborted.summary.remaining.len(), 1);
        assert!(!probe.calls().is_empty());
        assert_eq!(limiter.state().backoff_until, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_event_per_target() {
        let probe = ScriptedProbe::new()
            .script("a", vec![at(2), at(3), at(4)])
            .script("b", vec![at(5)]);

        let (result, events) = run(&probe, watch_set(&[("a", 1), ("b", 2)])).await;
        result.unwrap();
        assert_eq!(names(&events), vec!["a", "b"]);
        assert_eq!(probe.calls(), vec!["a", "b"]);
    }
}
