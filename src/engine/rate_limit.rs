//! Rate limiter — honours the remote service's request budget.
//!
//! Wraps every probe: waits out an active backoff before sending, records
//! the reported request count afterwards, and arms a fixed cooldown when
//! the service answers "rate limit exceeded".
//!
//! Owned by the single control task, so no locking. Dropping an in-flight
//! `probe` future leaves the state consistent.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::ProbeError;
use crate::probe::{ObservedState, ProbeQuery, ProbeReply, TargetProbe};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateLimitState {
    /// Last count reported by the service for our identity.
    pub requests_seen: Option<u32>,
    /// Requests may resume after this instant.
    pub backoff_until: Option<Instant>,
}

pub struct RateLimiter {
    state: RateLimitState,
    advisory_threshold: u32,
    fixed_backoff: Duration,
    rate_limited_count: u32,
}

impl RateLimiter {
    pub fn new(advisory_threshold: u32, fixed_backoff: Duration) -> Self {
        Self {
            state: RateLimitState::default(),
            advisory_threshold,
            fixed_backoff,
            rate_limited_count: 0,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.advisory_threshold, config.fixed_backoff)
    }

    pub fn state(&self) -> &RateLimitState {
        &self.state
    }

    /// How many rate-limit signals were received so far.
    pub fn rate_limited_count(&self) -> u32 {
        self.rate_limited_count
    }

    /// Suspend until any active backoff has elapsed.
    pub async fn wait_ready(&mut self) {
        if let Some(until) = self.state.backoff_until {
            if until > Instant::now() {
                debug!(
                    remaining_ms = (until - Instant::now()).as_millis() as u64,
                    "Waiting out rate-limit backoff"
                );
                tokio::time::sleep_until(until).await;
            }
            self.state.backoff_until = None;
        }
    }

    /// Record a reported request count. Returns `true` when above the
    /// advisory threshold; the operator is warned when it is first crossed.
    pub fn observe_requests_seen(&mut self, seen: u32) -> bool {
        let was_over = self
            .state
            .requests_seen
            .is_some_and(|prev| prev > self.advisory_threshold);
        self.state.requests_seen = Some(seen);

        let over = seen > self.advisory_threshold;
        if over && !was_over {
            warn!(
                requests_seen = seen,
                threshold = self.advisory_threshold,
                "The API has received {} requests from you",
                seen
            );
        }
        over
    }

    /// Arm the cooldown after a rate-limit signal.
    pub fn arm_backoff(&mut self, retry_after: Option<Duration>) -> Duration {
        let cooldown = retry_after.unwrap_or(self.fixed_backoff);
        self.state.backoff_until = Some(Instant::now() + cooldown);
        self.rate_limited_count += 1;
        warn!(
            cooldown_secs = cooldown.as_secs_f64(),
            "⏳ Rate limit exceeded — backing off"
        );
        cooldown
    }

    /// Account for one reply, whatever its outcome: record the reported
    /// count and arm the backoff on a rate-limit signal.
    pub fn record<T>(&mut self, reply: &ProbeReply<T>) {
        if let Some(seen) = reply.requests_seen {
            self.observe_requests_seen(seen);
        }
        if let Err(ProbeError::RateLimited { retry_after }) = &reply.result {
            self.arm_backoff(*retry_after);
        }
    }

    /// Run one probe under the budget.
    pub async fn probe(
        &mut self,
        probe: &dyn TargetProbe,
        name: &str,
        query: ProbeQuery,
    ) -> Result<ObservedState, ProbeError> {
        self.wait_ready().await;

        let reply = probe.probe(name, query).await;
        self.record(&reply);
        reply.result
    }
}
