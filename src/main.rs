//! trigger-watch — alerts the operator the moment a watched region updates.
//!
//! Startup: identify the operator, load triggers, sync the clock, build the
//! watch set. Then poll the earliest-predicted trigger until the set drains.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use trigger_watch::alert::{print_banner, Alerter};
use trigger_watch::clock::{authoritative_now, SntpClock};
use trigger_watch::config::{EngineConfig, Settings};
use trigger_watch::engine::{PollScheduler, RateLimiter, WatchSetBuilder};
use trigger_watch::error::{EngineError, ProbeError};
use trigger_watch::probe::nationstates::NationStatesProbe;
use trigger_watch::{targets, version};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trigger_watch=info".into()),
        )
        .with_target(false)
        .init();

    let settings = Settings::parse();
    let config = EngineConfig::resolve(&settings).context("Failed to load configuration")?;

    print_banner(&mut std::io::stdout()).context("Failed to write banner")?;

    let user_agent = format!(
        "trigger-watch/{} ({})",
        env!("CARGO_PKG_VERSION"),
        config.contact
    );

    // ── Version Check ───────────────────────────────────────────────
    if !settings.no_version_check {
        version::check_latest_release(&reqwest::Client::new(), &user_agent).await;
    }

    // ── Operator Identity ───────────────────────────────────────────
    let mut probe = NationStatesProbe::new(user_agent, config.request_timeout)
        .context("Failed to build HTTP client")?;
    let mut limiter = RateLimiter::from_config(&config);

    let identity = match probe.identify(&settings.nation, &mut limiter).await {
        Ok(identity) => identity,
        Err(ProbeError::NotFound) => {
            error!(nation = %settings.nation, "The provided nation does not exist");
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => {
            error!("Identification failed, shutting down: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    info!("You have identified as {}", identity.full_name);

    // ── Triggers ────────────────────────────────────────────────────
    let names = match targets::resolve(&settings) {
        Ok(names) => names,
        Err(e) => {
            error!("{}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    // ── Clock ───────────────────────────────────────────────────────
    let clock = SntpClock::new(config.ntp_server.clone(), config.clock_timeout);
    let now = match authoritative_now(&clock).await {
        Ok(now) => now,
        Err(e) => {
            error!("Cannot start without an authoritative clock: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    // ── Operator Interrupt ──────────────────────────────────────────
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received — stopping");
            interrupt.cancel();
        }
    });

    // ── Watch Set ───────────────────────────────────────────────────
    let watch_set = {
        let mut builder = WatchSetBuilder::new(&probe, &mut limiter, &config);
        tokio::select! {
            _ = cancel.cancelled() => {
                error!("{}", EngineError::Cancelled);
                return Ok(ExitCode::from(130));
            }
            set = builder.build(names.as_slice(), now) => set,
        }
    };

    if watch_set.is_empty() {
        info!("Nothing to watch — every trigger was filtered out");
        return Ok(ExitCode::SUCCESS);
    }

    // ── Poll Loop ───────────────────────────────────────────────────
    let alerter = Alerter::new(settings.beep);
    let mut stdout = std::io::stdout();
    let outcome = PollScheduler::new(&probe, &mut limiter, &config)
        .with_cancellation(cancel)
        .run(watch_set, |event| {
            if let Err(e) = alerter.alert(event, &mut stdout) {
                warn!("Failed to write alert: {}", e);
            }
        })
        .await;

    match outcome {
        Ok(summary) => {
            info!(
                fired = summary.fired.len(),
                retired = summary.retired.len(),
                rate_limited = summary.rate_limited,
                "All targets have updated, shutting down"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(aborted) => {
            error!(
                fired = aborted.summary.fired.len(),
                unwatched = aborted.summary.remaining.len(),
                "{}",
                aborted
            );
            match aborted.source {
                EngineError::Cancelled => Ok(ExitCode::from(130)),
                _ => Ok(ExitCode::FAILURE),
            }
        }
    }
}
