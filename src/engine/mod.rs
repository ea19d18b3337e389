//! Trigger monitoring engine.
//!
//! raw names → `WatchSetBuilder` → `WatchSet` → `PollScheduler` → `UpdateEvent`s,
//! with every probe passing through the shared `RateLimiter`.

pub mod rate_limit;
pub mod scheduler;
pub mod watch_set;

pub use rate_limit::{RateLimitState, RateLimiter};
pub use scheduler::{Aborted, PollScheduler, RunState, RunSummary, UpdateEvent};
pub use watch_set::{
    normalize_name, BuildReport, DroppedTarget, EntryStatus, RemovalReason, WatchEntry, WatchSet,
    WatchSetBuilder,
};
