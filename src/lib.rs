//! Trigger Watch — alert the instant a watched region updates.
//!
//! Regions update in roughly ascending order of their previous update
//! time, so instead of polling every target uniformly the engine sorts the
//! targets once and hammers only the one expected to update next.

pub mod alert;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod probe;
pub mod targets;
pub mod version;

pub use config::{EngineConfig, Settings};
pub use engine::{PollScheduler, UpdateEvent, WatchSet, WatchSetBuilder};
pub use error::{ClockError, EngineError, ProbeError};
pub use probe::{ObservedState, ProbeQuery, ProbeReply, TargetProbe};
