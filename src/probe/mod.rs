//! Target probe — provider-agnostic interface to the remote service.
//!
//! The engine only needs to know, for one target name, whether it exists
//! and when it last updated. Transport and response parsing live behind
//! this trait; failures come back as typed `ProbeError` values.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProbeError;

pub mod nationstates;

/// Which shards to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeQuery {
    /// Name and last update, used when admitting a target.
    Admission,
    /// Last update only, used while polling.
    LastUpdate,
}

/// What a single probe observed about a target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    pub exists: bool,
    pub last_update: Option<i64>,
    pub display_name: Option<String>,
}

impl ObservedState {
    pub fn updated_at(last_update: i64) -> Self {
        Self {
            exists: true,
            last_update: Some(last_update),
            ..Default::default()
        }
    }
}

/// Outcome of one request, plus the request count the service reported
/// alongside it. The count travels with errors too: a 429 carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReply<T = ObservedState> {
    pub requests_seen: Option<u32>,
    pub result: Result<T, ProbeError>,
}

impl<T> ProbeReply<T> {
    pub fn new(result: Result<T, ProbeError>) -> Self {
        Self {
            requests_seen: None,
            result,
        }
    }

    pub fn with_requests_seen(mut self, requests_seen: Option<u32>) -> Self {
        self.requests_seen = requests_seen;
        self
    }

    /// Transform a successful outcome, keeping the reported count.
    pub fn and_then<U>(self, f: impl FnOnce(T) -> Result<U, ProbeError>) -> ProbeReply<U> {
        ProbeReply {
            requests_seen: self.requests_seen,
            result: self.result.and_then(f),
        }
    }
}

impl<T> From<Result<T, ProbeError>> for ProbeReply<T> {
    fn from(result: Result<T, ProbeError>) -> Self {
        Self::new(result)
    }
}

#[async_trait]
pub trait TargetProbe: Send + Sync {
    async fn probe(&self, name: &str, query: ProbeQuery) -> ProbeReply;
}
