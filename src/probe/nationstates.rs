//! NationStates adapter — region probes over the public XML API.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, USER_AGENT};
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ObservedState, ProbeQuery, ProbeReply, TargetProbe};
use crate::engine::RateLimiter;
use crate::error::ProbeError;

pub const API_BASE: &str = "https://www.nationstates.net/cgi-bin/api.cgi";
const REQUESTS_SEEN_HEADER: &str = "x-ratelimit-requests-seen";
const RETRY_AFTER_HEADERS: [&str; 2] = ["retry-after", "x-retry-after"];

#[derive(Debug, Deserialize)]
struct RegionXml {
    #[serde(rename = "NAME")]
    name: Option<String>,
    #[serde(rename = "LASTUPDATE")]
    last_update: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NationXml {
    #[serde(rename = "FULLNAME")]
    full_name: Option<String>,
}

/// The operator's verified identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub nation: String,
    pub full_name: String,
}

pub struct NationStatesProbe {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
}

impl NationStatesProbe {
    /// `user_agent` must identify the tool and a contact. Every request is
    /// bounded by `timeout`; a stalled reply surfaces as `Transient`.
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::from_client(client, user_agent))
    }

    pub fn from_client(client: reqwest::Client, user_agent: impl Into<String>) -> Self {
        Self {
            client,
            base_url: API_BASE.to_string(),
            user_agent: user_agent.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Verify the operator's nation and tag every later request with it.
    ///
    /// Runs under `limiter` like a region lookup: a rate-limit reply waits out
    /// the backoff and asks again.
    pub async fn identify(
        &mut self,
        nation: &str,
        limiter: &mut RateLimiter,
    ) -> Result<Identity, ProbeError> {
        let parsed = loop {
            limiter.wait_ready().await;
            let reply = self
                .fetch(&[("nation", nation), ("q", "fullname")])
                .await
                .and_then(|body| {
                    quick_xml::de::from_str::<NationXml>(&body)
                        .map_err(|e| ProbeError::Fatal(format!("unreadable nation reply: {}", e)))
                });
            limiter.record(&reply);
            match reply.result {
                Err(ProbeError::RateLimited { .. }) => {
                    warn!(nation = %nation, "Identification rate limited — retrying");
                    continue;
                }
                other => break other?,
            }
        };

        self.user_agent = format!("{} - In Use by {}", self.user_agent, nation);
        info!(nation = %nation, "🪪 Operator identity verified");

        Ok(Identity {
            nation: nation.to_string(),
            full_name: parsed.full_name.unwrap_or_else(|| nation.to_string()),
        })
    }

    /// One GET against the API. The request-count header is read before
    /// the status is classified, so it survives error replies.
    async fn fetch(&self, query: &[(&str, &str)]) -> ProbeReply<String> {
        let resp = match self
            .client
            .get(&self.base_url)
            .header(USER_AGENT, &self.user_agent)
            .query(query)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ProbeReply::new(Err(transport_error(e))),
        };

        let seen = requests_seen(resp.headers());
        let result = match classify_status(resp.status(), resp.headers()) {
            Some(err) => Err(err),
            None => resp.text().await.map_err(transport_error),
        };
        ProbeReply::new(result).with_requests_seen(seen)
    }
}

#[async_trait]
impl TargetProbe for NationStatesProbe {
    async fn probe(&self, name: &str, query: ProbeQuery) -> ProbeReply {
        let shards = match query {
            ProbeQuery::Admission => "lastupdate name",
            ProbeQuery::LastUpdate => "lastupdate",
        };
        debug!(region = %name, shards, "Probing region");

        self.fetch(&[("region", name), ("q", shards)])
            .await
            .and_then(|body| parse_region(&body))
    }
}

/// Map a non-success status to a probe error. `None` means success.
fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<ProbeError> {
    if status.is_success() {
        return None;
    }
    Some(match status {
        StatusCode::NOT_FOUND => ProbeError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => ProbeError::RateLimited {
            retry_after: retry_after(headers),
        },
        StatusCode::REQUEST_TIMEOUT => ProbeError::Transient(status.to_string()),
        s if s.is_server_error() => ProbeError::Transient(s.to_string()),
        s => ProbeError::Fatal(format!("service replied with {}", s)),
    })
}

fn transport_error(e: reqwest::Error) -> ProbeError {
    if e.is_builder() {
        ProbeError::Fatal(e.to_string())
    } else {
        ProbeError::Transient(e.to_string())
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

fn requests_seen(headers: &HeaderMap) -> Option<u32> {
    header_u64(headers, REQUESTS_SEEN_HEADER).and_then(|n| u32::try_from(n).ok())
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    RETRY_AFTER_HEADERS
        .iter()
        .find_map(|h| header_u64(headers, h))
        .map(Duration::from_secs)
}

fn parse_region(body: &str) -> Result<ObservedState, ProbeError> {
    let region: RegionXml = quick_xml::de::from_str(body)
        .map_err(|e| ProbeError::Fatal(format!("unreadable region reply: {}", e)))?;

    let last_update = match region.last_update.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<i64>()
                .map_err(|_| ProbeError::Fatal(format!("invalid LASTUPDATE value {:?}", raw)))?,
        ),
    };

    Ok(ObservedState {
        exists: true,
        last_update,
        display_name: region.name,
    })
}
