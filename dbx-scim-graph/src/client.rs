//! Directory read API and its Microsoft Graph implementation.

use std::fmt;
use std::thread;
use std::time::Duration;

use dbx_scim_core::TokenProvider;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::GraphError;

pub const DEFAULT_GRAPH_URL: &str = "https://graph.microsoft.com";
pub const DEFAULT_THROTTLE_ATTEMPTS: u32 = 6;

const MEMBER_SELECT: &str = "id,displayName,mail,mailNickname,appId,accountEnabled";
const GROUP_SELECT: &str = "id,displayName,securityEnabled,mailEnabled";
/// Delta queries only report changes to selected properties, and the delta
/// link carries the selection forward.
const FEED_SELECT: &str = "displayName,members";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Group lookup result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupInfo {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub security_enabled: bool,
    #[serde(default)]
    pub mail_enabled: bool,
}

impl GroupInfo {
    pub fn is_security_group(&self) -> bool {
        self.security_enabled && !self.mail_enabled
    }
}

/// Starting point for one change-feed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedRequest {
    /// Bootstrap: returns a delta link positioned at "now".
    Initial,
    /// A previously returned next link or delta link.
    Link(String),
}

/// A changed group as reported by the feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupChange {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedPage {
    pub changes: Vec<GroupChange>,
    pub next_link: Option<String>,
    pub delta_link: Option<String>,
}

/// OData collection envelope.
#[derive(Debug, Deserialize)]
pub struct ODataResponse<T> {
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    #[serde(rename = "@odata.nextLink", default)]
    pub next_link: Option<String>,
    #[serde(rename = "@odata.deltaLink", default)]
    pub delta_link: Option<String>,
}

/// Read-only directory operations used by the crawler and feed consumer.
pub trait DirectoryApi: Send + Sync {
    /// The unique security group named exactly `name`, if any.
    fn resolve_group_by_exact_name(&self, name: &str) -> Result<Option<GroupInfo>, GraphError>;

    /// Raw member payloads of `group_id`, all pages.
    fn list_group_members(&self, group_id: &str) -> Result<Vec<Value>, GraphError>;

    fn poll_change_feed(&self, request: &FeedRequest) -> Result<FeedPage, GraphError>;
}

// ---------------------------------------------------------------------------
// Graph client
// ---------------------------------------------------------------------------

pub struct GraphClient {
    agent: ureq::Agent,
    base_url: String,
    token: TokenProvider,
    throttle_attempts: u32,
    fallback_backoff: Duration,
}

impl fmt::Debug for GraphClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token)
            .field("throttle_attempts", &self.throttle_attempts)
            .finish()
    }
}

impl GraphClient {
    pub fn new(token: TokenProvider) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(120))
                .build(),
            base_url: DEFAULT_GRAPH_URL.to_string(),
            token,
            throttle_attempts: DEFAULT_THROTTLE_ATTEMPTS,
            fallback_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_throttle_attempts(mut self, attempts: u32) -> Self {
        self.throttle_attempts = attempts.max(1);
        self
    }

    /// Backoff used when a 429 carries no usable `Retry-After`.
    pub fn with_fallback_backoff(mut self, backoff: Duration) -> Self {
        self.fallback_backoff = backoff;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET `url` and decode the JSON body, retrying while throttled.
    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, GraphError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let bearer = self.token.bearer()?;
            let mut request = self
                .agent
                .get(url)
                .set("Authorization", &format!("Bearer {bearer}"))
                .set("Accept", "application/json");
            for (key, value) in query {
                request = request.query(key, value);
            }
            debug!("GET {url}");
            match request.call() {
                Ok(response) => {
                    return response.into_json::<T>().map_err(|e| GraphError::Decode {
                        url: url.to_string(),
                        message: e.to_string(),
                    })
                }
                Err(ureq::Error::Status(429, response)) => {
                    if attempt >= self.throttle_attempts {
                        return Err(GraphError::Throttled {
                            url: url.to_string(),
                            attempts: attempt,
                        });
                    }
                    let wait = self.throttle_wait(response.header("Retry-After"), attempt);
                    warn!(
                        "directory throttled (attempt {attempt}/{}), retrying in {:?}",
                        self.throttle_attempts, wait
                    );
                    thread::sleep(wait);
                }
                Err(ureq::Error::Status(status, response)) => {
                    return Err(GraphError::Http {
                        url: url.to_string(),
                        status,
                        body: response.into_string().unwrap_or_default(),
                    })
                }
                Err(ureq::Error::Transport(t)) => {
                    return Err(GraphError::Transport {
                        url: url.to_string(),
                        message: t.to_string(),
                    })
                }
            }
        }
    }

    /// `Retry-After` when the server sends one, else a linear fallback.
    fn throttle_wait(&self, retry_after_header: Option<&str>, attempt: u32) -> Duration {
        retry_after(retry_after_header).unwrap_or_else(|| {
            self.fallback_backoff
                .checked_mul(attempt)
                .unwrap_or(self.fallback_backoff)
        })
    }

    /// Follow `@odata.nextLink` until exhausted, collecting every item.
    fn get_paginated<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, GraphError> {
        let mut items = Vec::new();
        let mut page: ODataResponse<T> = self.get_json(url, query)?;
        loop {
            items.append(&mut page.value);
            match page.next_link.take() {
                Some(next) => page = self.get_json(&next, &[])?,
                None => return Ok(items),
            }
        }
    }
}

fn retry_after(header: Option<&str>) -> Option<Duration> {
    header
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// OData string literal: single-quoted with embedded quotes doubled.
pub fn odata_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

impl DirectoryApi for GraphClient {
    fn resolve_group_by_exact_name(&self, name: &str) -> Result<Option<GroupInfo>, GraphError> {
        let filter = format!("displayName eq {}", odata_quote(name));
        let url = self.url("/v1.0/groups");
        let page: ODataResponse<GroupInfo> =
            self.get_json(&url, &[("$filter", filter.as_str()), ("$select", GROUP_SELECT)])?;
        let mut matches: Vec<GroupInfo> = page
            .value
            .into_iter()
            .filter(|g| g.display_name == name)
            .collect();
        match matches.len() {
            1 => Ok(matches.pop()),
            0 => Ok(None),
            n => {
                warn!("{n} directory groups are named '{name}', skipping ambiguous name");
                Ok(None)
            }
        }
    }

    fn list_group_members(&self, group_id: &str) -> Result<Vec<Value>, GraphError> {
        let url = self.url(&format!("/v1.0/groups/{group_id}/members"));
        self.get_paginated(&url, &[("$select", MEMBER_SELECT), ("$top", "999")])
    }

    fn poll_change_feed(&self, request: &FeedRequest) -> Result<FeedPage, GraphError> {
        let page: ODataResponse<GroupChange> = match request {
            FeedRequest::Initial => self.get_json(
                &self.url("/v1.0/groups/delta"),
                &[("$select", FEED_SELECT), ("$deltaToken", "latest")],
            )?,
            FeedRequest::Link(link) => self.get_json(link, &[])?,
        };
        Ok(FeedPage {
            changes: page.value,
            next_link: page.next_link,
            delta_link: page.delta_link,
        })
    }
}
