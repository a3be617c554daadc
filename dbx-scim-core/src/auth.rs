//! Bearer tokens for the directory and SCIM APIs.
//!
//! Either a pre-issued token is supplied, or one is obtained from Azure AD
//! with the client-credentials grant and refreshed shortly before expiry.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::debug;

use crate::error::CoreError;

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";
/// Well-known application id of the Azure Databricks resource.
pub const DATABRICKS_SCOPE: &str = "2ff814a6-3304-4ab8-85cb-cd0e6f879c1d/.default";

const REFRESH_MARGIN: Duration = Duration::from_secs(300);

#[derive(Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: String,
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub enum TokenProvider {
    Static(String),
    ClientCredentials {
        agent: ureq::Agent,
        authority: String,
        credentials: ClientCredentials,
        scope: String,
        cached: Mutex<Option<CachedToken>>,
    },
}

impl fmt::Debug for TokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenProvider::Static(_) => f.write_str("TokenProvider::Static([REDACTED])"),
            TokenProvider::ClientCredentials {
                authority,
                credentials,
                scope,
                ..
            } => f
                .debug_struct("TokenProvider::ClientCredentials")
                .field("authority", authority)
                .field("credentials", credentials)
                .field("scope", scope)
                .finish_non_exhaustive(),
        }
    }
}

impl TokenProvider {
    pub fn client_credentials(credentials: ClientCredentials, scope: impl Into<String>) -> Self {
        Self::client_credentials_at(DEFAULT_AUTHORITY, credentials, scope)
    }

    /// Same as [`TokenProvider::client_credentials`] against a custom authority host.
    pub fn client_credentials_at(
        authority: impl Into<String>,
        credentials: ClientCredentials,
        scope: impl Into<String>,
    ) -> Self {
        TokenProvider::ClientCredentials {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
            authority: authority.into().trim_end_matches('/').to_string(),
            credentials,
            scope: scope.into(),
            cached: Mutex::new(None),
        }
    }

    /// A valid bearer token, fetching a fresh one if needed.
    pub fn bearer(&self) -> Result<String, CoreError> {
        match self {
            TokenProvider::Static(token) => Ok(token.clone()),
            TokenProvider::ClientCredentials {
                agent,
                authority,
                credentials,
                scope,
                cached,
            } => {
                let mut cached = cached.lock().unwrap_or_else(|p| p.into_inner());
                if let Some(token) = cached.as_ref() {
                    if token.expires_at > Instant::now() + REFRESH_MARGIN {
                        return Ok(token.value.clone());
                    }
                }
                let fresh = fetch_token(agent, authority, credentials, scope)?;
                let value = fresh.access_token.clone();
                *cached = Some(CachedToken {
                    value: fresh.access_token,
                    expires_at: Instant::now() + Duration::from_secs(fresh.expires_in),
                });
                Ok(value)
            }
        }
    }
}

fn fetch_token(
    agent: &ureq::Agent,
    authority: &str,
    credentials: &ClientCredentials,
    scope: &str,
) -> Result<TokenResponse, CoreError> {
    let url = format!("{authority}/{}/oauth2/v2.0/token", credentials.tenant_id);
    debug!("requesting token for {scope} from {url}");
    let auth_err = |message: String| CoreError::Auth {
        scope: scope.to_string(),
        message,
    };
    let response = agent
        .post(&url)
        .send_form(&[
            ("grant_type", "client_credentials"),
            ("client_id", credentials.client_id.as_str()),
            ("client_secret", credentials.client_secret.as_str()),
            ("scope", scope),
        ])
        .map_err(|e| match e {
            ureq::Error::Status(status, response) => {
                let body = response.into_string().unwrap_or_default();
                auth_err(format!("HTTP {status}: {body}"))
            }
            ureq::Error::Transport(t) => auth_err(t.to_string()),
        })?;
    response
        .into_json::<TokenResponse>()
        .map_err(|e| auth_err(format!("invalid token response: {e}")))
}
