//! Account-level SCIM API and its HTTP implementation.

use std::fmt;
use std::time::Duration;

use dbx_scim_core::{PatchOp, PatchRequest, PrincipalKind, TargetPrincipal, TokenProvider};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::ScimError;

pub const DEFAULT_ACCOUNTS_HOST: &str = "https://accounts.azuredatabricks.net";
const LIST_PAGE_SIZE: usize = 100;

/// CRUD on principals of one account, addressed by kind.
pub trait ScimApi: Send + Sync {
    fn list(&self, kind: PrincipalKind, filter: &str) -> Result<Vec<TargetPrincipal>, ScimError>;
    fn get(&self, kind: PrincipalKind, id: &str) -> Result<TargetPrincipal, ScimError>;
    fn create(&self, principal: &TargetPrincipal) -> Result<TargetPrincipal, ScimError>;
    fn patch(&self, kind: PrincipalKind, id: &str, operations: &[PatchOp]) -> Result<(), ScimError>;
    fn delete(&self, kind: PrincipalKind, id: &str) -> Result<(), ScimError>;
}

/// SCIM filter matching the unique human name of `kind`.
pub fn exact_name_filter(kind: PrincipalKind, name: &str) -> String {
    let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
    format!("{} eq \"{}\"", kind.spec().key_attribute, escaped)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    total_results: Option<usize>,
    #[serde(rename = "Resources", default)]
    resources: Vec<Value>,
}

pub struct AccountScimClient {
    agent: ureq::Agent,
    base_url: String,
    token: TokenProvider,
}

impl fmt::Debug for AccountScimClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountScimClient")
            .field("base_url", &self.base_url)
            .field("token", &self.token)
            .finish()
    }
}

impl AccountScimClient {
    pub fn new(host: &str, account_id: &str, token: TokenProvider) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(120))
                .build(),
            base_url: format!(
                "{}/api/2.0/accounts/{}/scim/v2",
                host.trim_end_matches('/'),
                account_id
            ),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, kind: PrincipalKind, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/{}/{}", self.base_url, kind.spec().endpoint, id),
            None => format!("{}/{}", self.base_url, kind.spec().endpoint),
        }
    }

    fn request(&self, method: &str, url: &str) -> Result<ureq::Request, ScimError> {
        let bearer = self.token.bearer()?;
        debug!("{method} {url}");
        Ok(self
            .agent
            .request(method, url)
            .set("Authorization", &format!("Bearer {bearer}"))
            .set("Accept", "application/scim+json, application/json"))
    }

    fn decode(url: &str, response: ureq::Response) -> Result<Value, ScimError> {
        response.into_json::<Value>().map_err(|e| ScimError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

fn map_error(method: &str, url: &str, error: ureq::Error) -> ScimError {
    match error {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            if status == 429 || status >= 500 {
                ScimError::Throttled {
                    method: method.to_string(),
                    url: url.to_string(),
                    status,
                    body,
                }
            } else {
                ScimError::Api {
                    method: method.to_string(),
                    url: url.to_string(),
                    status,
                    body,
                }
            }
        }
        ureq::Error::Transport(t) => ScimError::Transport {
            method: method.to_string(),
            url: url.to_string(),
            message: t.to_string(),
        },
    }
}

fn principal_from(kind: PrincipalKind, url: &str, resource: Value) -> Result<TargetPrincipal, ScimError> {
    TargetPrincipal::from_resource(kind, resource).map_err(|e| ScimError::Decode {
        url: url.to_string(),
        message: e.to_string(),
    })
}

impl ScimApi for AccountScimClient {
    fn list(&self, kind: PrincipalKind, filter: &str) -> Result<Vec<TargetPrincipal>, ScimError> {
        let url = self.url(kind, None);
        let mut principals = Vec::new();
        let mut start_index = 1;
        loop {
            let start = start_index.to_string();
            let count = LIST_PAGE_SIZE.to_string();
            let response = self
                .request("GET", &url)?
                .query("filter", filter)
                .query("startIndex", &start)
                .query("count", &count)
                .call()
                .map_err(|e| map_error("GET", &url, e))?;
            let page: ListResponse =
                serde_json::from_value(Self::decode(&url, response)?).map_err(|e| {
                    ScimError::Decode {
                        url: url.clone(),
                        message: e.to_string(),
                    }
                })?;
            let fetched = page.resources.len();
            for resource in page.resources {
                principals.push(principal_from(kind, &url, resource)?);
            }
            let total = page.total_results.unwrap_or(principals.len());
            if fetched == 0 || principals.len() >= total {
                return Ok(principals);
            }
            start_index += fetched;
        }
    }

    fn get(&self, kind: PrincipalKind, id: &str) -> Result<TargetPrincipal, ScimError> {
        let url = self.url(kind, Some(id));
        let response = self
            .request("GET", &url)?
            .call()
            .map_err(|e| map_error("GET", &url, e))?;
        principal_from(kind, &url, Self::decode(&url, response)?)
    }

    fn create(&self, principal: &TargetPrincipal) -> Result<TargetPrincipal, ScimError> {
        let kind = principal.kind();
        let url = self.url(kind, None);
        let mut body = principal.attributes().map_err(|e| ScimError::Decode {
            url: url.clone(),
            message: e.to_string(),
        })?;
        body.insert("schemas".into(), Value::from(vec![kind.spec().schema]));
        let response = self
            .request("POST", &url)?
            .send_json(Value::Object(body))
            .map_err(|e| map_error("POST", &url, e))?;
        principal_from(kind, &url, Self::decode(&url, response)?)
    }

    fn patch(&self, kind: PrincipalKind, id: &str, operations: &[PatchOp]) -> Result<(), ScimError> {
        let url = self.url(kind, Some(id));
        let body = PatchRequest::new(operations.to_vec());
        self.request("PATCH", &url)?
            .send_json(&body)
            .map_err(|e| map_error("PATCH", &url, e))?;
        Ok(())
    }

    fn delete(&self, kind: PrincipalKind, id: &str) -> Result<(), ScimError> {
        let url = self.url(kind, Some(id));
        self.request("DELETE", &url)?
            .call()
            .map_err(|e| map_error("DELETE", &url, e))?;
        Ok(())
    }
}
