//! Connection settings from the environment.
//!
//! | Variable | Meaning |
//! |---|---|
//! | `DATABRICKS_HOST` | accounts console host, defaults to the Azure one |
//! | `DATABRICKS_ACCOUNT_ID` | required |
//! | `DATABRICKS_TOKEN` | static bearer token for the account API |
//! | `DATABRICKS_ARM_CLIENT_ID` / `ARM_CLIENT_ID` | service principal used when no token is set |
//! | `DATABRICKS_ARM_CLIENT_SECRET` / `ARM_CLIENT_SECRET` | its secret |
//! | `ARM_TENANT_ID` | tenant for client-credential flows |
//! | `GRAPH_ACCESS_TOKEN` | static bearer token for Microsoft Graph |
//!
//! Graph falls back to `ARM_CLIENT_ID` + `ARM_CLIENT_SECRET` + `ARM_TENANT_ID`.

use std::fmt;

use anyhow::{bail, Result};
use dbx_scim_core::auth::{DATABRICKS_SCOPE, GRAPH_SCOPE};
use dbx_scim_core::{ClientCredentials, TokenProvider};
use dbx_scim_sync::scim::DEFAULT_ACCOUNTS_HOST;

/// How to obtain a bearer token for one API.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Token(String),
    ClientCredentials(ClientCredentials),
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Token(_) => f.write_str("Token([REDACTED])"),
            Credential::ClientCredentials(creds) => {
                f.debug_tuple("ClientCredentials").field(creds).finish()
            }
        }
    }
}

impl Credential {
    pub fn into_provider(self, scope: &str) -> TokenProvider {
        match self {
            Credential::Token(token) => TokenProvider::Static(token),
            Credential::ClientCredentials(creds) => TokenProvider::client_credentials(creds, scope),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabricksSettings {
    pub host: String,
    pub account_id: String,
    pub credential: Credential,
}

impl DatabricksSettings {
    pub fn token_provider(&self) -> TokenProvider {
        self.credential.clone().into_provider(DATABRICKS_SCOPE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSettings {
    pub credential: Credential,
}

impl GraphSettings {
    pub fn token_provider(&self) -> TokenProvider {
        self.credential.clone().into_provider(GRAPH_SCOPE)
    }
}

fn first<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.trim().is_empty())
}

fn client_credentials<F>(lookup: &F, client_ids: &[&str], secrets: &[&str]) -> Option<ClientCredentials>
where
    F: Fn(&str) -> Option<String>,
{
    Some(ClientCredentials {
        tenant_id: first(lookup, &["ARM_TENANT_ID"])?,
        client_id: first(lookup, client_ids)?,
        client_secret: first(lookup, secrets)?,
    })
}

impl DatabricksSettings {
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = first(&lookup, &["DATABRICKS_HOST"])
            .unwrap_or_else(|| DEFAULT_ACCOUNTS_HOST.to_string());
        let Some(account_id) = first(&lookup, &["DATABRICKS_ACCOUNT_ID"]) else {
            bail!("DATABRICKS_ACCOUNT_ID is not set");
        };
        let credential = if let Some(token) = first(&lookup, &["DATABRICKS_TOKEN"]) {
            Credential::Token(token)
        } else if let Some(creds) = client_credentials(
            &lookup,
            &["DATABRICKS_ARM_CLIENT_ID", "ARM_CLIENT_ID"],
            &["DATABRICKS_ARM_CLIENT_SECRET", "ARM_CLIENT_SECRET"],
        ) {
            Credential::ClientCredentials(creds)
        } else {
            bail!(
                "no Databricks credentials: set DATABRICKS_TOKEN, or ARM_TENANT_ID with \
                 DATABRICKS_ARM_CLIENT_ID/ARM_CLIENT_ID and DATABRICKS_ARM_CLIENT_SECRET/ARM_CLIENT_SECRET"
            );
        };
        Ok(Self {
            host: host.trim_end_matches('/').to_string(),
            account_id,
            credential,
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

impl GraphSettings {
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let credential = if let Some(token) = first(&lookup, &["GRAPH_ACCESS_TOKEN"]) {
            Credential::Token(token)
        } else if let Some(creds) =
            client_credentials(&lookup, &["ARM_CLIENT_ID"], &["ARM_CLIENT_SECRET"])
        {
            Credential::ClientCredentials(creds)
        } else {
            bail!(
                "no Microsoft Graph credentials: set GRAPH_ACCESS_TOKEN, or ARM_TENANT_ID, \
                 ARM_CLIENT_ID and ARM_CLIENT_SECRET"
            );
        };
        Ok(Self { credential })
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}
