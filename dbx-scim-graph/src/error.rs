//! Error types for dbx-scim-graph.

use std::path::PathBuf;

use dbx_scim_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("directory request {url} failed with HTTP {status}: {body}")]
    Http { url: String, status: u16, body: String },

    #[error("directory request {url} still throttled after {attempts} attempts")]
    Throttled { url: String, attempts: u32 },

    #[error("transport error calling {url}: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },

    /// A change-feed page carried neither a next link nor a delta link.
    #[error("change-feed page from {url} has neither @odata.nextLink nor @odata.deltaLink")]
    FeedProtocol { url: String },

    /// The crawl produced records that could not be mapped to principals.
    #[error("directory crawl produced {count} invalid principal record(s); first: {first}")]
    InvalidPrincipals { count: usize, first: String },

    #[error(transparent)]
    Auth(#[from] CoreError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> GraphError {
    GraphError::Io {
        path: path.into(),
        source,
    }
}
