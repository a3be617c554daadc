//! Error types for dbx-scim-sync.

use std::path::PathBuf;

use dbx_scim_core::{CoreError, PrincipalKind};
use dbx_scim_graph::GraphError;
use thiserror::Error;

/// Failures talking to the account SCIM endpoint.
#[derive(Debug, Error)]
pub enum ScimError {
    /// 429 or 5xx: the call may succeed if repeated.
    #[error("{method} {url} throttled or unavailable (HTTP {status}): {body}")]
    Throttled {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("{method} {url} failed with HTTP {status}: {body}")]
    Api {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("transport error on {method} {url}: {message}")]
    Transport {
        method: String,
        url: String,
        message: String,
    },

    #[error("invalid SCIM response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error(transparent)]
    Auth(#[from] CoreError),
}

impl ScimError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScimError::Throttled { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ScimError::Throttled { status, .. } | ScimError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

/// All errors that can arise from a sync run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("SCIM error: {0}")]
    Scim(#[from] ScimError),

    #[error("{operation} still failing after {attempts} attempt(s): {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: ScimError,
    },

    #[error("state store error: {0}")]
    Store(#[from] CoreError),

    #[error("directory error: {0}")]
    Graph(#[from] GraphError),

    /// More than one target record carries the same unique name.
    #[error("{count} {kind} records named '{name}' exist on the target")]
    DuplicateMatch {
        kind: PrincipalKind,
        name: String,
        count: usize,
    },

    /// Directory and target ids do not map one-to-one.
    #[error(
        "cross-reference mismatch: {forward} directory ids vs {backward} target ids"
    )]
    XrefMismatch { forward: usize, backward: usize },

    /// The target accepted a create but returned no id.
    #[error("created {kind} '{name}' came back without an id")]
    MissingTargetId { kind: PrincipalKind, name: String },

    /// A full sync was requested with an empty seed list.
    #[error("no groups provided")]
    NoGroupsProvided,

    #[error("failed to start worker pool: {0}")]
    WorkerPool(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Fatal errors abort the whole run; the rest only fail one object.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::DuplicateMatch { .. }
                | SyncError::XrefMismatch { .. }
                | SyncError::Graph(_)
                | SyncError::WorkerPool(_)
        )
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
