//! Error types for dbx-scim-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from state persistence and token acquisition.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Underlying I/O failure on a local state file.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A persisted document could not be decoded or encoded.
    #[error("failed to parse state document at {location}: {source}")]
    Parse {
        location: String,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error (write path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Remote storage answered with a non-success status.
    #[error("storage request to {location} failed with HTTP {status}")]
    Http { location: String, status: u16 },

    /// Remote storage or token endpoint could not be reached.
    #[error("transport error talking to {location}: {message}")]
    Transport { location: String, message: String },

    /// Client-credentials token exchange failed.
    #[error("token request for scope {scope} failed: {message}")]
    Auth { scope: String, message: String },

    /// `dirs::home_dir()` returned `None`; cannot locate `~/.dbx-scim/`.
    #[error("cannot determine home directory; set $HOME or pass --state-dir")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> CoreError {
    CoreError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn transport_err(location: impl Into<String>, source: ureq::Transport) -> CoreError {
    CoreError::Transport {
        location: location.into(),
        message: source.to_string(),
    }
}
