//! Byte-level transports for persisted state documents.
//!
//! Every cache and the delta-token store sit on top of a [`CacheStorage`]:
//! either a local file (written atomically via `.tmp` + rename) or a block
//! blob inside an Azure storage container addressed by URL + SAS token.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{io_err, transport_err, CoreError};

/// Read/write access to one named state document.
pub trait CacheStorage: Send + Sync + fmt::Debug {
    /// Returns `None` when the document does not exist yet.
    fn read(&self) -> Result<Option<String>, CoreError>;
    fn write(&self, document: &str) -> Result<(), CoreError>;
    /// Human-readable location, safe to log (never contains secrets).
    fn location(&self) -> String;
}

// ---------------------------------------------------------------------------
// Local files
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    path: PathBuf,
}

impl LocalFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CacheStorage for LocalFileStorage {
    fn read(&self) -> Result<Option<String>, CoreError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(&self.path, e)),
        }
    }

    fn write(&self, document: &str) -> Result<(), CoreError> {
        let Some(dir) = self.path.parent() else {
            return Err(io_err(
                &self.path,
                std::io::Error::other("invalid state file path"),
            ));
        };
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, document).map_err(|e| io_err(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| io_err(&self.path, e))?;
        Ok(())
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// Azure blob storage
// ---------------------------------------------------------------------------

/// One block blob inside a container, authorised by an optional SAS query.
pub struct BlobStorage {
    agent: ureq::Agent,
    blob_url: String,
    sas_token: Option<String>,
}

impl fmt::Debug for BlobStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobStorage")
            .field("blob_url", &self.blob_url)
            .field("sas_token", &self.sas_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl BlobStorage {
    pub fn new(container_url: &str, sas_token: Option<String>, blob_name: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(60))
            .build();
        Self {
            agent,
            blob_url: format!("{}/{}", container_url.trim_end_matches('/'), blob_name),
            sas_token,
        }
    }

    fn signed_url(&self) -> String {
        match &self.sas_token {
            Some(sas) => format!("{}?{}", self.blob_url, sas.trim_start_matches('?')),
            None => self.blob_url.clone(),
        }
    }
}

impl CacheStorage for BlobStorage {
    fn read(&self) -> Result<Option<String>, CoreError> {
        match self.agent.get(&self.signed_url()).call() {
            Ok(response) => response
                .into_string()
                .map(Some)
                .map_err(|e| CoreError::Transport {
                    location: self.blob_url.clone(),
                    message: e.to_string(),
                }),
            Err(ureq::Error::Status(404, _)) => {
                debug!("blob {} does not exist yet", self.blob_url);
                Ok(None)
            }
            Err(ureq::Error::Status(status, _)) => Err(CoreError::Http {
                location: self.blob_url.clone(),
                status,
            }),
            Err(ureq::Error::Transport(t)) => Err(transport_err(&self.blob_url, t)),
        }
    }

    fn write(&self, document: &str) -> Result<(), CoreError> {
        let result = self
            .agent
            .put(&self.signed_url())
            .set("x-ms-blob-type", "BlockBlob")
            .set("Content-Type", "application/json")
            .send_string(document);
        match result {
            Ok(_) => Ok(()),
            Err(ureq::Error::Status(status, _)) => Err(CoreError::Http {
                location: self.blob_url.clone(),
                status,
            }),
            Err(ureq::Error::Transport(t)) => Err(transport_err(&self.blob_url, t)),
        }
    }

    fn location(&self) -> String {
        self.blob_url.clone()
    }
}

// ---------------------------------------------------------------------------
// Location selection
// ---------------------------------------------------------------------------

/// Where all persisted state documents for a run live.
#[derive(Clone, PartialEq, Eq)]
pub enum StateLocation {
    Local(PathBuf),
    Blob {
        container_url: String,
        sas_token: Option<String>,
    },
}

impl fmt::Debug for StateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateLocation::Local(path) => f.debug_tuple("Local").field(path).finish(),
            StateLocation::Blob { container_url, .. } => f
                .debug_struct("Blob")
                .field("container_url", container_url)
                .finish_non_exhaustive(),
        }
    }
}

impl fmt::Display for StateLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateLocation::Local(path) => write!(f, "{}", path.display()),
            StateLocation::Blob { container_url, .. } => f.write_str(container_url),
        }
    }
}

impl StateLocation {
    /// Parse a container URL of the form `https://acct.blob.core.windows.net/container?<sas>`.
    pub fn blob_from_url(url: &str) -> Self {
        match url.split_once('?') {
            Some((container, sas)) if !sas.is_empty() => StateLocation::Blob {
                container_url: container.trim_end_matches('/').to_string(),
                sas_token: Some(sas.to_string()),
            },
            Some((container, _)) => StateLocation::Blob {
                container_url: container.trim_end_matches('/').to_string(),
                sas_token: None,
            },
            None => StateLocation::Blob {
                container_url: url.trim_end_matches('/').to_string(),
                sas_token: None,
            },
        }
    }

    /// Storage for the document `file_name` at this location.
    pub fn storage(&self, file_name: &str) -> Box<dyn CacheStorage> {
        match self {
            StateLocation::Local(root) => Box::new(LocalFileStorage::new(root.join(file_name))),
            StateLocation::Blob {
                container_url,
                sas_token,
            } => Box::new(BlobStorage::new(
                container_url,
                sas_token.clone(),
                file_name,
            )),
        }
    }
}
