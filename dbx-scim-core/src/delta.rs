//! Persistence of the directory change-feed continuation link.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CoreError;
use crate::storage::{CacheStorage, StateLocation};
use crate::paths::DELTA_TOKEN_FILE;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeltaToken {
    pub delta_link: String,
    /// Absent in documents written by older runs.
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct DeltaTokenStore {
    storage: Box<dyn CacheStorage>,
}

impl DeltaTokenStore {
    pub fn new(storage: Box<dyn CacheStorage>) -> Self {
        Self { storage }
    }

    pub fn open(location: &StateLocation) -> Self {
        Self::new(location.storage(DELTA_TOKEN_FILE))
    }

    pub fn load(&self) -> Result<Option<DeltaToken>, CoreError> {
        let Some(contents) = self.storage.read()? else {
            return Ok(None);
        };
        let token = serde_json::from_str(&contents).map_err(|source| CoreError::Parse {
            location: self.storage.location(),
            source,
        })?;
        Ok(Some(token))
    }

    pub fn save(&self, delta_link: &str) -> Result<DeltaToken, CoreError> {
        let token = DeltaToken {
            delta_link: delta_link.to_string(),
            saved_at: Some(Utc::now()),
        };
        self.storage.write(&serde_json::to_string_pretty(&token)?)?;
        info!("saved change-feed token to {}", self.storage.location());
        Ok(token)
    }

    pub fn location(&self) -> String {
        self.storage.location()
    }
}
