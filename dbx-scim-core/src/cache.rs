//! Persistent name-to-id caches, one per principal kind.
//!
//! A cache maps a principal's unique human name to the id the SCIM endpoint
//! assigned it. Entries are hints: callers validate them against the remote
//! record with [`NameCache::get_and_validate`] before trusting them.
//!
//! The document is `{"updated_at": ..., "entries": {name: id}}`. A plain
//! `{name: id}` map from older runs is still accepted on load.
//!
//! Mutations bump a change counter; once it reaches
//! [`AUTO_FLUSH_THRESHOLD`] the cache persists itself. The state lock is held
//! only around map access. Writes to storage happen outside it, serialized by
//! a separate flush lock.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::storage::{CacheStorage, StateLocation};
use crate::types::PrincipalKind;

pub const AUTO_FLUSH_THRESHOLD: u32 = 10;

/// On-storage cache payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheFile {
    pub updated_at: DateTime<Utc>,
    pub entries: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CacheFileCompat {
    Structured(CacheFileStructuredCompat),
    Legacy(BTreeMap<String, String>),
}

#[derive(Debug, Deserialize)]
struct CacheFileStructuredCompat {
    pub updated_at: Option<DateTime<Utc>>,
    pub entries: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: BTreeMap<String, String>,
    change_counter: u32,
}

#[derive(Debug)]
pub struct NameCache {
    label: String,
    storage: Box<dyn CacheStorage>,
    state: Mutex<CacheState>,
    flush_lock: Mutex<()>,
}

impl NameCache {
    /// Load the cache from `storage`; a missing document yields an empty cache.
    pub fn open(label: impl Into<String>, storage: Box<dyn CacheStorage>) -> Result<Self, CoreError> {
        let label = label.into();
        let entries = match storage.read()? {
            None => BTreeMap::new(),
            Some(contents) => decode(&contents, &storage.location())?,
        };
        debug!(
            "loaded {} cache with {} entries from {}",
            label,
            entries.len(),
            storage.location()
        );
        Ok(Self {
            label,
            storage,
            state: Mutex::new(CacheState {
                entries,
                change_counter: 0,
            }),
            flush_lock: Mutex::new(()),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn location(&self) -> String {
        self.storage.location()
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.lock().entries.get(name).cloned()
    }

    /// Store `name -> id`. Counts as a change only when the id differs.
    pub fn set(&self, name: &str, id: &str) -> Result<(), CoreError> {
        let should_flush = {
            let mut state = self.lock();
            if state.entries.get(name).map(String::as_str) == Some(id) {
                return Ok(());
            }
            state.entries.insert(name.to_string(), id.to_string());
            state.change_counter += 1;
            state.change_counter >= AUTO_FLUSH_THRESHOLD
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Drop `name`. Counts as a change only when an entry was present.
    pub fn invalidate(&self, name: &str) -> Result<(), CoreError> {
        let should_flush = {
            let mut state = self.lock();
            if state.entries.remove(name).is_none() {
                return Ok(());
            }
            state.change_counter += 1;
            state.change_counter >= AUTO_FLUSH_THRESHOLD
        };
        if should_flush {
            self.flush()?;
        }
        Ok(())
    }

    /// Return the cached id for `name` if `validator(name, id)` confirms it.
    ///
    /// The validator runs without the lock held, so it may perform network
    /// calls. A rejected entry is removed.
    pub fn get_and_validate<F>(&self, name: &str, validator: F) -> Result<Option<String>, CoreError>
    where
        F: FnOnce(&str, &str) -> bool,
    {
        let Some(id) = self.get(name) else {
            return Ok(None);
        };
        if validator(name, &id) {
            return Ok(Some(id));
        }
        debug!("{} cache entry {} -> {} failed validation", self.label, name, id);
        self.invalidate(name)?;
        Ok(None)
    }

    /// Persist the current entries and reset the change counter.
    pub fn flush(&self) -> Result<(), CoreError> {
        let _guard = self
            .flush_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let (snapshot, pending) = {
            let mut state = self.lock();
            let pending = state.change_counter;
            state.change_counter = 0;
            (state.entries.clone(), pending)
        };
        let document = CacheFile {
            updated_at: Utc::now(),
            entries: snapshot,
        };
        let json = serde_json::to_string_pretty(&document)?;
        if let Err(e) = self.storage.write(&json) {
            self.lock().change_counter += pending.max(1);
            return Err(e);
        }
        debug!(
            "flushed {} cache ({} entries) to {}",
            self.label,
            document.entries.len(),
            self.storage.location()
        );
        Ok(())
    }

    /// Remove every entry and persist the empty cache immediately.
    pub fn clear(&self) -> Result<(), CoreError> {
        {
            let mut state = self.lock();
            state.entries.clear();
            state.change_counter += 1;
        }
        self.flush()?;
        info!("cleared {} cache at {}", self.label, self.storage.location());
        Ok(())
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.lock().entries.keys().cloned().collect()
    }

    pub fn entries(&self) -> BTreeMap<String, String> {
        self.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mutations not yet persisted.
    pub fn pending_changes(&self) -> u32 {
        self.lock().change_counter
    }
}

fn decode(contents: &str, location: &str) -> Result<BTreeMap<String, String>, CoreError> {
    let parsed = serde_json::from_str::<CacheFileCompat>(contents).map_err(|source| {
        CoreError::Parse {
            location: location.to_string(),
            source,
        }
    })?;
    Ok(match parsed {
        CacheFileCompat::Structured(file) => file.entries,
        CacheFileCompat::Legacy(entries) => entries,
    })
}

// ---------------------------------------------------------------------------
// One cache per kind
// ---------------------------------------------------------------------------

/// The three per-kind caches used by a run.
#[derive(Debug)]
pub struct NameCaches {
    pub users: NameCache,
    pub service_principals: NameCache,
    pub groups: NameCache,
}

impl NameCaches {
    pub fn open(location: &StateLocation) -> Result<Self, CoreError> {
        let open_kind = |kind: PrincipalKind| {
            NameCache::open(kind.as_str(), location.storage(kind.spec().cache_file))
        };
        Ok(Self {
            users: open_kind(PrincipalKind::User)?,
            service_principals: open_kind(PrincipalKind::ServicePrincipal)?,
            groups: open_kind(PrincipalKind::Group)?,
        })
    }

    pub fn for_kind(&self, kind: PrincipalKind) -> &NameCache {
        match kind {
            PrincipalKind::User => &self.users,
            PrincipalKind::ServicePrincipal => &self.service_principals,
            PrincipalKind::Group => &self.groups,
        }
    }

    pub fn flush_all(&self) -> Result<(), CoreError> {
        for kind in PrincipalKind::ALL {
            self.for_kind(kind).flush()?;
        }
        Ok(())
    }
}
