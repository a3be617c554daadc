//! Converges principals of one kind onto the target.
//!
//! For each desired record: find the target record by unique name (cached id
//! first, then an exact-name list), create it if absent, otherwise patch the
//! compared fields that differ. Objects are processed concurrently on a
//! bounded rayon pool; a failed object is recorded and the rest continue,
//! unless the failure is fatal.

use dbx_scim_core::{NameCaches, PatchOp, PrincipalKind, TargetPrincipal};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::report::{KindReport, MergeAction, MergeResult, ObjectFailure};
use crate::retry::RetryPolicy;
use crate::scim::{exact_name_filter, ScimApi};

pub const DEFAULT_WORKER_THREADS: usize = 10;

pub struct ReconciliationEngine<'a, S: ScimApi + ?Sized> {
    api: &'a S,
    caches: &'a NameCaches,
    retry: RetryPolicy,
    worker_threads: usize,
}

impl<'a, S: ScimApi + ?Sized> ReconciliationEngine<'a, S> {
    pub fn new(api: &'a S, caches: &'a NameCaches) -> Self {
        Self {
            api,
            caches,
            retry: RetryPolicy::default(),
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads.max(1);
        self
    }

    fn pool(&self) -> Result<rayon::ThreadPool, SyncError> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.worker_threads)
            .thread_name(|i| format!("scim-worker-{i}"))
            .build()
            .map_err(|e| SyncError::WorkerPool(e.to_string()))
    }

    /// Reconcile every desired record of `kind`.
    ///
    /// Per-object failures land in [`KindReport::failures`]. A fatal error is
    /// returned once all in-flight objects have finished; the cache is
    /// flushed either way.
    pub fn reconcile_kind(
        &self,
        kind: PrincipalKind,
        desired: Vec<TargetPrincipal>,
        dry_run: bool,
    ) -> Result<KindReport, SyncError> {
        let mut report = KindReport::new(kind);
        if desired.is_empty() {
            info!("no {kind} records to reconcile");
            return Ok(report);
        }
        info!(
            "reconciling {} {kind} record(s) on {} worker(s)",
            desired.len(),
            self.worker_threads
        );

        let pool = self.pool()?;
        let outcomes: Vec<(String, Result<MergeResult, SyncError>)> = pool.install(|| {
            desired
                .into_par_iter()
                .map(|principal| {
                    let name = principal.human_name().to_string();
                    (name, self.reconcile_one(principal, dry_run))
                })
                .collect()
        });

        let mut fatal = None;
        for (name, outcome) in outcomes {
            match outcome {
                Ok(result) => report.results.push(result),
                Err(e) if e.is_fatal() => {
                    error!("fatal error reconciling {kind} {name}: {e}");
                    fatal.get_or_insert(e);
                }
                Err(e) => {
                    error!("failed to reconcile {kind} {name}: {e}");
                    report.failures.push(ObjectFailure {
                        kind,
                        name,
                        error: e.to_string(),
                    });
                }
            }
        }

        self.caches.for_kind(kind).flush()?;
        if let Some(e) = fatal {
            return Err(e);
        }

        info!(
            "{kind}: {} new, {} changed, {} unchanged, {} failed",
            report.count(MergeAction::New),
            report.count(MergeAction::Change),
            report.count(MergeAction::NoChange),
            report.failures.len()
        );
        Ok(report)
    }

    /// Reconcile a single desired record.
    pub fn reconcile_one(
        &self,
        desired: TargetPrincipal,
        dry_run: bool,
    ) -> Result<MergeResult, SyncError> {
        let kind = desired.kind();
        let name = desired.human_name().to_string();

        let Some(actual) = self.lookup(kind, &name)? else {
            return self.create(desired, dry_run);
        };

        let changes = diff(&desired, &actual)?;
        if changes.is_empty() {
            debug!("{kind} {name} is up to date");
            return Ok(MergeResult {
                desired,
                actual: Some(actual),
                created: None,
                action: MergeAction::NoChange,
                changes,
            });
        }

        let Some(id) = actual.id() else {
            return Err(SyncError::MissingTargetId { kind, name });
        };
        if dry_run {
            info!("[dry-run] would patch {kind} {name} ({id}): {changes:?}");
        } else {
            self.retry.scim(&format!("patch {kind} '{name}'"), || {
                self.api.patch(kind, id, &changes)
            })?;
            self.caches.for_kind(kind).invalidate(&name)?;
            info!("patched {kind} {name} ({id}), {} change(s)", changes.len());
        }
        Ok(MergeResult {
            desired,
            actual: Some(actual),
            created: None,
            action: MergeAction::Change,
            changes,
        })
    }

    fn create(&self, desired: TargetPrincipal, dry_run: bool) -> Result<MergeResult, SyncError> {
        let kind = desired.kind();
        let name = desired.human_name().to_string();
        if dry_run {
            info!("[dry-run] would create {kind} {name}");
            return Ok(MergeResult {
                desired,
                actual: None,
                created: None,
                action: MergeAction::New,
                changes: Vec::new(),
            });
        }

        let body = desired.without_members();
        let created = self
            .retry
            .scim(&format!("create {kind} '{name}'"), || self.api.create(&body))?;
        let Some(id) = created.id() else {
            return Err(SyncError::MissingTargetId { kind, name });
        };
        self.caches.for_kind(kind).set(&name, id)?;
        info!("created {kind} {name} ({id})");
        Ok(MergeResult {
            desired,
            actual: None,
            created: Some(created),
            action: MergeAction::New,
            changes: Vec::new(),
        })
    }

    /// Find the target record named `name`.
    ///
    /// A cached id is confirmed with a fetch; a stale or missing entry falls
    /// back to an exact-name list. More than one match is fatal.
    pub fn lookup(
        &self,
        kind: PrincipalKind,
        name: &str,
    ) -> Result<Option<TargetPrincipal>, SyncError> {
        let cache = self.caches.for_kind(kind);

        let mut confirmed = None;
        let mut fetch_error = None;
        cache.get_and_validate(name, |name, id| {
            match self
                .retry
                .scim(&format!("get {kind} {id}"), || self.api.get(kind, id))
            {
                Ok(found) if found.human_name() == name => {
                    confirmed = Some(found);
                    true
                }
                Ok(_) => false,
                Err(SyncError::Scim(e)) if e.is_not_found() => false,
                Err(e) => {
                    fetch_error = Some(e);
                    true
                }
            }
        })?;
        if let Some(e) = fetch_error {
            return Err(e);
        }
        if confirmed.is_some() {
            return Ok(confirmed);
        }

        let filter = exact_name_filter(kind, name);
        let mut found = self
            .retry
            .scim(&format!("list {kind} '{name}'"), || self.api.list(kind, &filter))?;
        match found.len() {
            0 => Ok(None),
            1 => {
                let principal = found.pop();
                if let Some(id) = principal.as_ref().and_then(TargetPrincipal::id) {
                    cache.set(name, id)?;
                }
                Ok(principal)
            }
            count => Err(SyncError::DuplicateMatch {
                kind,
                name: name.to_string(),
                count,
            }),
        }
    }

    /// Delete the named records of `kind` if they exist; returns the names
    /// that were (or on a dry run would be) deleted.
    pub fn delete_if_exists(
        &self,
        kind: PrincipalKind,
        names: &[String],
        dry_run: bool,
    ) -> Result<Vec<String>, SyncError> {
        let pool = self.pool()?;
        let outcomes: Vec<Result<bool, SyncError>> = pool.install(|| {
            names
                .par_iter()
                .map(|name| self.delete_one(kind, name, dry_run))
                .collect()
        });
        self.caches.for_kind(kind).flush()?;

        let mut deleted = Vec::new();
        for (name, outcome) in names.iter().zip(outcomes) {
            if outcome? {
                deleted.push(name.clone());
            }
        }
        Ok(deleted)
    }

    fn delete_one(&self, kind: PrincipalKind, name: &str, dry_run: bool) -> Result<bool, SyncError> {
        let Some(id) = self
            .lookup(kind, name)?
            .and_then(|p| p.id().map(str::to_string))
        else {
            warn!("{kind} {name} not found on target, nothing to delete");
            return Ok(false);
        };
        if dry_run {
            info!("[dry-run] would delete {kind} {name} ({id})");
        } else {
            self.retry
                .scim(&format!("delete {kind} '{name}'"), || self.api.delete(kind, &id))?;
            self.caches.for_kind(kind).invalidate(name)?;
            info!("deleted {kind} {name} ({id})");
        }
        Ok(true)
    }
}

/// Replace operations for every compared field whose desired value differs.
/// Fields the desired record leaves unset are not managed.
pub fn diff(desired: &TargetPrincipal, actual: &TargetPrincipal) -> Result<Vec<PatchOp>, SyncError> {
    let want = desired.attributes()?;
    let have = actual.attributes()?;
    Ok(desired
        .kind()
        .spec()
        .compare_fields
        .iter()
        .filter_map(|field| {
            let value = want.get(*field)?;
            (have.get(*field) != Some(value)).then(|| PatchOp::replace(*field, value.clone()))
        })
        .collect())
}
