//! Per-object merge outcomes and the run report built from them.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use dbx_scim_core::{PatchOp, PrincipalKind, TargetPrincipal};
use serde::Serialize;

use crate::error::{io_err, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeAction {
    New,
    Change,
    NoChange,
}

impl fmt::Display for MergeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MergeAction::New => "new",
            MergeAction::Change => "change",
            MergeAction::NoChange => "no change",
        })
    }
}

/// Outcome of reconciling one desired principal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeResult {
    pub desired: TargetPrincipal,
    /// Record found on the target before any write.
    pub actual: Option<TargetPrincipal>,
    /// Record returned by a create; `None` on dry runs.
    pub created: Option<TargetPrincipal>,
    pub action: MergeAction,
    pub changes: Vec<PatchOp>,
}

impl MergeResult {
    /// The record now standing for `desired` on the target, if any.
    pub fn effective(&self) -> Option<&TargetPrincipal> {
        self.actual.as_ref().or(self.created.as_ref())
    }

    /// Directory id of the desired principal.
    pub fn external_id(&self) -> Option<&str> {
        self.desired.external_id()
    }

    pub fn target_id(&self) -> Option<&str> {
        self.effective().and_then(TargetPrincipal::id)
    }

    pub fn human_name(&self) -> &str {
        self.desired.human_name()
    }

    /// 0 for no change, otherwise at least 1.
    pub fn effective_change_count(&self) -> usize {
        match self.action {
            MergeAction::NoChange => 0,
            MergeAction::New | MergeAction::Change => self.changes.len().max(1),
        }
    }
}

/// An object whose reconciliation failed without aborting the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectFailure {
    pub kind: PrincipalKind,
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KindReport {
    pub kind: PrincipalKind,
    pub results: Vec<MergeResult>,
    pub failures: Vec<ObjectFailure>,
}

impl KindReport {
    pub fn new(kind: PrincipalKind) -> Self {
        Self {
            kind,
            results: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub fn change_count(&self) -> usize {
        self.results.iter().map(MergeResult::effective_change_count).sum()
    }

    pub fn count(&self, action: MergeAction) -> usize {
        self.results.iter().filter(|r| r.action == action).count()
    }
}

/// What happened to group memberships in a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MembershipOutcome {
    Applied { groups_patched: usize, operations: usize },
    DryRun { groups_with_changes: usize, operations: usize },
    /// Principal changes were pending under a principal dry run.
    Skipped { reason: String },
    NotRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    Full,
    Incremental,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncReport {
    pub mode: SyncMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run_principals: bool,
    pub dry_run_members: bool,
    pub groups_requested: Vec<String>,
    pub graph_summary: String,
    pub users: KindReport,
    pub service_principals: KindReport,
    pub groups: KindReport,
    pub membership: MembershipOutcome,
    pub delta_token_saved: bool,
}

impl SyncReport {
    pub fn new(mode: SyncMode, dry_run_principals: bool, dry_run_members: bool) -> Self {
        Self {
            mode,
            started_at: Utc::now(),
            finished_at: None,
            dry_run_principals,
            dry_run_members,
            groups_requested: Vec::new(),
            graph_summary: String::new(),
            users: KindReport::new(PrincipalKind::User),
            service_principals: KindReport::new(PrincipalKind::ServicePrincipal),
            groups: KindReport::new(PrincipalKind::Group),
            membership: MembershipOutcome::NotRun,
            delta_token_saved: false,
        }
    }

    pub fn kind(&self, kind: PrincipalKind) -> &KindReport {
        match kind {
            PrincipalKind::User => &self.users,
            PrincipalKind::ServicePrincipal => &self.service_principals,
            PrincipalKind::Group => &self.groups,
        }
    }

    pub fn kind_mut(&mut self, kind: PrincipalKind) -> &mut KindReport {
        match kind {
            PrincipalKind::User => &mut self.users,
            PrincipalKind::ServicePrincipal => &mut self.service_principals,
            PrincipalKind::Group => &mut self.groups,
        }
    }

    /// Principal-level changes across all kinds.
    pub fn principal_change_count(&self) -> usize {
        PrincipalKind::ALL
            .iter()
            .map(|k| self.kind(*k).change_count())
            .sum()
    }

    pub fn failure_count(&self) -> usize {
        PrincipalKind::ALL
            .iter()
            .map(|k| self.kind(*k).failures.len())
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ObjectFailure> {
        PrincipalKind::ALL
            .into_iter()
            .flat_map(move |k| self.kind(k).failures.iter())
    }

    /// True when every object converged (or would converge, on a dry run).
    pub fn is_complete(&self) -> bool {
        self.failure_count() == 0
    }

    pub fn save_to_json_file(&self, path: &Path) -> Result<(), SyncError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| io_err(path, e))
    }
}
