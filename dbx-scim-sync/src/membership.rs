//! Group membership convergence, run after every principal exists.
//!
//! Desired members are expressed in directory ids; actual members in target
//! ids. A bidirectional cross-reference built from all merge results
//! translates between the two. Only groups whose membership the crawl fully
//! enumerated ("deep" groups) are touched.

use std::collections::{BTreeSet, HashMap};

use dbx_scim_core::{PatchOp, PrincipalKind};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::report::{MembershipOutcome, MergeResult, ObjectFailure};
use crate::retry::RetryPolicy;
use crate::scim::ScimApi;

/// Directory id <-> target id map.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrossReference {
    directory_to_target: HashMap<String, String>,
    target_to_directory: HashMap<String, String>,
}

impl CrossReference {
    /// Build from every merge result that has both a directory id and an
    /// effective target record. Fails if the mapping is not one-to-one.
    pub fn build<'r, I>(results: I) -> Result<Self, SyncError>
    where
        I: IntoIterator<Item = &'r MergeResult>,
    {
        let mut xref = CrossReference::default();
        for result in results {
            let (Some(directory_id), Some(target_id)) = (result.external_id(), result.target_id())
            else {
                continue;
            };
            xref.directory_to_target
                .insert(directory_id.to_string(), target_id.to_string());
            xref.target_to_directory
                .insert(target_id.to_string(), directory_id.to_string());
        }
        if xref.directory_to_target.len() != xref.target_to_directory.len() {
            return Err(SyncError::XrefMismatch {
                forward: xref.directory_to_target.len(),
                backward: xref.target_to_directory.len(),
            });
        }
        Ok(xref)
    }

    pub fn target_id(&self, directory_id: &str) -> Option<&str> {
        self.directory_to_target.get(directory_id).map(String::as_str)
    }

    pub fn directory_id(&self, target_id: &str) -> Option<&str> {
        self.target_to_directory.get(target_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.directory_to_target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory_to_target.is_empty()
    }
}

/// Patch operations that converge one group's members.
///
/// Additions are batched into a single `add`; each removal is its own
/// `remove`. Desired members with no target counterpart (not created on a
/// dry run, or failed) are skipped. Actual members that map to no desired
/// directory id, including ones this run did not reconcile, are removed.
pub fn membership_changes(group: &MergeResult, xref: &CrossReference) -> Vec<PatchOp> {
    let Some(effective) = group.effective() else {
        return Vec::new();
    };

    let mut to_add = BTreeSet::new();
    for member in group.desired.members() {
        match xref.target_id(&member.value) {
            Some(target_id) => {
                if !effective.members().iter().any(|m| m.value == target_id) {
                    to_add.insert(target_id.to_string());
                }
            }
            None => debug!(
                "member {} of {} has no target record, skipping",
                member.value,
                group.human_name()
            ),
        }
    }

    let desired_ids: BTreeSet<&str> = group
        .desired
        .members()
        .iter()
        .map(|m| m.value.as_str())
        .collect();
    let mut to_remove = BTreeSet::new();
    for member in effective.members() {
        match xref.directory_id(&member.value) {
            Some(directory_id) if desired_ids.contains(directory_id) => {}
            Some(_) => {
                to_remove.insert(member.value.clone());
            }
            None => {
                debug!(
                    "target member {} of {} has no directory counterpart, removing",
                    member.value,
                    group.human_name()
                );
                to_remove.insert(member.value.clone());
            }
        }
    }

    let mut operations = Vec::with_capacity(to_remove.len() + 1);
    if !to_add.is_empty() {
        operations.push(PatchOp::add_members(to_add));
    }
    operations.extend(to_remove.iter().map(|id| PatchOp::remove_member(id)));
    operations
}

pub struct MembershipReconciler<'a, S: ScimApi + ?Sized> {
    api: &'a S,
    retry: RetryPolicy,
}

impl<'a, S: ScimApi + ?Sized> MembershipReconciler<'a, S> {
    pub fn new(api: &'a S) -> Self {
        Self {
            api,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Converge membership of every deep-synced group in `groups`.
    ///
    /// Operations computed for each group are appended to its
    /// [`MergeResult::changes`]. Failed patches are returned as failures; a
    /// cross-reference mismatch aborts.
    pub fn reconcile(
        &self,
        users: &[MergeResult],
        service_principals: &[MergeResult],
        groups: &mut [MergeResult],
        deep_sync_group_names: &BTreeSet<String>,
        dry_run: bool,
    ) -> Result<(MembershipOutcome, Vec<ObjectFailure>), SyncError> {
        let xref = CrossReference::build(
            users
                .iter()
                .chain(service_principals.iter())
                .chain(groups.iter()),
        )?;
        debug!("membership cross-reference has {} entries", xref.len());

        let mut failures = Vec::new();
        let mut groups_changed = 0;
        let mut operation_count = 0;

        for group in groups.iter_mut() {
            let name = group.human_name().to_string();
            if !deep_sync_group_names.contains(&name) {
                warn!("skipping membership of shallow group {name}");
                continue;
            }
            let operations = membership_changes(group, &xref);
            if operations.is_empty() {
                debug!("membership of {name} is up to date");
                continue;
            }
            let Some(group_id) = group.target_id().map(str::to_string) else {
                debug!("group {name} has no target record, skipping membership");
                continue;
            };
            groups_changed += 1;
            operation_count += operations.len();

            if dry_run {
                info!(
                    "[dry-run] would patch membership of {name} ({group_id}): {operations:?}"
                );
            } else {
                let patched = self
                    .retry
                    .scim(&format!("patch members of '{name}'"), || {
                        self.api.patch(PrincipalKind::Group, &group_id, &operations)
                    });
                match patched {
                    Ok(()) => info!(
                        "patched membership of {name} ({group_id}), {} operation(s)",
                        operations.len()
                    ),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!("failed to patch membership of {name}: {e}");
                        failures.push(ObjectFailure {
                            kind: PrincipalKind::Group,
                            name: name.clone(),
                            error: e.to_string(),
                        });
                        continue;
                    }
                }
            }
            group.changes.extend(operations);
        }

        let outcome = if dry_run {
            MembershipOutcome::DryRun {
                groups_with_changes: groups_changed,
                operations: operation_count,
            }
        } else {
            MembershipOutcome::Applied {
                groups_patched: groups_changed - failures.len(),
                operations: operation_count,
            }
        };
        Ok((outcome, failures))
    }
}
