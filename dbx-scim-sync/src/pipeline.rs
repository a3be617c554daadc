//! Sync pipeline entrypoint used by the CLI.
//!
//! Order of a run: build the desired state (full crawl or change feed),
//! validate it, reconcile users, then service principals, then groups, then
//! group memberships. The change-feed token is persisted last, and only when
//! everything converged for real.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use dbx_scim_core::{DeltaTokenStore, NameCaches, PrincipalKind};
use dbx_scim_graph::{
    ChangeFeedConsumer, DesiredStateGraph, DirectoryApi, DirectoryCrawler, DEFAULT_GRACE_PERIOD,
    DEFAULT_SEARCH_DEPTH,
};
use tracing::{info, warn};

use crate::engine::{ReconciliationEngine, DEFAULT_WORKER_THREADS};
use crate::error::SyncError;
use crate::membership::MembershipReconciler;
use crate::report::{MembershipOutcome, SyncMode, SyncReport};
use crate::retry::RetryPolicy;
use crate::scim::ScimApi;

/// Options for one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub mode: SyncMode,
    /// Seed group display names.
    pub groups: BTreeSet<String>,
    pub search_depth: u32,
    pub dry_run_principals: bool,
    pub dry_run_members: bool,
    pub worker_threads: usize,
    pub grace_period: Duration,
    pub retry: RetryPolicy,
    /// Write the crawled graph here before reconciling.
    pub graph_snapshot: Option<PathBuf>,
    /// Stop after building (and optionally saving) the graph.
    pub query_graph_only: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            mode: SyncMode::Incremental,
            groups: BTreeSet::new(),
            search_depth: DEFAULT_SEARCH_DEPTH,
            dry_run_principals: false,
            dry_run_members: false,
            worker_threads: DEFAULT_WORKER_THREADS,
            grace_period: DEFAULT_GRACE_PERIOD,
            retry: RetryPolicy::default(),
            graph_snapshot: None,
            query_graph_only: false,
        }
    }
}

impl RunOptions {
    fn is_dry_run(&self) -> bool {
        self.dry_run_principals || self.dry_run_members
    }
}

/// Collaborators a run talks to.
pub struct SyncContext<'a> {
    pub directory: &'a dyn DirectoryApi,
    pub scim: &'a dyn ScimApi,
    pub caches: &'a NameCaches,
    pub delta_tokens: &'a DeltaTokenStore,
}

/// Run the sync pipeline.
pub fn run(ctx: &SyncContext<'_>, options: &RunOptions) -> Result<SyncReport, SyncError> {
    let mut report = SyncReport::new(
        options.mode,
        options.dry_run_principals,
        options.dry_run_members,
    );
    report.groups_requested = options.groups.iter().cloned().collect();
    info!(
        "starting {} sync of {} requested group(s), search depth {}",
        options.mode,
        options.groups.len(),
        options.search_depth
    );

    let (graph, pending_token) = build_desired_state(ctx, options)?;
    report.graph_summary = graph.summary();
    graph.ensure_valid()?;

    if let Some(path) = &options.graph_snapshot {
        graph.save_to_json_file(path)?;
    }
    if options.query_graph_only {
        info!("query-only run, skipping reconciliation");
        report.finished_at = Some(Utc::now());
        return Ok(report);
    }

    let engine = ReconciliationEngine::new(ctx.scim, ctx.caches)
        .with_retry(options.retry)
        .with_worker_threads(options.worker_threads);
    for kind in PrincipalKind::ALL {
        *report.kind_mut(kind) =
            engine.reconcile_kind(kind, graph.desired(kind), options.dry_run_principals)?;
    }

    let pending = report.principal_change_count();
    if options.dry_run_principals && pending > 0 {
        warn!(
            "{pending} principal change(s) pending under principal dry run, \
             membership sync skipped until they are applied"
        );
        report.membership = MembershipOutcome::Skipped {
            reason: format!("{pending} pending principal change(s)"),
        };
    } else {
        let reconciler = MembershipReconciler::new(ctx.scim).with_retry(options.retry);
        let SyncReport {
            users,
            service_principals,
            groups,
            ..
        } = &mut report;
        let (outcome, failures) = reconciler.reconcile(
            &users.results,
            &service_principals.results,
            &mut groups.results,
            &graph.deep_sync_group_names,
            options.dry_run_members,
        )?;
        groups.failures.extend(failures);
        report.membership = outcome;
    }

    if let Some(token) = pending_token {
        if report.is_complete() && !options.is_dry_run() {
            ctx.delta_tokens.save(&token)?;
            report.delta_token_saved = true;
        } else {
            warn!(
                "change-feed token not saved ({} failure(s), dry run: {}); \
                 the next run replays the same window",
                report.failure_count(),
                options.is_dry_run()
            );
        }
    }

    report.finished_at = Some(Utc::now());
    info!(
        "sync finished: {} principal change(s), {} failure(s)",
        report.principal_change_count(),
        report.failure_count()
    );
    Ok(report)
}

/// Desired state plus, in incremental mode, the token to persist on success.
fn build_desired_state(
    ctx: &SyncContext<'_>,
    options: &RunOptions,
) -> Result<(DesiredStateGraph, Option<String>), SyncError> {
    match options.mode {
        SyncMode::Full => {
            if options.groups.is_empty() {
                return Err(SyncError::NoGroupsProvided);
            }
            let graph =
                DirectoryCrawler::new(ctx.directory).crawl(&options.groups, options.search_depth)?;
            Ok((graph, None))
        }
        SyncMode::Incremental => {
            let saved = ctx.delta_tokens.load()?;
            let whitelist = ctx.caches.groups.names();
            info!(
                "incremental sync: {} known group(s), token {}",
                whitelist.len(),
                if saved.is_some() { "found" } else { "absent" }
            );
            let changed = ChangeFeedConsumer::new(ctx.directory)
                .with_grace_period(options.grace_period)
                .resolve_changed_groups(
                    saved.as_ref().map(|t| t.delta_link.as_str()),
                    &options.groups,
                    &whitelist,
                    options.search_depth,
                )?;
            Ok((changed.graph, Some(changed.delta_link)))
        }
    }
}
