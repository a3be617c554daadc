//! `dbx-scim sync`: converge the account with the configured groups.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use dbx_scim_core::{DeltaTokenStore, NameCaches, PrincipalKind};
use dbx_scim_graph::{GraphClient, DEFAULT_GRACE_PERIOD, DEFAULT_SEARCH_DEPTH};
use dbx_scim_sync::{
    retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY},
    AccountScimClient, MembershipOutcome, MergeAction, RetryPolicy, RunOptions, SyncContext,
    SyncError, SyncMode, SyncReport, DEFAULT_WORKER_THREADS,
};

use super::{load_group_names, StateArgs};
use crate::config::{DatabricksSettings, GraphSettings};

/// Arguments for `dbx-scim sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// JSON or YAML list of group display names to sync.
    #[arg(long, value_name = "PATH")]
    pub groups_file: Option<PathBuf>,

    /// Crawl every listed group instead of following the change feed.
    #[arg(long)]
    pub full_sync: bool,

    /// Log user, service principal and group changes without applying them.
    #[arg(long)]
    pub dry_run_security_principals: bool,

    /// Log membership changes without applying them.
    #[arg(long)]
    pub dry_run_members: bool,

    /// Parallel SCIM workers per principal kind.
    #[arg(long, default_value_t = DEFAULT_WORKER_THREADS as u32, value_parser = clap::value_parser!(u32).range(1..))]
    pub worker_threads: u32,

    /// How many group levels below each listed group to enumerate.
    #[arg(long, default_value_t = DEFAULT_SEARCH_DEPTH, value_parser = clap::value_parser!(u32).range(1..))]
    pub group_search_depth: u32,

    /// Seconds to wait after the change feed reports changes before crawling.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_GRACE_PERIOD.as_secs())]
    pub grace_period: u64,

    /// Attempts per SCIM call when throttled.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, value_parser = clap::value_parser!(u32).range(1..))]
    pub retry_attempts: u32,

    /// Seconds between throttled attempts.
    #[arg(long, value_name = "SECS", default_value_t = DEFAULT_RETRY_DELAY.as_secs())]
    pub retry_delay: u64,

    /// Write the crawled directory graph to this file.
    #[arg(long, value_name = "PATH")]
    pub save_graph_response_json: Option<PathBuf>,

    /// Stop after querying the directory; nothing is written to the account.
    #[arg(long)]
    pub query_graph_only: bool,

    /// Write the run report to this file.
    #[arg(long, value_name = "PATH")]
    pub report_json: Option<PathBuf>,
}

impl SyncArgs {
    fn options(&self) -> Result<RunOptions> {
        let groups = match &self.groups_file {
            Some(path) => load_group_names(path)?,
            None => Default::default(),
        };
        Ok(RunOptions {
            mode: if self.full_sync {
                SyncMode::Full
            } else {
                SyncMode::Incremental
            },
            groups,
            search_depth: self.group_search_depth,
            dry_run_principals: self.dry_run_security_principals,
            dry_run_members: self.dry_run_members,
            worker_threads: self.worker_threads as usize,
            grace_period: Duration::from_secs(self.grace_period),
            retry: RetryPolicy::new(self.retry_attempts, Duration::from_secs(self.retry_delay)),
            graph_snapshot: self.save_graph_response_json.clone(),
            query_graph_only: self.query_graph_only,
        })
    }

    pub fn run(self, state: &StateArgs) -> Result<()> {
        let options = self.options()?;
        if options.mode == SyncMode::Full && options.groups.is_empty() {
            bail!(SyncError::NoGroupsProvided);
        }

        let location = state.location()?;
        let caches = NameCaches::open(&location)
            .with_context(|| format!("failed to load name caches from {location}"))?;
        let delta_tokens = DeltaTokenStore::open(&location);

        let graph = GraphSettings::from_env()?;
        let databricks = DatabricksSettings::from_env()?;
        tracing::info!(
            "state at {location}, account {} on {}",
            databricks.account_id,
            databricks.host
        );
        let directory = GraphClient::new(graph.token_provider());
        let scim = AccountScimClient::new(
            &databricks.host,
            &databricks.account_id,
            databricks.token_provider(),
        );

        let ctx = SyncContext {
            directory: &directory,
            scim: &scim,
            caches: &caches,
            delta_tokens: &delta_tokens,
        };
        let report = dbx_scim_sync::run(&ctx, &options).context("sync failed")?;

        if let Some(path) = &self.report_json {
            report
                .save_to_json_file(path)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
        }
        print_report(&report, options.query_graph_only);

        if !report.is_complete() {
            bail!(
                "{} object(s) failed to sync; the change-feed token was not advanced",
                report.failure_count()
            );
        }
        Ok(())
    }
}

#[derive(Tabled)]
struct KindRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "new")]
    new: usize,
    #[tabled(rename = "changed")]
    changed: usize,
    #[tabled(rename = "unchanged")]
    unchanged: usize,
    #[tabled(rename = "failed")]
    failed: usize,
}

fn print_report(report: &SyncReport, query_only: bool) {
    let prefix = if report.dry_run_principals { "[dry-run] " } else { "" };
    println!("{prefix}{} sync | directory: {}", report.mode, report.graph_summary);
    if query_only {
        println!("Query only, nothing reconciled.");
        return;
    }

    let rows: Vec<KindRow> = PrincipalKind::ALL
        .into_iter()
        .map(|kind| {
            let k = report.kind(kind);
            KindRow {
                kind: kind.to_string(),
                new: k.count(MergeAction::New),
                changed: k.count(MergeAction::Change),
                unchanged: k.count(MergeAction::NoChange),
                failed: k.failures.len(),
            }
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");

    match &report.membership {
        MembershipOutcome::Applied {
            groups_patched,
            operations,
        } => println!("memberships: {groups_patched} group(s) patched, {operations} operation(s)"),
        MembershipOutcome::DryRun {
            groups_with_changes,
            operations,
        } => println!(
            "[dry-run] memberships: {groups_with_changes} group(s) would change, {operations} operation(s)"
        ),
        MembershipOutcome::Skipped { reason } => println!(
            "{} memberships skipped: {reason}. Apply principal changes first, \
             keeping --dry-run-members if you want to review memberships.",
            "!".yellow()
        ),
        MembershipOutcome::NotRun => println!("memberships: not run"),
    }

    for failure in report.failures() {
        println!(
            "  {} {} {}: {}",
            "✗".red(),
            failure.kind,
            failure.name.bold(),
            failure.error
        );
    }
    if report.is_complete() {
        let saved = if report.delta_token_saved {
            ", change-feed token saved"
        } else {
            ""
        };
        println!(
            "{} {} principal change(s){saved}",
            "✓".green(),
            report.principal_change_count()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Harness {
        #[command(flatten)]
        args: SyncArgs,
    }

    #[test]
    fn defaults_match_the_library() {
        let harness = Harness::parse_from(["dbx-scim"]);
        let options = harness.args.options().unwrap();
        assert_eq!(options.mode, SyncMode::Incremental);
        assert_eq!(options.search_depth, DEFAULT_SEARCH_DEPTH);
        assert_eq!(options.worker_threads, DEFAULT_WORKER_THREADS);
        assert_eq!(options.grace_period, DEFAULT_GRACE_PERIOD);
        assert_eq!(options.retry, RetryPolicy::default());
        assert!(options.groups.is_empty());
    }

    #[test]
    fn flags_map_onto_run_options() {
        let harness = Harness::parse_from([
            "dbx-scim",
            "--full-sync",
            "--dry-run-members",
            "--group-search-depth",
            "3",
            "--worker-threads",
            "2",
            "--query-graph-only",
            "--save-graph-response-json",
            "graph.json",
        ]);
        let options = harness.args.options().unwrap();
        assert_eq!(options.mode, SyncMode::Full);
        assert!(options.dry_run_members);
        assert!(!options.dry_run_principals);
        assert_eq!(options.search_depth, 3);
        assert_eq!(options.worker_threads, 2);
        assert!(options.query_graph_only);
        assert_eq!(options.graph_snapshot, Some(PathBuf::from("graph.json")));
    }

    #[test]
    fn zero_search_depth_is_rejected() {
        assert!(Harness::try_parse_from(["dbx-scim", "--group-search-depth", "0"]).is_err());
    }
}
