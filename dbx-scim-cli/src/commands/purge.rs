//! `dbx-scim purge`: delete principals from the account by unique name.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use dbx_scim_core::{NameCaches, PrincipalKind};
use dbx_scim_sync::{
    retry::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY},
    AccountScimClient, ReconciliationEngine, RetryPolicy, DEFAULT_WORKER_THREADS,
};

use super::StateArgs;
use crate::config::DatabricksSettings;

/// Arguments for `dbx-scim purge`.
#[derive(Args, Debug)]
pub struct PurgeArgs {
    /// user, spn or group.
    #[arg(long)]
    pub kind: PrincipalKind,

    /// userName, applicationId or displayName of each record to delete.
    #[arg(required = true, value_name = "NAME")]
    pub names: Vec<String>,

    /// Show what would be deleted without deleting.
    #[arg(long)]
    pub dry_run: bool,

    /// Parallel SCIM workers.
    #[arg(long, default_value_t = DEFAULT_WORKER_THREADS as u32, value_parser = clap::value_parser!(u32).range(1..))]
    pub worker_threads: u32,
}

impl PurgeArgs {
    pub fn run(self, state: &StateArgs) -> Result<()> {
        let databricks = DatabricksSettings::from_env()?;
        let location = state.location()?;
        let caches = NameCaches::open(&location)
            .with_context(|| format!("failed to load name caches from {location}"))?;
        let scim = AccountScimClient::new(
            &databricks.host,
            &databricks.account_id,
            databricks.token_provider(),
        );

        let engine = ReconciliationEngine::new(&scim, &caches)
            .with_retry(RetryPolicy::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY))
            .with_worker_threads(self.worker_threads as usize);
        let deleted = engine
            .delete_if_exists(self.kind, &self.names, self.dry_run)
            .with_context(|| format!("failed to purge {} records", self.kind))?;

        let prefix = if self.dry_run { "[dry-run] " } else { "" };
        let verb = if self.dry_run { "would delete" } else { "deleted" };
        for name in &deleted {
            println!("{prefix}{} {verb} {} {name}", "✓".green(), self.kind);
        }
        let missing = self.names.len() - deleted.len();
        if missing > 0 {
            println!("{prefix}{missing} name(s) not found on the account");
        }
        Ok(())
    }
}
