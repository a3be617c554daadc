//! dbx-scim: converge Databricks account principals with Azure AD groups.
//!
//! # Usage
//!
//! ```text
//! dbx-scim sync --groups-file groups.yml [--full-sync] [--group-search-depth N]
//!               [--dry-run-security-principals] [--dry-run-members]
//!               [--save-graph-response-json PATH] [--query-graph-only]
//!               [--report-json PATH]
//! dbx-scim cache show
//! dbx-scim cache clear [--kind user|spn|group]
//! dbx-scim purge --kind user|spn|group <name>... [--dry-run]
//! ```
//!
//! Connection settings are read from the environment, see [`config`].

mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{cache::CacheCommand, purge::PurgeArgs, sync::SyncArgs, StateArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "dbx-scim",
    version,
    about = "Sync Azure AD groups, users and service principals into a Databricks account",
    long_about = None,
)]
struct Cli {
    /// Debug logging for dbx-scim itself.
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Debug logging for everything, HTTP client included.
    #[arg(long, global = true)]
    debug: bool,

    #[command(flatten)]
    state: StateArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile principals and memberships for the configured groups.
    Sync(SyncArgs),

    /// Inspect or reset the persisted name caches.
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },

    /// Delete named principals from the account.
    Purge(PurgeArgs),
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

const WORKSPACE_TARGETS: [&str; 4] = ["dbx_scim_core", "dbx_scim_graph", "dbx_scim_sync", "dbx_scim"];

fn filter_directives(verbose: bool, debug: bool) -> String {
    if debug {
        return "debug".to_string();
    }
    let mut directives = vec!["info".to_string()];
    if verbose {
        directives.extend(WORKSPACE_TARGETS.iter().map(|t| format!("{t}=debug")));
    }
    directives.join(",")
}

fn init_tracing(verbose: bool, debug: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(verbose, debug)));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_writer(std::io::stderr)
        .try_init();
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.debug);
    match cli.command {
        Commands::Sync(args) => args.run(&cli.state),
        Commands::Cache { command } => commands::cache::run(command, &cli.state),
        Commands::Purge(args) => args.run(&cli.state),
    }
}
