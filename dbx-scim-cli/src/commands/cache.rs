//! `dbx-scim cache`: inspect or reset persisted state.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Subcommand;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use dbx_scim_core::{DeltaTokenStore, NameCaches, PrincipalKind};

use super::StateArgs;

#[derive(Subcommand, Debug)]
pub enum CacheCommand {
    /// Show cache sizes and the saved change-feed token.
    Show {
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Empty the name caches (all kinds unless --kind is given).
    Clear {
        #[arg(long)]
        kind: Option<PrincipalKind>,
    },
}

pub fn run(command: CacheCommand, state: &StateArgs) -> Result<()> {
    let location = state.location()?;
    let caches = NameCaches::open(&location)
        .with_context(|| format!("failed to load name caches from {location}"))?;
    match command {
        CacheCommand::Show { json } => {
            let tokens = DeltaTokenStore::open(&location);
            let token = tokens
                .load()
                .with_context(|| format!("failed to read change-feed token from {location}"))?;
            let saved_at = token.as_ref().and_then(|t| t.saved_at);
            let report = CacheReport {
                location: location.to_string(),
                caches: PrincipalKind::ALL
                    .into_iter()
                    .map(|kind| {
                        let cache = caches.for_kind(kind);
                        CacheRow {
                            kind: kind.to_string(),
                            entries: cache.len(),
                            location: cache.location(),
                        }
                    })
                    .collect(),
                delta_token: token.is_some(),
                delta_token_saved_at: saved_at,
            };
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report)
                        .context("failed to serialize cache report")?
                );
            } else {
                print_table(report);
            }
        }
        CacheCommand::Clear { kind } => {
            let kinds = match kind {
                Some(kind) => vec![kind],
                None => PrincipalKind::ALL.to_vec(),
            };
            for kind in kinds {
                let cache = caches.for_kind(kind);
                let count = cache.len();
                cache
                    .clear()
                    .with_context(|| format!("failed to clear {kind} cache"))?;
                println!("{} cleared {kind} cache ({count} entries)", "✓".green());
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct CacheReport {
    location: String,
    caches: Vec<CacheRow>,
    delta_token: bool,
    delta_token_saved_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Tabled)]
struct CacheRow {
    #[tabled(rename = "kind")]
    kind: String,
    #[tabled(rename = "entries")]
    entries: usize,
    #[tabled(rename = "location")]
    location: String,
}

fn print_table(report: CacheReport) {
    println!("State at {}", report.location.bold());
    let mut table = Table::new(report.caches);
    table.with(Style::rounded());
    println!("{table}");
    let token = match (report.delta_token, report.delta_token_saved_at) {
        (false, _) => "none".to_string(),
        (true, None) => "saved (age unknown)".to_string(),
        (true, Some(at)) => format!("saved {} ago", format_age(Utc::now() - at)),
    };
    println!("change-feed token: {token}");
}

fn format_age(age: chrono::Duration) -> String {
    let minutes = age.num_minutes().max(0);
    match minutes {
        0 => "<1m".to_string(),
        1..=59 => format!("{minutes}m"),
        60..=1439 => format!("{}h {}m", minutes / 60, minutes % 60),
        _ => format!("{}d {}h", minutes / 1440, (minutes % 1440) / 60),
    }
}
