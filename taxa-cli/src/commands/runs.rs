//! `taxa runs`: the run ledger, most recent first.

use anyhow::{Context, Result};
use clap::Args;
use tabled::{settings::Style, Table, Tabled};

use taxa_core::{RunRecord, Settings};

use super::{local_time, open_existing_db, status_label};

/// Arguments for `taxa runs`.
#[derive(Args, Debug)]
pub struct RunsArgs {
    /// Number of runs to show.
    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RunRow {
    #[tabled(rename = "run")]
    run_id: String,
    #[tabled(rename = "started")]
    started: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "species")]
    species: u64,
    #[tabled(rename = "+ins")]
    inserted: u64,
    #[tabled(rename = "~upd")]
    updated: u64,
    #[tabled(rename = "^react")]
    reactivated: u64,
    #[tabled(rename = "-deact")]
    deactivated: u64,
    #[tabled(rename = "=same")]
    unchanged: u64,
}

impl RunsArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let runs = match open_existing_db(settings)? {
            Some(db) => db.runs(self.limit)?,
            None => Vec::new(),
        };

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&runs).context("failed to serialize runs JSON")?
            );
            return Ok(());
        }

        if runs.is_empty() {
            println!("No runs recorded.");
            return Ok(());
        }
        let mut table = Table::new(runs.iter().map(row));
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(run: &RunRecord) -> RunRow {
    RunRow {
        run_id: run.run_id.to_string(),
        started: local_time(run.started_at),
        status: status_label(run.status),
        species: run.species_count,
        inserted: run.counts.inserted,
        updated: run.counts.updated,
        reactivated: run.counts.reactivated,
        deactivated: run.counts.deactivated,
        unchanged: run.counts.unchanged,
    }
}
