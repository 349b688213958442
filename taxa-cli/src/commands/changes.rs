//! `taxa changes`: change records of one run.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use taxa_core::{ChangeKind, ChangeRecord, ContentHash, RunId, Settings};

use super::{open_existing_db, status_label};

/// Arguments for `taxa changes`.
#[derive(Args, Debug)]
pub struct ChangesArgs {
    /// Run id as shown by `taxa runs`.
    pub run_id: i64,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct ChangeRow {
    #[tabled(rename = "index")]
    local_index: String,
    #[tabled(rename = "taxon id")]
    taxon_id: String,
    #[tabled(rename = "change")]
    kind: String,
    #[tabled(rename = "previous")]
    previous: String,
    #[tabled(rename = "new")]
    new: String,
}

impl ChangesArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let Some(db) = open_existing_db(settings)? else {
            bail!("no database at {}", settings.db_path.display());
        };
        let run_id = RunId(self.run_id);
        let run = db.run(run_id)?;
        let changes = db.changes(run_id)?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&changes).context("failed to serialize changes JSON")?
            );
            return Ok(());
        }

        println!(
            "run #{} {} | {} change(s)",
            run.run_id,
            status_label(run.status),
            changes.len()
        );
        if changes.is_empty() {
            return Ok(());
        }
        let mut table = Table::new(changes.iter().map(row));
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn row(change: &ChangeRecord) -> ChangeRow {
    ChangeRow {
        local_index: change.local_index.to_string(),
        taxon_id: change.taxon_id.to_string(),
        kind: kind_label(change.kind),
        previous: short(change.previous_hash.as_ref()),
        new: short(change.new_hash.as_ref()),
    }
}

fn kind_label(kind: ChangeKind) -> String {
    match kind {
        ChangeKind::Inserted => kind.as_str().green().to_string(),
        ChangeKind::Updated => kind.as_str().cyan().to_string(),
        ChangeKind::Reactivated => kind.as_str().blue().to_string(),
        ChangeKind::Deactivated => kind.as_str().red().to_string(),
    }
}

fn short(hash: Option<&ContentHash>) -> String {
    hash.map(|h| h.short().to_string()).unwrap_or_else(|| "-".to_string())
}
