//! `taxa status`: last run, authority size and unfinished runs.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use taxa_cache::{staleness::format_age, FsCache};
use taxa_core::{RunRecord, Settings};
use taxa_fetch::SourceRevision;
use taxa_sync::ledger;

use super::{local_time, open_existing_db, status_label};

/// Arguments for `taxa status`.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    database: String,
    database_exists: bool,
    active: u64,
    inactive: u64,
    cached_entries: usize,
    source_revision: Option<SourceRevision>,
    last_run: Option<RunRecord>,
    interrupted_runs: Vec<RunRecord>,
}

impl StatusArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let report = build_report(settings)?;
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("failed to serialize status JSON")?
            );
            return Ok(());
        }
        print_report(&report);
        Ok(())
    }
}

fn build_report(settings: &Settings) -> Result<StatusReport> {
    let cached_entries = FsCache::new(&settings.cache_dir)
        .count_entries()
        .context("failed to scan the cache directory")?;
    let source_revision = SourceRevision::load(&settings.source_revision_path())?;

    let mut report = StatusReport {
        database: settings.db_path.display().to_string(),
        database_exists: false,
        active: 0,
        inactive: 0,
        cached_entries,
        source_revision,
        last_run: None,
        interrupted_runs: Vec::new(),
    };

    let Some(db) = open_existing_db(settings)? else {
        return Ok(report);
    };
    let (active, inactive) = db.state_counts()?;
    report.database_exists = true;
    report.active = active;
    report.inactive = inactive;
    report.last_run = ledger::last_run(db.conn())?;
    report.interrupted_runs = db.interrupted_runs()?;
    Ok(report)
}

fn print_report(report: &StatusReport) {
    println!("taxa v{} | database {}", env!("CARGO_PKG_VERSION"), report.database);
    if !report.database_exists {
        println!("No database yet. Run 'taxa refresh' to create it.");
    }
    println!(
        "authority: {} active | {} inactive | cache: {} entries",
        report.active.to_string().green().bold(),
        report.inactive,
        report.cached_entries
    );

    if let Some(rev) = &report.source_revision {
        println!(
            "source: root {} | {} child ids | checked {} ago",
            rev.root_taxon_id,
            rev.child_count,
            format_age(rev.updated_at, Utc::now())
        );
    }

    match &report.last_run {
        Some(run) => println!(
            "last run: #{} {} at {} (+{} ~{} ^{} -{} ={})",
            run.run_id,
            status_label(run.status),
            local_time(run.started_at),
            run.counts.inserted,
            run.counts.updated,
            run.counts.reactivated,
            run.counts.deactivated,
            run.counts.unchanged,
        ),
        None => println!("last run: never"),
    }

    for run in &report.interrupted_runs {
        println!(
            "{} run #{} started {} never finished",
            "warning:".yellow().bold(),
            run.run_id,
            local_time(run.started_at)
        );
    }
}
