//! `taxa refresh`: the full pipeline.
//!
//! ```text
//! find root → child ids → source revision check → cache refresh
//!   → accepted set → species lists → consolidation → source revision write
//! ```
//!
//! The source revision is only written once the requested stages succeed.
//! When the database is part of the run, the fast exit additionally requires
//! the newest completed run to carry the same root and source hash, so a
//! cache warm-up, a `--no-db` run or a failed consolidation never leaves the
//! authority behind the upstream list.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use taxa_cache::{write_atomic, FsCache};
use taxa_core::{RunRecord, RunScope, Settings, TaxonId};
use taxa_fetch::{
    refresh_cache, ArtdatabankenClient, RefreshPolicy, RefreshSummary, SourceRevision,
    TaxonSource,
};
use taxa_sync::{collect_accepted, run_consolidation, AcceptedRecord, Database, SkippedId};

use super::{open_existing_db, status_label};

/// Arguments for `taxa refresh`.
#[derive(Args, Debug, Default)]
pub struct RefreshArgs {
    /// Run even when the upstream id list is unchanged.
    #[arg(long)]
    pub force: bool,

    /// Stop after writing the species lists; leave the database alone.
    #[arg(long)]
    pub no_db: bool,

    /// Only bring the cache up to date.
    #[arg(long, conflicts_with = "only_build_lists")]
    pub only_refresh_cache: bool,

    /// Build lists and consolidate from the cache without fetching documents.
    #[arg(long)]
    pub only_build_lists: bool,

    /// Stop early when the upstream id list is unchanged.
    #[arg(long, conflicts_with = "no_fast_exit")]
    pub fast_exit: bool,

    /// Never stop early.
    #[arg(long)]
    pub no_fast_exit: bool,

    /// Culture for upstream names (e.g. sv_SE).
    #[arg(long)]
    pub culture: Option<String>,

    /// Refetch cached entries older than this; 0 = never expire.
    #[arg(long, value_name = "SECONDS")]
    pub ttl_seconds: Option<u64>,

    /// Ids per POST request.
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// HTTP timeout.
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,
}

impl RefreshArgs {
    pub fn run(self, settings: Settings) -> Result<()> {
        let settings = self.apply(settings)?;
        let client = ArtdatabankenClient::from_settings(&settings)?;
        tracing::info!("=== taxa refresh started ===");
        let report = execute(&client, &settings, &self.stages())?;
        print_report(&report);
        tracing::info!("=== taxa refresh finished ===");
        Ok(())
    }

    /// Layer command-line flags over the loaded settings.
    fn apply(&self, mut settings: Settings) -> Result<Settings> {
        if let Some(culture) = &self.culture {
            settings.culture = culture.clone();
        }
        if let Some(ttl) = self.ttl_seconds {
            settings.cache_ttl_seconds = ttl;
        }
        if let Some(n) = self.batch_size {
            if n == 0 {
                bail!("--batch-size must be at least 1");
            }
            settings.post_batch_size = n;
        }
        if let Some(timeout) = self.timeout {
            settings.http_timeout_seconds = timeout;
        }
        if let Some(dir) = &self.cache_dir {
            settings.cache_dir = dir.clone();
        }
        if self.fast_exit {
            settings.fast_exit = true;
        }
        if self.no_fast_exit {
            settings.fast_exit = false;
        }
        Ok(settings)
    }

    fn stages(&self) -> Stages {
        Stages {
            force: self.force,
            no_db: self.no_db,
            only_refresh_cache: self.only_refresh_cache,
            only_build_lists: self.only_build_lists,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Stages {
    pub force: bool,
    pub no_db: bool,
    pub only_refresh_cache: bool,
    pub only_build_lists: bool,
}

/// Where the pipeline stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Ending {
    FastExit,
    CacheOnly,
    ListsOnly,
    Consolidated,
}

#[derive(Debug)]
pub(crate) struct RefreshReport {
    pub root: TaxonId,
    pub child_count: usize,
    pub source_unchanged: bool,
    pub ending: Ending,
    pub cache: Option<RefreshSummary>,
    pub species: usize,
    pub rejected: usize,
    pub missing: usize,
    pub skipped: Vec<SkippedId>,
    pub written: Vec<PathBuf>,
    pub run: Option<RunRecord>,
}

pub(crate) fn execute<S: TaxonSource + ?Sized>(
    source: &S,
    settings: &Settings,
    stages: &Stages,
) -> Result<RefreshReport> {
    let root = source
        .find_root(&settings.root_taxon, &settings.culture)
        .with_context(|| format!("failed to resolve root taxon '{}'", settings.root_taxon))?;
    let child_ids = source
        .child_ids(root)
        .with_context(|| format!("failed to list child ids of {root}"))?;
    tracing::info!(root_taxon_id = %root, child_ids = child_ids.len(), "upstream reachable");

    let revision = SourceRevision::new(root, &child_ids, Utc::now());
    let revision_path = settings.source_revision_path();
    let previous = SourceRevision::load(&revision_path)?;
    let source_unchanged = previous.is_some_and(|prev| prev.matches(&revision));

    let mut report = RefreshReport {
        root,
        child_count: child_ids.len(),
        source_unchanged,
        ending: Ending::FastExit,
        cache: None,
        species: 0,
        rejected: 0,
        missing: 0,
        skipped: Vec::new(),
        written: Vec::new(),
        run: None,
    };

    if source_unchanged {
        tracing::info!("source revision unchanged (root + child ids)");
        if settings.fast_exit && !stages.force {
            let uses_db = !stages.no_db && !stages.only_refresh_cache;
            if !uses_db || authority_matches(settings, &revision)? {
                tracing::info!("fast exit; use --force or --no-fast-exit to override");
                return Ok(report);
            }
            tracing::info!("database has no completed run for this revision; consolidating");
        }
    }

    let mut cache = FsCache::new(&settings.cache_dir);
    if !stages.only_build_lists {
        let policy = RefreshPolicy::from_settings(settings);
        let summary = refresh_cache(source, &mut cache, &child_ids, &policy)
            .context("cache refresh failed")?;
        report.cache = Some(summary);
    }
    if stages.only_refresh_cache {
        save_revision(&revision, &revision_path)?;
        report.ending = Ending::CacheOnly;
        return Ok(report);
    }

    let accepted = collect_accepted(&cache, &child_ids, &settings.filter)?;
    report.species = accepted.len();
    report.rejected = accepted.rejected;
    report.missing = accepted.missing.len();
    report.skipped = accepted.skipped.clone();
    report.written = write_species_lists(settings, root, &accepted.records)?;

    if stages.no_db {
        save_revision(&revision, &revision_path)?;
        report.ending = Ending::ListsOnly;
        return Ok(report);
    }

    let mut db = Database::open(&settings.db_path)
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;
    for stale in db.interrupted_runs()? {
        tracing::warn!(run_id = %stale.run_id, "earlier run never finished; its changes were not applied");
    }
    let scope = RunScope {
        root_taxon_id: Some(root),
        child_count: child_ids.len() as u64,
        source_hash: Some(revision.source_hash.clone()),
    };
    let run = run_consolidation(&mut db, &scope, &accepted.records)
        .context("consolidation failed; the run was rolled back and marked failed")?;
    report.run = Some(run);

    save_revision(&revision, &revision_path)?;
    report.ending = Ending::Consolidated;
    Ok(report)
}

/// Whether the newest completed run consolidated exactly this revision.
fn authority_matches(settings: &Settings, revision: &SourceRevision) -> Result<bool> {
    let Some(db) = open_existing_db(settings)? else {
        return Ok(false);
    };
    Ok(db.last_completed_run()?.is_some_and(|run| {
        run.scope.root_taxon_id == Some(revision.root_taxon_id)
            && run.scope.source_hash.as_deref() == Some(revision.source_hash.as_str())
    }))
}

fn save_revision(revision: &SourceRevision, path: &Path) -> Result<()> {
    revision
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

// ---------------------------------------------------------------------------
// Species lists
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeciesIds {
    root_taxon_id: TaxonId,
    species_taxon_ids: Vec<TaxonId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeciesTable<'a> {
    root_taxon_id: TaxonId,
    species: Vec<SpeciesEntry<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeciesEntry<'a> {
    taxon_id: TaxonId,
    scientific_name: Option<&'a str>,
    swedish_name: Option<&'a str>,
    genus: Option<&'a str>,
    category: Option<&'a str>,
    #[serde(rename = "type")]
    taxon_type: Option<&'a str>,
    status: Option<&'a str>,
}

fn write_species_lists(
    settings: &Settings,
    root: TaxonId,
    records: &[AcceptedRecord],
) -> Result<Vec<PathBuf>> {
    let ids = SpeciesIds {
        root_taxon_id: root,
        species_taxon_ids: records.iter().map(AcceptedRecord::taxon_id).collect(),
    };
    let table = SpeciesTable {
        root_taxon_id: root,
        species: records
            .iter()
            .map(|a| SpeciesEntry {
                taxon_id: a.record.taxon_id,
                scientific_name: a.record.scientific_name.as_deref(),
                swedish_name: a.record.swedish_name.as_deref(),
                genus: a.record.genus.as_deref(),
                category: a.record.category.as_deref(),
                taxon_type: a.record.taxon_type.as_deref(),
                status: a.record.status.as_deref(),
            })
            .collect(),
    };

    let ids_path = settings.species_ids_path();
    let table_path = settings.species_table_path();
    write_json(&ids_path, &ids)?;
    write_json(&table_path, &table)?;
    tracing::info!(ids = %ids_path.display(), table = %table_path.display(), "species lists written");
    Ok(vec![ids_path, table_path])
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_atomic(path, json.as_bytes(), &path.with_extension("json.tmp"))
        .with_context(|| format!("failed to write {}", path.display()))
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Tabled)]
struct SkippedRow {
    #[tabled(rename = "taxon id")]
    taxon_id: TaxonId,
    #[tabled(rename = "reason")]
    reason: String,
}

fn print_report(report: &RefreshReport) {
    println!(
        "root taxon {} | {} child ids | source {}",
        report.root,
        report.child_count,
        if report.source_unchanged {
            "unchanged".to_string()
        } else {
            "changed".yellow().to_string()
        }
    );

    if report.ending == Ending::FastExit {
        println!("Nothing to do (fast exit). Use --force to refresh anyway.");
        return;
    }

    if let Some(cache) = &report.cache {
        println!(
            "cache: {} missing before | {} fresh | {} requested | {} fetched | {} not found",
            cache.missing_before, cache.fresh_before, cache.requested, cache.fetched_ok, cache.not_found
        );
    }
    if report.ending == Ending::CacheOnly {
        return;
    }

    println!(
        "species: {} accepted | {} filtered out | {} missing | {} unreadable",
        report.species.to_string().bold(),
        report.rejected,
        report.missing,
        report.skipped.len()
    );
    for path in &report.written {
        println!("wrote {}", path.display());
    }

    if !report.skipped.is_empty() {
        println!("{}", "Excluded because the cached document could not be read:".yellow());
        let rows: Vec<SkippedRow> = report
            .skipped
            .iter()
            .map(|s| SkippedRow {
                taxon_id: s.taxon_id,
                reason: s.reason.clone(),
            })
            .collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
    }

    match &report.run {
        Some(run) => println!(
            "run {} {}: +{} inserted  ~{} updated  ^{} reactivated  -{} deactivated  ={} unchanged",
            run.run_id,
            status_label(run.status),
            run.counts.inserted,
            run.counts.updated,
            run.counts.reactivated,
            run.counts.deactivated,
            run.counts.unchanged,
        ),
        None => println!("database: skipped (--no-db)"),
    }
}
