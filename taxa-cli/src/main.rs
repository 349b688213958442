//! taxa: keep a local, auditable snapshot of an upstream taxonomy subset.
//!
//! # Usage
//!
//! ```text
//! taxa refresh [--force] [--no-db] [--only-refresh-cache | --only-build-lists] ...
//! taxa status [--json]
//! taxa runs [--limit N] [--json]
//! taxa changes <run_id> [--json]
//! taxa export [--all] [--out FILE]
//! ```
//!
//! Global flags: `--config FILE`, `--db FILE`, `--verbose`, `--quiet`.

mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use commands::{
    changes::ChangesArgs, export::ExportArgs, refresh::RefreshArgs, runs::RunsArgs,
    status::StatusArgs,
};
use logging::Verbosity;
use taxa_core::Settings;

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "taxa",
    version,
    about = "Refresh and audit a local snapshot of the Artdatabanken taxonomy",
    long_about = None,
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Flags accepted by every subcommand.
#[derive(Args, Debug)]
pub struct GlobalArgs {
    /// YAML config file (default: <data root>/taxa.yaml).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// SQLite database path.
    #[arg(long, global = true, value_name = "FILE")]
    pub db: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Warnings and errors only.
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch, cache and consolidate the current upstream species set.
    Refresh(RefreshArgs),

    /// Show the last run, authority counts and interrupted runs.
    Status(StatusArgs),

    /// List recent runs from the ledger.
    Runs(RunsArgs),

    /// List the change records of one run.
    Changes(ChangesArgs),

    /// Dump authority rows as JSON.
    Export(ExportArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = taxa_core::config::load(cli.global.config.as_deref())
        .context("failed to load settings")?;
    if let Some(db) = cli.global.db.clone() {
        settings.db_path = db;
    }

    let verbosity = Verbosity::from_flags(cli.global.verbose, cli.global.quiet);
    let refresh_log = match cli.command {
        Commands::Refresh(_) => Some(&settings),
        _ => None,
    };
    logging::init(verbosity, refresh_log)?;

    run(cli.command, settings)
}

fn run(command: Commands, settings: Settings) -> Result<()> {
    match command {
        Commands::Refresh(args) => args.run(settings),
        Commands::Status(args) => args.run(&settings),
        Commands::Runs(args) => args.run(&settings),
        Commands::Changes(args) => args.run(&settings),
        Commands::Export(args) => args.run(&settings),
    }
}
