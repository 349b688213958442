//! `taxa export`: authority rows as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use taxa_cache::write_atomic;
use taxa_core::Settings;

use super::open_existing_db;

/// Arguments for `taxa export`.
#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Include inactive rows.
    #[arg(long)]
    pub all: bool,

    /// Write to this file instead of stdout.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,
}

impl ExportArgs {
    pub fn run(self, settings: &Settings) -> Result<()> {
        let rows = match open_existing_db(settings)? {
            Some(db) => db.authority_rows(self.all)?,
            None => Vec::new(),
        };
        let json = serde_json::to_string_pretty(&rows).context("failed to serialize rows")?;

        match &self.out {
            Some(path) => {
                write_atomic(path, json.as_bytes(), &path.with_extension("tmp"))
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!(rows = rows.len(), path = %path.display(), "exported");
            }
            None => println!("{json}"),
        }
        Ok(())
    }
}
