pub mod changes;
pub mod export;
pub mod refresh;
pub mod runs;
pub mod status;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use colored::Colorize;

use taxa_core::{RunStatus, Settings};
use taxa_sync::Database;

/// Open the configured database, or `None` when no refresh has created it yet.
pub(crate) fn open_existing_db(settings: &Settings) -> Result<Option<Database>> {
    if !settings.db_path.exists() {
        return Ok(None);
    }
    let db = Database::open(&settings.db_path)
        .with_context(|| format!("failed to open {}", settings.db_path.display()))?;
    Ok(Some(db))
}

pub(crate) fn status_label(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => "completed".green().to_string(),
        RunStatus::Failed => "failed".red().bold().to_string(),
        RunStatus::InProgress => "in progress".yellow().to_string(),
    }
}

pub(crate) fn local_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}
