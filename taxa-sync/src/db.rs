//! SQLite persistence for the authority table and the run ledger.
//!
//! # Tables
//!
//! ```text
//! meta       key/value: schema_version, next_local_index
//! runs       one row per consolidation pass
//! authority  one row per local index (never deleted)
//! changes    one row per mutated authority row per run (append-only)
//! ```
//!
//! Append-only and no-delete rules are enforced with triggers so that a bug
//! in the engine aborts the surrounding transaction instead of rewriting
//! history.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use taxa_core::{AuthorityRow, ChangeRecord, RowState, RunId, RunRecord, TaxonId};

use crate::error::{io_err, SyncError};
use crate::{authority, ledger};

pub const SCHEMA_VERSION: &str = "1";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS runs (
    run_id            INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at        INTEGER NOT NULL,
    finished_at       INTEGER,
    status            TEXT    NOT NULL DEFAULT 'in_progress'
                      CHECK (status IN ('in_progress', 'completed', 'failed')),
    root_taxon_id     INTEGER,
    child_count       INTEGER NOT NULL DEFAULT 0,
    source_hash       TEXT,
    species_count     INTEGER NOT NULL DEFAULT 0,
    inserted_count    INTEGER NOT NULL DEFAULT 0,
    updated_count     INTEGER NOT NULL DEFAULT 0,
    reactivated_count INTEGER NOT NULL DEFAULT 0,
    deactivated_count INTEGER NOT NULL DEFAULT 0,
    unchanged_count   INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS authority (
    local_index      INTEGER PRIMARY KEY,
    taxon_id         INTEGER NOT NULL UNIQUE,
    sci_name         TEXT,
    swe_name         TEXT,
    genus            TEXT,
    parent_id        INTEGER,
    category         TEXT,
    type             TEXT,
    status           TEXT,
    content_hash     TEXT    NOT NULL,
    state            TEXT    NOT NULL CHECK (state IN ('active', 'inactive')),
    first_seen_run   INTEGER NOT NULL REFERENCES runs(run_id),
    last_changed_run INTEGER NOT NULL REFERENCES runs(run_id),
    updated_at       INTEGER NOT NULL,
    raw_json         TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_authority_state ON authority(state);
CREATE INDEX IF NOT EXISTS idx_authority_sci_name ON authority(sci_name);

CREATE TABLE IF NOT EXISTS changes (
    run_id        INTEGER NOT NULL REFERENCES runs(run_id),
    local_index   INTEGER NOT NULL REFERENCES authority(local_index),
    taxon_id      INTEGER NOT NULL,
    kind          TEXT    NOT NULL
                  CHECK (kind IN ('inserted', 'updated', 'reactivated', 'deactivated')),
    previous_hash TEXT,
    new_hash      TEXT,
    at            INTEGER NOT NULL,
    PRIMARY KEY (run_id, local_index)
);

CREATE TRIGGER IF NOT EXISTS authority_never_deleted
BEFORE DELETE ON authority
BEGIN
    SELECT RAISE(ABORT, 'authority rows are never deleted');
END;

CREATE TRIGGER IF NOT EXISTS authority_identity_immutable
BEFORE UPDATE OF local_index, taxon_id ON authority
WHEN NEW.local_index IS NOT OLD.local_index OR NEW.taxon_id IS NOT OLD.taxon_id
BEGIN
    SELECT RAISE(ABORT, 'local index and taxon id are immutable');
END;

CREATE TRIGGER IF NOT EXISTS changes_no_update
BEFORE UPDATE ON changes
BEGIN
    SELECT RAISE(ABORT, 'changes are append-only');
END;

CREATE TRIGGER IF NOT EXISTS changes_no_delete
BEFORE DELETE ON changes
BEGIN
    SELECT RAISE(ABORT, 'changes are append-only');
END;

CREATE TRIGGER IF NOT EXISTS runs_no_delete
BEFORE DELETE ON runs
BEGIN
    SELECT RAISE(ABORT, 'runs are append-only');
END;

CREATE TRIGGER IF NOT EXISTS runs_finalize_once
BEFORE UPDATE ON runs
WHEN OLD.status <> 'in_progress'
BEGIN
    SELECT RAISE(ABORT, 'run already finalized');
END;
";

/// Handle on the authority + ledger database.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=2500;",
        )?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Fresh private database, used by tests.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> Result<Self, SyncError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO meta(key, value) VALUES ('next_local_index', '1')",
            [],
        )?;

        let found: Option<String> = conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .optional()?;
        match found {
            Some(v) if v == SCHEMA_VERSION => {}
            other => {
                return Err(SyncError::SchemaVersion {
                    found: other.unwrap_or_default(),
                    expected: SCHEMA_VERSION,
                })
            }
        }

        Ok(Self { conn, path })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub(crate) fn conn_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    // -- Read access for reporting / export ---------------------------------

    pub fn authority_row(&self, taxon_id: TaxonId) -> Result<Option<AuthorityRow>, SyncError> {
        authority::get_by_taxon(&self.conn, taxon_id)
    }

    /// Authority rows ordered by local index; inactive rows only when asked.
    pub fn authority_rows(&self, include_inactive: bool) -> Result<Vec<AuthorityRow>, SyncError> {
        authority::list_rows(&self.conn, include_inactive)
    }

    /// `(active, inactive)` row counts.
    pub fn state_counts(&self) -> Result<(u64, u64), SyncError> {
        Ok((
            authority::count_in_state(&self.conn, RowState::Active)?,
            authority::count_in_state(&self.conn, RowState::Inactive)?,
        ))
    }

    pub fn run(&self, run_id: RunId) -> Result<RunRecord, SyncError> {
        ledger::get_run(&self.conn, run_id)
    }

    /// Most recent runs first.
    pub fn runs(&self, limit: usize) -> Result<Vec<RunRecord>, SyncError> {
        ledger::list_runs(&self.conn, limit)
    }

    pub fn last_completed_run(&self) -> Result<Option<RunRecord>, SyncError> {
        ledger::last_completed_run(&self.conn)
    }

    pub fn changes(&self, run_id: RunId) -> Result<Vec<ChangeRecord>, SyncError> {
        ledger::changes_for_run(&self.conn, run_id)
    }

    /// Runs that never reached a terminal status (process died mid-pass).
    pub fn interrupted_runs(&self) -> Result<Vec<RunRecord>, SyncError> {
        ledger::interrupted_runs(&self.conn)
    }
}

pub(crate) fn to_unix(ts: DateTime<Utc>) -> i64 {
    ts.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}
