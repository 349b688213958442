//! Run ledger: one summary row per pass, one change row per mutated row.
//!
//! Lifecycle of a run row:
//! 1. [`begin_run`] commits an `in_progress` row on its own.
//! 2. [`record_change`] appends inside the pass transaction.
//! 3. [`finalize_run`] writes counts + terminal status; it is the last
//!    statement of the pass transaction, so it commits together with every
//!    authority mutation.
//!
//! A process that dies between 1 and 3 leaves the run `in_progress` and the
//! authority untouched. Finalized runs cannot be updated again (trigger).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use taxa_core::{
    ChangeKind, ChangeRecord, ContentHash, LocalIndex, RunCounts, RunId, RunRecord, RunScope,
    RunStatus, TaxonId,
};

use crate::db::{from_unix, to_unix};
use crate::error::SyncError;

const RUN_COLUMNS: &str = "run_id, started_at, finished_at, status, root_taxon_id, child_count, \
     source_hash, species_count, inserted_count, updated_count, reactivated_count, \
     deactivated_count, unchanged_count";

/// Open a run in `in_progress` state.
pub fn begin_run(conn: &Connection, scope: &RunScope) -> Result<RunId, SyncError> {
    conn.execute(
        "INSERT INTO runs(started_at, status, root_taxon_id, child_count, source_hash)
         VALUES (?1, 'in_progress', ?2, ?3, ?4)",
        params![
            to_unix(Utc::now()),
            scope.root_taxon_id.map(|id| id.0),
            scope.child_count as i64,
            scope.source_hash,
        ],
    )?;
    let run_id = RunId(conn.last_insert_rowid());
    tracing::debug!(%run_id, "run started");
    Ok(run_id)
}

/// Append one change row.
#[allow(clippy::too_many_arguments)]
pub fn record_change(
    conn: &Connection,
    run_id: RunId,
    local_index: LocalIndex,
    taxon_id: TaxonId,
    kind: ChangeKind,
    previous_hash: Option<&ContentHash>,
    new_hash: Option<&ContentHash>,
    at: DateTime<Utc>,
) -> Result<(), SyncError> {
    conn.execute(
        "INSERT INTO changes(run_id, local_index, taxon_id, kind, previous_hash, new_hash, at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run_id.0,
            local_index.0,
            taxon_id.0,
            kind.as_str(),
            previous_hash.map(ContentHash::as_str),
            new_hash.map(ContentHash::as_str),
            to_unix(at),
        ],
    )?;
    Ok(())
}

/// Write counts and terminal status. Fails if the run is already finalized.
pub fn finalize_run(
    conn: &Connection,
    run_id: RunId,
    counts: &RunCounts,
    species_count: u64,
    status: RunStatus,
) -> Result<(), SyncError> {
    let updated = conn.execute(
        "UPDATE runs
         SET finished_at = ?2, status = ?3, species_count = ?4,
             inserted_count = ?5, updated_count = ?6, reactivated_count = ?7,
             deactivated_count = ?8, unchanged_count = ?9
         WHERE run_id = ?1",
        params![
            run_id.0,
            to_unix(Utc::now()),
            status.as_str(),
            species_count as i64,
            counts.inserted as i64,
            counts.updated as i64,
            counts.reactivated as i64,
            counts.deactivated as i64,
            counts.unchanged as i64,
        ],
    )?;
    if updated == 0 {
        return Err(SyncError::RunNotFound(run_id));
    }
    tracing::debug!(%run_id, %status, "run finalized");
    Ok(())
}

pub fn get_run(conn: &Connection, run_id: RunId) -> Result<RunRecord, SyncError> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM runs WHERE run_id = ?1");
    let raw = conn
        .query_row(&sql, params![run_id.0], read_run)
        .optional()?
        .ok_or(SyncError::RunNotFound(run_id))?;
    raw.into_record()
}

/// Most recent runs first.
pub fn list_runs(conn: &Connection, limit: usize) -> Result<Vec<RunRecord>, SyncError> {
    let sql = format!("SELECT {RUN_COLUMNS} FROM runs ORDER BY run_id DESC LIMIT ?1");
    query_runs(conn, &sql, params![limit as i64])
}

pub fn last_run(conn: &Connection) -> Result<Option<RunRecord>, SyncError> {
    Ok(list_runs(conn, 1)?.into_iter().next())
}

/// Newest run that committed its authority changes.
pub fn last_completed_run(conn: &Connection) -> Result<Option<RunRecord>, SyncError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM runs WHERE status = 'completed' ORDER BY run_id DESC LIMIT 1"
    );
    Ok(query_runs(conn, &sql, [])?.into_iter().next())
}

pub fn interrupted_runs(conn: &Connection) -> Result<Vec<RunRecord>, SyncError> {
    let sql = format!(
        "SELECT {RUN_COLUMNS} FROM runs WHERE status = 'in_progress' ORDER BY run_id"
    );
    query_runs(conn, &sql, [])
}

/// Change rows of one run ordered by local index.
pub fn changes_for_run(conn: &Connection, run_id: RunId) -> Result<Vec<ChangeRecord>, SyncError> {
    let mut stmt = conn.prepare(
        "SELECT run_id, local_index, taxon_id, kind, previous_hash, new_hash, at
         FROM changes WHERE run_id = ?1 ORDER BY local_index",
    )?;
    let raws = stmt
        .query_map(params![run_id.0], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, i64>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    raws.into_iter()
        .map(|(run, idx, taxon, kind, prev, new, at)| -> Result<ChangeRecord, SyncError> {
            Ok(ChangeRecord {
                run_id: RunId(run),
                local_index: LocalIndex(idx),
                taxon_id: TaxonId(taxon),
                kind: kind.parse()?,
                previous_hash: prev.map(ContentHash),
                new_hash: new.map(ContentHash),
                at: from_unix(at),
            })
        })
        .collect()
}

/// Total change rows across all runs.
pub fn count_changes(conn: &Connection) -> Result<u64, SyncError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM changes", [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

fn query_runs<P: rusqlite::Params>(
    conn: &Connection,
    sql: &str,
    params: P,
) -> Result<Vec<RunRecord>, SyncError> {
    let mut stmt = conn.prepare(sql)?;
    let raws = stmt
        .query_map(params, read_run)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawRun::into_record).collect()
}

struct RawRun {
    run_id: i64,
    started_at: i64,
    finished_at: Option<i64>,
    status: String,
    root_taxon_id: Option<i64>,
    child_count: i64,
    source_hash: Option<String>,
    species_count: i64,
    counts: [i64; 5],
}

fn read_run(row: &Row<'_>) -> rusqlite::Result<RawRun> {
    Ok(RawRun {
        run_id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        status: row.get(3)?,
        root_taxon_id: row.get(4)?,
        child_count: row.get(5)?,
        source_hash: row.get(6)?,
        species_count: row.get(7)?,
        counts: [row.get(8)?, row.get(9)?, row.get(10)?, row.get(11)?, row.get(12)?],
    })
}

impl RawRun {
    fn into_record(self) -> Result<RunRecord, SyncError> {
        let [inserted, updated, reactivated, deactivated, unchanged] =
            self.counts.map(|n| n.max(0) as u64);
        Ok(RunRecord {
            run_id: RunId(self.run_id),
            started_at: from_unix(self.started_at),
            finished_at: self.finished_at.map(from_unix),
            status: self.status.parse::<RunStatus>()?,
            scope: RunScope {
                root_taxon_id: self.root_taxon_id.map(TaxonId),
                child_count: self.child_count.max(0) as u64,
                source_hash: self.source_hash,
            },
            species_count: self.species_count.max(0) as u64,
            counts: RunCounts {
                inserted,
                updated,
                reactivated,
                deactivated,
                unchanged,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    fn scope() -> RunScope {
        RunScope {
            root_taxon_id: Some(TaxonId(3000188)),
            child_count: 12,
            source_hash: Some("abc".to_string()),
        }
    }

    #[test]
    fn begin_run_opens_in_progress_row() {
        let db = Database::open_in_memory().unwrap();
        let run_id = begin_run(db.conn(), &scope()).unwrap();
        let run = get_run(db.conn(), run_id).unwrap();
        assert_eq!(run.status, RunStatus::InProgress);
        assert!(run.finished_at.is_none());
        assert_eq!(run.scope, scope());
        assert_eq!(interrupted_runs(db.conn()).unwrap().len(), 1);
    }

    #[test]
    fn run_ids_increase() {
        let db = Database::open_in_memory().unwrap();
        let a = begin_run(db.conn(), &scope()).unwrap();
        let b = begin_run(db.conn(), &scope()).unwrap();
        assert!(b > a);
        let listed = list_runs(db.conn(), 10).unwrap();
        assert_eq!(listed[0].run_id, b, "most recent first");
        assert_eq!(last_run(db.conn()).unwrap().unwrap().run_id, b);
    }

    #[test]
    fn finalize_records_counts_once() {
        let db = Database::open_in_memory().unwrap();
        let run_id = begin_run(db.conn(), &scope()).unwrap();
        let counts = RunCounts {
            inserted: 2,
            unchanged: 5,
            ..RunCounts::default()
        };
        finalize_run(db.conn(), run_id, &counts, 7, RunStatus::Completed).unwrap();

        let run = get_run(db.conn(), run_id).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.counts, counts);
        assert_eq!(run.species_count, 7);
        assert!(run.finished_at.is_some());
        assert!(interrupted_runs(db.conn()).unwrap().is_empty());

        let err = finalize_run(db.conn(), run_id, &counts, 7, RunStatus::Failed).unwrap_err();
        assert!(err.to_string().contains("already finalized"), "got: {err}");
    }

    #[test]
    fn last_completed_run_skips_failed_and_open_runs() {
        let db = Database::open_in_memory().unwrap();
        assert!(last_completed_run(db.conn()).unwrap().is_none());

        let done = begin_run(db.conn(), &scope()).unwrap();
        finalize_run(db.conn(), done, &RunCounts::default(), 0, RunStatus::Completed).unwrap();
        let failed = begin_run(db.conn(), &scope()).unwrap();
        finalize_run(db.conn(), failed, &RunCounts::default(), 0, RunStatus::Failed).unwrap();
        begin_run(db.conn(), &scope()).unwrap();

        let run = last_completed_run(db.conn()).unwrap().unwrap();
        assert_eq!(run.run_id, done);
        assert_eq!(run.scope.source_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn finalize_unknown_run_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = finalize_run(
            db.conn(),
            RunId(99),
            &RunCounts::default(),
            0,
            RunStatus::Failed,
        )
        .unwrap_err();
        assert!(matches!(err, SyncError::RunNotFound(RunId(99))));
        assert!(matches!(
            get_run(db.conn(), RunId(99)),
            Err(SyncError::RunNotFound(_))
        ));
    }

    #[test]
    fn changes_are_append_only() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let run_id = begin_run(conn, &scope()).unwrap();
        conn.execute(
            "INSERT INTO authority(local_index, taxon_id, content_hash, state, first_seen_run,
                                   last_changed_run, updated_at, raw_json)
             VALUES (1, 10, 'h', 'active', ?1, ?1, 0, '{}')",
            params![run_id.0],
        )
        .unwrap();
        let hash = ContentHash::from("h");
        record_change(
            conn,
            run_id,
            LocalIndex(1),
            TaxonId(10),
            ChangeKind::Inserted,
            None,
            Some(&hash),
            Utc::now(),
        )
        .unwrap();

        let changes = changes_for_run(conn, run_id).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].kind, ChangeKind::Inserted);
        assert_eq!(changes[0].new_hash.as_ref(), Some(&hash));
        assert!(changes[0].previous_hash.is_none());

        assert!(conn.execute("UPDATE changes SET kind = 'updated'", []).is_err());
        assert!(conn.execute("DELETE FROM changes", []).is_err());
        assert_eq!(count_changes(conn).unwrap(), 1);
    }

    #[test]
    fn one_change_per_row_per_run() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let run_id = begin_run(conn, &scope()).unwrap();
        conn.execute(
            "INSERT INTO authority(local_index, taxon_id, content_hash, state, first_seen_run,
                                   last_changed_run, updated_at, raw_json)
             VALUES (1, 10, 'h', 'active', ?1, ?1, 0, '{}')",
            params![run_id.0],
        )
        .unwrap();
        let now = Utc::now();
        record_change(conn, run_id, LocalIndex(1), TaxonId(10), ChangeKind::Inserted, None, None, now)
            .unwrap();
        assert!(record_change(
            conn,
            run_id,
            LocalIndex(1),
            TaxonId(10),
            ChangeKind::Updated,
            None,
            None,
            now
        )
        .is_err());
    }
}
