//! Authority table access.
//!
//! Every function takes a `&Connection`; callers inside a consolidation pass
//! hand in the pass's `Transaction` (which derefs to `Connection`).

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use taxa_core::{AuthorityRow, ContentHash, LocalIndex, RowState, RunId, TaxonId};

use crate::accepted::AcceptedRecord;
use crate::db::{from_unix, to_unix};
use crate::error::SyncError;

const ROW_COLUMNS: &str = "local_index, taxon_id, sci_name, swe_name, genus, parent_id, \
     category, type, status, content_hash, state, first_seen_run, last_changed_run, updated_at";

/// Hand out the next local index. Must run inside the transaction that
/// inserts the row, so a rolled-back pass never burns or reuses an index.
pub(crate) fn alloc_local_index(conn: &Connection) -> Result<LocalIndex, SyncError> {
    let next: String = conn.query_row(
        "SELECT value FROM meta WHERE key = 'next_local_index'",
        [],
        |row| row.get(0),
    )?;
    let next: i64 = next.parse().map_err(|_| {
        SyncError::Corrupt(taxa_core::ParseEnumError::new("next_local_index", &next))
    })?;
    conn.execute(
        "UPDATE meta SET value = ?1 WHERE key = 'next_local_index'",
        params![(next + 1).to_string()],
    )?;
    Ok(LocalIndex(next))
}

pub fn get_by_taxon(conn: &Connection, taxon_id: TaxonId) -> Result<Option<AuthorityRow>, SyncError> {
    let sql = format!("SELECT {ROW_COLUMNS} FROM authority WHERE taxon_id = ?1");
    let raw = conn
        .query_row(&sql, params![taxon_id.0], read_row)
        .optional()?;
    raw.map(RawRow::into_row).transpose()
}

/// External ids of every active row.
pub fn active_taxon_ids(conn: &Connection) -> Result<BTreeSet<TaxonId>, SyncError> {
    let mut stmt = conn.prepare("SELECT taxon_id FROM authority WHERE state = 'active'")?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0))?
        .map(|r| r.map(TaxonId))
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(ids)
}

pub fn list_rows(conn: &Connection, include_inactive: bool) -> Result<Vec<AuthorityRow>, SyncError> {
    let filter = if include_inactive {
        ""
    } else {
        "WHERE state = 'active'"
    };
    let sql = format!("SELECT {ROW_COLUMNS} FROM authority {filter} ORDER BY local_index");
    let mut stmt = conn.prepare(&sql)?;
    let raws = stmt
        .query_map([], read_row)?
        .collect::<Result<Vec<_>, _>>()?;
    raws.into_iter().map(RawRow::into_row).collect()
}

pub fn count_in_state(conn: &Connection, state: RowState) -> Result<u64, SyncError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM authority WHERE state = ?1",
        params![state.as_str()],
        |row| row.get(0),
    )?;
    Ok(n.max(0) as u64)
}

pub fn count_rows(conn: &Connection) -> Result<u64, SyncError> {
    let n: i64 = conn.query_row("SELECT COUNT(*) FROM authority", [], |row| row.get(0))?;
    Ok(n.max(0) as u64)
}

/// Insert a brand-new active row and return its freshly allocated index.
pub(crate) fn insert(
    conn: &Connection,
    run_id: RunId,
    incoming: &AcceptedRecord,
    now: DateTime<Utc>,
) -> Result<LocalIndex, SyncError> {
    let local_index = alloc_local_index(conn)?;
    let r = &incoming.record;
    conn.execute(
        "INSERT INTO authority(local_index, taxon_id, sci_name, swe_name, genus, parent_id,
                               category, type, status, content_hash, state,
                               first_seen_run, last_changed_run, updated_at, raw_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'active', ?11, ?11, ?12, ?13)",
        params![
            local_index.0,
            r.taxon_id.0,
            r.scientific_name,
            r.swedish_name,
            r.genus,
            r.parent_id.map(|p| p.0),
            r.category,
            r.taxon_type,
            r.status,
            incoming.hash.as_str(),
            run_id.0,
            to_unix(now),
            incoming.raw_json,
        ],
    )?;
    Ok(local_index)
}

/// Overwrite the mutable fields of an existing row and mark it active.
pub(crate) fn refresh(
    conn: &Connection,
    local_index: LocalIndex,
    run_id: RunId,
    incoming: &AcceptedRecord,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    let r = &incoming.record;
    conn.execute(
        "UPDATE authority
         SET sci_name = ?2, swe_name = ?3, genus = ?4, parent_id = ?5,
             category = ?6, type = ?7, status = ?8, content_hash = ?9,
             state = 'active', last_changed_run = ?10, updated_at = ?11, raw_json = ?12
         WHERE local_index = ?1",
        params![
            local_index.0,
            r.scientific_name,
            r.swedish_name,
            r.genus,
            r.parent_id.map(|p| p.0),
            r.category,
            r.taxon_type,
            r.status,
            incoming.hash.as_str(),
            run_id.0,
            to_unix(now),
            incoming.raw_json,
        ],
    )?;
    Ok(())
}

pub(crate) fn deactivate(
    conn: &Connection,
    local_index: LocalIndex,
    run_id: RunId,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    conn.execute(
        "UPDATE authority
         SET state = 'inactive', last_changed_run = ?2, updated_at = ?3
         WHERE local_index = ?1",
        params![local_index.0, run_id.0, to_unix(now)],
    )?;
    Ok(())
}

struct RawRow {
    local_index: i64,
    taxon_id: i64,
    sci_name: Option<String>,
    swe_name: Option<String>,
    genus: Option<String>,
    parent_id: Option<i64>,
    category: Option<String>,
    taxon_type: Option<String>,
    status: Option<String>,
    content_hash: String,
    state: String,
    first_seen_run: i64,
    last_changed_run: i64,
    updated_at: i64,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok(RawRow {
        local_index: row.get(0)?,
        taxon_id: row.get(1)?,
        sci_name: row.get(2)?,
        swe_name: row.get(3)?,
        genus: row.get(4)?,
        parent_id: row.get(5)?,
        category: row.get(6)?,
        taxon_type: row.get(7)?,
        status: row.get(8)?,
        content_hash: row.get(9)?,
        state: row.get(10)?,
        first_seen_run: row.get(11)?,
        last_changed_run: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

impl RawRow {
    fn into_row(self) -> Result<AuthorityRow, SyncError> {
        Ok(AuthorityRow {
            local_index: LocalIndex(self.local_index),
            taxon_id: TaxonId(self.taxon_id),
            scientific_name: self.sci_name,
            swedish_name: self.swe_name,
            genus: self.genus,
            parent_id: self.parent_id.map(TaxonId),
            category: self.category,
            taxon_type: self.taxon_type,
            status: self.status,
            content_hash: ContentHash(self.content_hash),
            state: self.state.parse()?,
            first_seen_run: RunId(self.first_seen_run),
            last_changed_run: RunId(self.last_changed_run),
            updated_at: from_unix(self.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::db::Database;
    use crate::ledger;
    use taxa_core::RunScope;

    fn record(id: i64, name: &str) -> AcceptedRecord {
        AcceptedRecord::from_payload(
            TaxonId(id),
            &json!({
                "taxonId": id,
                "category": { "value": "Species" },
                "names": [{ "name": name, "isRecommended": true,
                            "category": { "value": "ScientificName" } }]
            }),
        )
        .unwrap()
    }

    #[test]
    fn local_indexes_are_sequential_from_one() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        assert_eq!(alloc_local_index(conn).unwrap(), LocalIndex(1));
        assert_eq!(alloc_local_index(conn).unwrap(), LocalIndex(2));
        assert_eq!(alloc_local_index(conn).unwrap(), LocalIndex(3));
    }

    #[test]
    fn insert_refresh_deactivate_cycle() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let run = ledger::begin_run(conn, &RunScope::default()).unwrap();
        let now = Utc::now();

        let idx = insert(conn, run, &record(10, "Aglais io"), now).unwrap();
        let row = get_by_taxon(conn, TaxonId(10)).unwrap().unwrap();
        assert_eq!(row.local_index, idx);
        assert_eq!(row.state, RowState::Active);
        assert_eq!(row.genus.as_deref(), Some("Aglais"));
        assert_eq!(active_taxon_ids(conn).unwrap().len(), 1);

        deactivate(conn, idx, run, now).unwrap();
        assert!(active_taxon_ids(conn).unwrap().is_empty());
        assert_eq!(count_in_state(conn, RowState::Inactive).unwrap(), 1);

        refresh(conn, idx, run, &record(10, "Inachis io"), now).unwrap();
        let row = get_by_taxon(conn, TaxonId(10)).unwrap().unwrap();
        assert_eq!(row.state, RowState::Active);
        assert_eq!(row.scientific_name.as_deref(), Some("Inachis io"));
        assert_eq!(row.local_index, idx);
    }

    #[test]
    fn rows_cannot_be_deleted_or_renumbered() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let run = ledger::begin_run(conn, &RunScope::default()).unwrap();
        insert(conn, run, &record(10, "Aglais io"), Utc::now()).unwrap();

        assert!(conn.execute("DELETE FROM authority", []).is_err());
        assert!(conn
            .execute("UPDATE authority SET local_index = 99 WHERE taxon_id = 10", [])
            .is_err());
        assert!(conn
            .execute("UPDATE authority SET taxon_id = 11 WHERE taxon_id = 10", [])
            .is_err());
        assert_eq!(count_rows(conn).unwrap(), 1);
    }

    #[test]
    fn duplicate_taxon_id_violates_uniqueness() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let run = ledger::begin_run(conn, &RunScope::default()).unwrap();
        insert(conn, run, &record(10, "a"), Utc::now()).unwrap();
        assert!(insert(conn, run, &record(10, "b"), Utc::now()).is_err());
    }

    #[test]
    fn list_rows_hides_inactive_by_default() {
        let db = Database::open_in_memory().unwrap();
        let conn = db.conn();
        let run = ledger::begin_run(conn, &RunScope::default()).unwrap();
        let now = Utc::now();
        insert(conn, run, &record(1, "a"), now).unwrap();
        let idx = insert(conn, run, &record(2, "b"), now).unwrap();
        deactivate(conn, idx, run, now).unwrap();

        assert_eq!(list_rows(conn, false).unwrap().len(), 1);
        let all = list_rows(conn, true).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].local_index, LocalIndex(1));
        assert_eq!(all[1].state, RowState::Inactive);
    }
}
