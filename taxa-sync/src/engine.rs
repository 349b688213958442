//! Consolidation engine.
//!
//! One pass reconciles the accepted set against the authority table:
//!
//! ```text
//! prior row         accepted?  hash       action
//! ---------------   ---------  ---------  -------------------------------
//! absent            yes        -          insert, next local index
//! active            yes        unchanged  nothing (counted as unchanged)
//! active            yes        changed    update fields
//! inactive          yes        any        reactivate (+ update fields)
//! active            no         -          deactivate
//! inactive          no         -          nothing
//! ```
//!
//! The pass walks `accepted ∪ active` in taxon-id order, so rows that
//! vanished upstream are deactivated and new rows get indexes in a
//! deterministic order. All mutations, change rows and the run's final
//! status commit in a single transaction.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use taxa_cache::digest::{self, Classification};
use taxa_core::{
    AuthorityRow, ChangeKind, ContentHash, RowState, RunCounts, RunId, RunRecord, RunScope,
    RunStatus, TaxonId,
};

use crate::accepted::AcceptedRecord;
use crate::db::Database;
use crate::error::SyncError;
use crate::{authority, ledger};

/// What the pass does to one taxon id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Insert,
    Update,
    Reactivate,
    Deactivate,
    Unchanged,
    /// Inactive and still absent.
    Ignore,
}

impl Transition {
    /// The change row written for this transition, if any.
    pub fn change_kind(self) -> Option<ChangeKind> {
        match self {
            Transition::Insert => Some(ChangeKind::Inserted),
            Transition::Update => Some(ChangeKind::Updated),
            Transition::Reactivate => Some(ChangeKind::Reactivated),
            Transition::Deactivate => Some(ChangeKind::Deactivated),
            Transition::Unchanged | Transition::Ignore => None,
        }
    }
}

/// Decide the transition for one id from its prior row (state and hash) and
/// the incoming hash when the id is in the accepted set.
///
/// A reactivation whose content also changed is still a single
/// `Reactivate`; the change row carries both hashes.
pub fn transition(
    prior: Option<(RowState, &ContentHash)>,
    incoming: Option<&ContentHash>,
) -> Transition {
    match (prior, incoming) {
        (None, Some(_)) => Transition::Insert,
        (None, None) => Transition::Ignore,
        (Some((RowState::Inactive, _)), Some(_)) => Transition::Reactivate,
        (Some((RowState::Inactive, _)), None) => Transition::Ignore,
        (Some((RowState::Active, _)), None) => Transition::Deactivate,
        (Some((RowState::Active, prev)), Some(new)) => match digest::classify(Some(prev), new) {
            Classification::Unchanged => Transition::Unchanged,
            Classification::ContentChanged | Classification::New => Transition::Update,
        },
    }
}

/// Run one consolidation pass and return the finalized run.
///
/// On failure the pass is rolled back, the run is marked failed and the
/// original error is returned.
pub fn run_consolidation(
    db: &mut Database,
    scope: &RunScope,
    accepted: &[AcceptedRecord],
) -> Result<RunRecord, SyncError> {
    let run_id = ledger::begin_run(db.conn(), scope)?;
    tracing::info!(%run_id, accepted = accepted.len(), "consolidation started");

    if let Err(err) = consolidate(db.conn_mut(), run_id, accepted) {
        tracing::error!(%run_id, error = %err, "consolidation failed, rolled back");
        if let Err(mark_err) = ledger::finalize_run(
            db.conn(),
            run_id,
            &RunCounts::default(),
            0,
            RunStatus::Failed,
        ) {
            tracing::warn!(%run_id, error = %mark_err, "could not mark run as failed");
        }
        return Err(err);
    }

    let run = db.run(run_id)?;
    tracing::info!(
        %run_id,
        inserted = run.counts.inserted,
        updated = run.counts.updated,
        reactivated = run.counts.reactivated,
        deactivated = run.counts.deactivated,
        unchanged = run.counts.unchanged,
        "consolidation completed"
    );
    Ok(run)
}

fn consolidate(
    conn: &mut Connection,
    run_id: RunId,
    accepted: &[AcceptedRecord],
) -> Result<(), SyncError> {
    let tx = conn.transaction()?;
    let now = Utc::now();

    let incoming = index_by_taxon(accepted);
    let mut ids: BTreeSet<TaxonId> = incoming.keys().copied().collect();
    ids.extend(authority::active_taxon_ids(&tx)?);

    let mut counts = RunCounts::default();
    for id in ids {
        let prior = authority::get_by_taxon(&tx, id)?;
        let next = incoming.get(&id).copied();
        let step = transition(
            prior.as_ref().map(|row| (row.state, &row.content_hash)),
            next.map(|rec| &rec.hash),
        );
        apply(&tx, run_id, step, prior.as_ref(), next, now)?;
        match step.change_kind() {
            Some(kind) => counts.record(kind),
            None if step == Transition::Unchanged => counts.unchanged += 1,
            None => {}
        }
    }

    ledger::finalize_run(
        &tx,
        run_id,
        &counts,
        incoming.len() as u64,
        RunStatus::Completed,
    )?;
    tx.commit()?;
    Ok(())
}

/// First occurrence wins when the same id is accepted twice.
fn index_by_taxon(accepted: &[AcceptedRecord]) -> BTreeMap<TaxonId, &AcceptedRecord> {
    let mut incoming = BTreeMap::new();
    for record in accepted {
        if incoming.contains_key(&record.taxon_id()) {
            tracing::warn!(taxon_id = %record.taxon_id(), "duplicate id in accepted set, ignoring");
            continue;
        }
        incoming.insert(record.taxon_id(), record);
    }
    incoming
}

fn apply(
    conn: &Connection,
    run_id: RunId,
    step: Transition,
    prior: Option<&AuthorityRow>,
    incoming: Option<&AcceptedRecord>,
    now: DateTime<Utc>,
) -> Result<(), SyncError> {
    match (step, prior, incoming) {
        (Transition::Insert, None, Some(rec)) => {
            let local_index = authority::insert(conn, run_id, rec, now)?;
            tracing::debug!(taxon_id = %rec.taxon_id(), %local_index, "inserted");
            ledger::record_change(
                conn,
                run_id,
                local_index,
                rec.taxon_id(),
                ChangeKind::Inserted,
                None,
                Some(&rec.hash),
                now,
            )
        }
        (Transition::Update | Transition::Reactivate, Some(row), Some(rec)) => {
            authority::refresh(conn, row.local_index, run_id, rec, now)?;
            let kind = if step == Transition::Reactivate {
                ChangeKind::Reactivated
            } else {
                ChangeKind::Updated
            };
            tracing::debug!(taxon_id = %row.taxon_id, local_index = %row.local_index, %kind, "refreshed");
            ledger::record_change(
                conn,
                run_id,
                row.local_index,
                row.taxon_id,
                kind,
                Some(&row.content_hash),
                Some(&rec.hash),
                now,
            )
        }
        (Transition::Deactivate, Some(row), None) => {
            authority::deactivate(conn, row.local_index, run_id, now)?;
            tracing::debug!(taxon_id = %row.taxon_id, local_index = %row.local_index, "deactivated");
            ledger::record_change(
                conn,
                run_id,
                row.local_index,
                row.taxon_id,
                ChangeKind::Deactivated,
                Some(&row.content_hash),
                Some(&row.content_hash),
                now,
            )
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn h(s: &str) -> ContentHash {
        ContentHash::from(s)
    }

    #[rstest]
    #[case(None, Some("a"), Transition::Insert)]
    #[case(None, None, Transition::Ignore)]
    #[case(Some((RowState::Active, "a")), Some("a"), Transition::Unchanged)]
    #[case(Some((RowState::Active, "a")), Some("b"), Transition::Update)]
    #[case(Some((RowState::Active, "a")), None, Transition::Deactivate)]
    #[case(Some((RowState::Inactive, "a")), Some("a"), Transition::Reactivate)]
    #[case(Some((RowState::Inactive, "a")), Some("b"), Transition::Reactivate)]
    #[case(Some((RowState::Inactive, "a")), None, Transition::Ignore)]
    fn transition_table(
        #[case] prior: Option<(RowState, &str)>,
        #[case] incoming: Option<&str>,
        #[case] expected: Transition,
    ) {
        let prior_hash = prior.map(|(_, s)| h(s));
        let incoming_hash = incoming.map(h);
        let prior = prior.zip(prior_hash.as_ref()).map(|((state, _), hash)| (state, hash));
        assert_eq!(transition(prior, incoming_hash.as_ref()), expected);
    }

    #[test]
    fn only_mutations_have_change_kinds() {
        assert_eq!(Transition::Insert.change_kind(), Some(ChangeKind::Inserted));
        assert_eq!(Transition::Unchanged.change_kind(), None);
        assert_eq!(Transition::Ignore.change_kind(), None);
    }
}
