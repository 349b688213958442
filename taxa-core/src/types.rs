//! Domain types shared by the cache, the consolidation engine and the CLI.
//!
//! Identifiers are newtypes over the integer the upstream (or the local
//! database) hands out, so a `TaxonId` can never be passed where a
//! `LocalIndex` is expected.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identifier assigned by the upstream taxonomy service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxonId(pub i64);

impl fmt::Display for TaxonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<i64> for TaxonId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Permanent, sequential identifier owned by the local authority table.
///
/// Assigned once per external id, starting at 1, and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalIndex(pub i64);

impl fmt::Display for LocalIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ledger identifier for one consolidation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub i64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Lowercase hex SHA-256 of a normalized payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(pub String);

impl ContentHash {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for log lines and tables.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ContentHash {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContentHash {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Outcome of an upstream fetch for a single id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Found,
    NotFound,
}

impl FetchStatus {
    /// HTTP-style status code, as shown in reports.
    pub fn code(self) -> u16 {
        match self {
            FetchStatus::Found => 200,
            FetchStatus::NotFound => 404,
        }
    }
}

/// Soft-delete state of an authority row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowState {
    Active,
    Inactive,
}

impl RowState {
    pub fn as_str(self) -> &'static str {
        match self {
            RowState::Active => "active",
            RowState::Inactive => "inactive",
        }
    }

    pub fn is_active(self) -> bool {
        matches!(self, RowState::Active)
    }
}

impl fmt::Display for RowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RowState {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(RowState::Active),
            "inactive" => Ok(RowState::Inactive),
            other => Err(ParseEnumError::new("row state", other)),
        }
    }
}

/// Kind of mutation recorded in the change ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Inserted,
    Updated,
    Reactivated,
    Deactivated,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Inserted => "inserted",
            ChangeKind::Updated => "updated",
            ChangeKind::Reactivated => "reactivated",
            ChangeKind::Deactivated => "deactivated",
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inserted" => Ok(ChangeKind::Inserted),
            "updated" => Ok(ChangeKind::Updated),
            "reactivated" => Ok(ChangeKind::Reactivated),
            "deactivated" => Ok(ChangeKind::Deactivated),
            other => Err(ParseEnumError::new("change kind", other)),
        }
    }
}

/// Terminal (or not yet terminal) status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RunStatus::InProgress)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(ParseEnumError::new("run status", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// Per-run accumulator returned from a consolidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
    pub inserted: u64,
    pub updated: u64,
    pub reactivated: u64,
    pub deactivated: u64,
    pub unchanged: u64,
}

impl RunCounts {
    /// Bump the counter matching `kind`.
    pub fn record(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::Inserted => self.inserted += 1,
            ChangeKind::Updated => self.updated += 1,
            ChangeKind::Reactivated => self.reactivated += 1,
            ChangeKind::Deactivated => self.deactivated += 1,
        }
    }

    /// Number of rows mutated (equals the number of change records).
    pub fn changed(&self) -> u64 {
        self.inserted + self.updated + self.reactivated + self.deactivated
    }
}

/// Provenance of a run: which upstream snapshot it consolidated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunScope {
    pub root_taxon_id: Option<TaxonId>,
    pub child_count: u64,
    pub source_hash: Option<String>,
}

/// One persistent row of the local authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityRow {
    pub local_index: LocalIndex,
    pub taxon_id: TaxonId,
    pub scientific_name: Option<String>,
    pub swedish_name: Option<String>,
    pub genus: Option<String>,
    pub parent_id: Option<TaxonId>,
    pub category: Option<String>,
    pub taxon_type: Option<String>,
    pub status: Option<String>,
    pub content_hash: ContentHash,
    pub state: RowState,
    pub first_seen_run: RunId,
    pub last_changed_run: RunId,
    pub updated_at: DateTime<Utc>,
}

/// Ledger summary row for one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub scope: RunScope,
    pub species_count: u64,
    pub counts: RunCounts,
}

/// Ledger row for one mutated authority row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub run_id: RunId,
    pub local_index: LocalIndex,
    pub taxon_id: TaxonId,
    pub kind: ChangeKind,
    pub previous_hash: Option<ContentHash>,
    pub new_hash: Option<ContentHash>,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_strings_round_trip_through_from_str() {
        for kind in [
            ChangeKind::Inserted,
            ChangeKind::Updated,
            ChangeKind::Reactivated,
            ChangeKind::Deactivated,
        ] {
            assert_eq!(kind.as_str().parse::<ChangeKind>().unwrap(), kind);
        }
        for status in [RunStatus::InProgress, RunStatus::Completed, RunStatus::Failed] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
        assert_eq!("inactive".parse::<RowState>().unwrap(), RowState::Inactive);
    }

    #[test]
    fn unknown_variant_names_the_kind() {
        let err = "gone".parse::<RowState>().unwrap_err();
        assert!(err.to_string().contains("row state"));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn counts_track_changed_rows_only() {
        let mut counts = RunCounts::default();
        counts.record(ChangeKind::Inserted);
        counts.record(ChangeKind::Deactivated);
        counts.unchanged += 4;
        assert_eq!(counts.changed(), 2);
        assert_eq!(counts.inserted, 1);
        assert_eq!(counts.deactivated, 1);
    }

    #[test]
    fn short_hash_truncates() {
        let hash = ContentHash::from("0123456789abcdef0123");
        assert_eq!(hash.short(), "0123456789ab");
        assert_eq!(ContentHash::from("abc").short(), "abc");
    }

    #[test]
    fn newtypes_serialize_transparently() {
        let json = serde_json::to_string(&TaxonId(42)).unwrap();
        assert_eq!(json, "42");
        let status = serde_json::to_string(&RunStatus::InProgress).unwrap();
        assert_eq!(status, "\"in_progress\"");
    }
}
