//! Source revision file: fingerprint of the upstream id list.
//!
//! If the root id and its sorted child ids hash the same as last time, the
//! upstream snapshot has not changed shape and a refresh may stop early.

use std::io::ErrorKind;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use taxa_cache::{digest, write_atomic};
use taxa_core::TaxonId;

use crate::error::{io_err, FetchError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceRevision {
    pub root_taxon_id: TaxonId,
    pub child_count: u64,
    pub source_hash: String,
    pub updated_at: DateTime<Utc>,
}

/// SHA-256 of `{"childIds": [sorted ids], "root": id}` in canonical form.
pub fn source_hash(root: TaxonId, child_ids: &[TaxonId]) -> String {
    let mut ids: Vec<i64> = child_ids.iter().map(|id| id.0).collect();
    ids.sort_unstable();
    digest::hash(&json!({ "root": root.0, "childIds": ids })).0
}

impl SourceRevision {
    pub fn new(root: TaxonId, child_ids: &[TaxonId], now: DateTime<Utc>) -> Self {
        Self {
            root_taxon_id: root,
            child_count: child_ids.len() as u64,
            source_hash: source_hash(root, child_ids),
            updated_at: now,
        }
    }

    /// Same root and same fingerprint.
    pub fn matches(&self, other: &SourceRevision) -> bool {
        self.root_taxon_id == other.root_taxon_id && self.source_hash == other.source_hash
    }

    /// Read the file at `path`. A missing or malformed file reads as `None`.
    pub fn load(path: &Path) -> Result<Option<Self>, FetchError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(path, e)),
        };
        match serde_json::from_str(&contents) {
            Ok(rev) => Ok(Some(rev)),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable source revision");
                Ok(None)
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), FetchError> {
        let json = serde_json::to_string_pretty(self)?;
        write_atomic(path, json.as_bytes(), &path.with_extension("json.tmp"))?;
        Ok(())
    }
}
