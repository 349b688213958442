//! Cache store: one self-verifying JSON document per upstream id.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   0021/
//!     219641.json        (id / 10000, zero-padded to 4 digits)
//!     219641.json.tmp    (only while a write is in flight)
//! ```
//!
//! Payload, status, fetch time and content hash live in the same file, so a
//! reader sees either the previous complete entry or the new one. Writes use
//! the `.tmp` + rename pattern.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use taxa_core::{ContentHash, FetchStatus, TaxonId};

use crate::digest;
use crate::error::{io_err, CacheError};

const SHARD_WIDTH: i64 = 10_000;

/// A cached upstream response for one id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub taxon_id: TaxonId,
    pub status: FetchStatus,
    pub fetched_at: DateTime<Utc>,
    /// Canonical hash of `payload`; `None` for not-found entries.
    pub content_hash: Option<ContentHash>,
    pub payload: Option<Value>,
}

impl CacheEntry {
    /// Build an entry, hashing the payload. Not-found entries drop any payload.
    pub fn new(
        taxon_id: TaxonId,
        payload: Option<Value>,
        status: FetchStatus,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, CacheError> {
        let payload = match status {
            FetchStatus::Found => Some(payload.ok_or(CacheError::MissingPayload { id: taxon_id })?),
            FetchStatus::NotFound => None,
        };
        Ok(Self {
            taxon_id,
            status,
            fetched_at,
            content_hash: payload.as_ref().map(digest::hash),
            payload,
        })
    }

    pub fn is_found(&self) -> bool {
        self.status == FetchStatus::Found
    }

    /// Why a stored entry cannot be trusted, if anything.
    fn defect(&self, expected: TaxonId) -> Option<&'static str> {
        if self.taxon_id != expected {
            return Some("entry belongs to another id");
        }
        match (self.status, &self.payload, &self.content_hash) {
            (FetchStatus::Found, Some(payload), Some(stored)) => {
                (digest::hash(payload) != *stored).then_some("content hash mismatch")
            }
            (FetchStatus::Found, _, _) => Some("found entry without payload or hash"),
            (FetchStatus::NotFound, None, None) => None,
            (FetchStatus::NotFound, _, _) => Some("not-found entry carries a payload"),
        }
    }
}

/// Read/write access to cached upstream entries.
///
/// Implementations must make `put` atomic per id and must report corrupt
/// entries from `get` as absent.
pub trait CacheStore {
    fn get(&self, id: TaxonId) -> Result<Option<CacheEntry>, CacheError>;

    /// Replace the entry for `id` wholesale, stamped with `fetched_at`.
    fn put_at(
        &mut self,
        id: TaxonId,
        payload: Option<Value>,
        status: FetchStatus,
        fetched_at: DateTime<Utc>,
    ) -> Result<CacheEntry, CacheError>;

    /// Replace the entry for `id` wholesale, stamped with the current time.
    fn put(
        &mut self,
        id: TaxonId,
        payload: Option<Value>,
        status: FetchStatus,
    ) -> Result<CacheEntry, CacheError> {
        self.put_at(id, payload, status, Utc::now())
    }
}

// ---------------------------------------------------------------------------
// Filesystem store
// ---------------------------------------------------------------------------

/// Sharded on-disk cache rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsCache {
    root: PathBuf,
}

impl FsCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<id / 10000 as %04d>/<id>.json`. Pure, no I/O.
    pub fn entry_path(&self, id: TaxonId) -> PathBuf {
        let shard = format!("{:04}", id.0.div_euclid(SHARD_WIDTH));
        self.root.join(shard).join(format!("{}.json", id.0))
    }

    /// Count entry files across all shards.
    pub fn count_entries(&self) -> Result<usize, CacheError> {
        let shards = match std::fs::read_dir(&self.root) {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(io_err(&self.root, e)),
        };
        let mut count = 0;
        for shard in shards.filter_map(|e| e.ok()) {
            if !shard.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let entries = std::fs::read_dir(shard.path()).map_err(|e| io_err(shard.path(), e))?;
            count += entries
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".json"))
                .count();
        }
        Ok(count)
    }
}

impl CacheStore for FsCache {
    fn get(&self, id: TaxonId) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.entry_path(id);
        let contents = match std::fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path, e)),
        };
        let entry: CacheEntry = match serde_json::from_slice(&contents) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(taxon_id = %id, path = %path.display(), error = %err, "unreadable cache entry, treating as absent");
                return Ok(None);
            }
        };
        if let Some(defect) = entry.defect(id) {
            tracing::warn!(taxon_id = %id, path = %path.display(), defect, "corrupt cache entry, treating as absent");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn put_at(
        &mut self,
        id: TaxonId,
        payload: Option<Value>,
        status: FetchStatus,
        fetched_at: DateTime<Utc>,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry::new(id, payload, status, fetched_at)?;
        let path = self.entry_path(id);
        let json = serde_json::to_string_pretty(&entry)?;
        let tmp = path.with_extension("json.tmp");
        write_atomic(&path, json.as_bytes(), &tmp)?;
        tracing::debug!(taxon_id = %id, status = ?status, "cached");
        Ok(entry)
    }
}

/// Write `bytes` to `tmp`, then rename over `path`. Removes `tmp` on failure.
pub fn write_atomic(path: &Path, bytes: &[u8], tmp: &Path) -> Result<(), CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    if let Some(tmp_parent) = tmp.parent() {
        std::fs::create_dir_all(tmp_parent).map_err(|e| io_err(tmp_parent, e))?;
    }
    std::fs::write(tmp, bytes).map_err(|e| io_err(tmp, e))?;
    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// Process-local cache, used by tests and dry runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    entries: HashMap<TaxonId, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl CacheStore for MemoryCache {
    fn get(&self, id: TaxonId) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(&id).cloned())
    }

    fn put_at(
        &mut self,
        id: TaxonId,
        payload: Option<Value>,
        status: FetchStatus,
        fetched_at: DateTime<Utc>,
    ) -> Result<CacheEntry, CacheError> {
        let entry = CacheEntry::new(id, payload, status, fetched_at)?;
        self.entries.insert(id, entry.clone());
        Ok(entry)
    }
}
