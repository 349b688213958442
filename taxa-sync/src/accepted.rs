//! Materialize the accepted set for a run from the cache.
//!
//! Each requested id ends up in exactly one bucket:
//! - `records`: found, extracted, passes the inclusion filter
//! - `rejected`: found and extracted, but filtered out
//! - `skipped`: found, but the payload could not be extracted
//! - `missing`: no usable cache entry, or cached as not-found

use std::collections::HashSet;

use serde::Serialize;
use serde_json::Value;

use taxa_cache::{digest, CacheStore};
use taxa_core::{CanonicalRecord, ContentHash, ExtractError, InclusionFilter, TaxonId};

use crate::error::SyncError;

/// A record that passed the inclusion filter, with its content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedRecord {
    pub record: CanonicalRecord,
    pub hash: ContentHash,
    /// Canonical serialization of the payload the hash was computed over.
    pub raw_json: String,
}

impl AcceptedRecord {
    /// Extract and hash `payload`, which must belong to `id`.
    pub fn from_payload(id: TaxonId, payload: &Value) -> Result<Self, ExtractError> {
        let record = CanonicalRecord::from_payload_for(id, payload)?;
        let raw_json = digest::normalize(payload);
        Ok(Self {
            record,
            hash: digest::hash_normalized(&raw_json),
            raw_json,
        })
    }

    pub fn taxon_id(&self) -> TaxonId {
        self.record.taxon_id
    }
}

/// An id whose payload could not be turned into a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedId {
    pub taxon_id: TaxonId,
    pub reason: String,
}

/// Outcome of [`collect_accepted`].
#[derive(Debug, Clone, Default)]
pub struct AcceptedSet {
    pub records: Vec<AcceptedRecord>,
    pub rejected: usize,
    pub skipped: Vec<SkippedId>,
    pub missing: Vec<TaxonId>,
}

impl AcceptedSet {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Read every id from `cache` and sort it into the buckets above.
///
/// Duplicate ids are considered once. Only cache I/O failures are errors.
pub fn collect_accepted<C: CacheStore + ?Sized>(
    cache: &C,
    ids: &[TaxonId],
    filter: &InclusionFilter,
) -> Result<AcceptedSet, SyncError> {
    let mut set = AcceptedSet::default();
    let mut seen = HashSet::with_capacity(ids.len());

    for &id in ids {
        if !seen.insert(id) {
            continue;
        }
        let payload = match cache.get(id)? {
            Some(entry) if entry.is_found() => entry.payload,
            _ => None,
        };
        let Some(payload) = payload else {
            set.missing.push(id);
            continue;
        };
        match AcceptedRecord::from_payload(id, &payload) {
            Ok(accepted) if filter.accepts(&accepted.record) => set.records.push(accepted),
            Ok(_) => set.rejected += 1,
            Err(err) => {
                tracing::warn!(taxon_id = %id, error = %err, "excluding taxon from this run");
                set.skipped.push(SkippedId {
                    taxon_id: id,
                    reason: err.to_string(),
                });
            }
        }
    }

    tracing::info!(
        accepted = set.records.len(),
        rejected = set.rejected,
        skipped = set.skipped.len(),
        missing = set.missing.len(),
        "accepted set built"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taxa_cache::MemoryCache;
    use taxa_core::FetchStatus;

    fn doc(id: i64, category: &str) -> Value {
        json!({
            "taxonId": id,
            "category": { "value": category },
            "type": { "value": "Taxonomic" },
            "status": { "value": "Accepted" },
        })
    }

    #[test]
    fn ids_are_sorted_into_buckets() {
        let mut cache = MemoryCache::new();
        cache.put(TaxonId(1), Some(doc(1, "Species")), FetchStatus::Found).unwrap();
        cache.put(TaxonId(2), Some(doc(2, "Genus")), FetchStatus::Found).unwrap();
        cache.put(TaxonId(3), None, FetchStatus::NotFound).unwrap();
        cache.put(TaxonId(4), Some(json!({ "names": [] })), FetchStatus::Found).unwrap();
        cache.put(TaxonId(5), Some(doc(6, "Species")), FetchStatus::Found).unwrap();

        let ids: Vec<TaxonId> = [1, 2, 3, 4, 5, 7, 1].into_iter().map(TaxonId).collect();
        let set = collect_accepted(&cache, &ids, &InclusionFilter::default()).unwrap();

        assert_eq!(set.len(), 1);
        assert_eq!(set.records[0].taxon_id(), TaxonId(1));
        assert_eq!(set.rejected, 1);
        assert_eq!(set.missing, vec![TaxonId(3), TaxonId(7)]);
        let skipped: Vec<TaxonId> = set.skipped.iter().map(|s| s.taxon_id).collect();
        assert_eq!(skipped, vec![TaxonId(4), TaxonId(5)]);
        assert!(set.skipped[1].reason.contains("does not match"));
    }

    #[test]
    fn hash_matches_cache_digest() {
        let mut cache = MemoryCache::new();
        let entry = cache
            .put(TaxonId(1), Some(doc(1, "Species")), FetchStatus::Found)
            .unwrap();
        let set = collect_accepted(&cache, &[TaxonId(1)], &InclusionFilter::default()).unwrap();
        assert_eq!(Some(&set.records[0].hash), entry.content_hash.as_ref());
    }
}
