//! Bring the cache up to date for a list of ids.
//!
//! Only ids whose entry is missing, corrupt or stale are requested. Every id
//! in a batch ends up cached: returned documents as found, the rest as
//! not-found.

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use taxa_cache::{freshness, CacheStore, Freshness};
use taxa_core::{FetchStatus, Settings, TaxonId};

use crate::error::FetchError;
use crate::source::TaxonSource;

/// How aggressively to refetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// `None` means cached entries never expire.
    pub ttl: Option<Duration>,
    pub batch_size: usize,
    pub culture: String,
}

impl RefreshPolicy {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            ttl: settings.cache_ttl(),
            batch_size: settings.post_batch_size,
            culture: settings.culture.clone(),
        }
    }
}

/// Counters reported after a refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    /// Ids that needed fetching.
    pub requested: usize,
    /// Documents written as found.
    pub fetched_ok: usize,
    /// Requested ids upstream did not return.
    pub not_found: usize,
    /// Ids with no usable entry before the refresh.
    pub missing_before: usize,
    /// Ids already fresh before the refresh.
    pub fresh_before: usize,
}

/// The distinct ids of `ids` whose cache entry needs fetching, in input order,
/// plus the missing / fresh counts seen along the way.
pub fn plan_refresh<C: CacheStore + ?Sized>(
    cache: &C,
    ids: &[TaxonId],
    ttl: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<(Vec<TaxonId>, RefreshSummary), FetchError> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut to_fetch = Vec::new();
    let mut summary = RefreshSummary::default();
    for &id in ids {
        if !seen.insert(id) {
            continue;
        }
        match freshness(cache, id, ttl, now)? {
            Freshness::Fresh => summary.fresh_before += 1,
            Freshness::Missing => {
                summary.missing_before += 1;
                to_fetch.push(id);
            }
            Freshness::Stale => to_fetch.push(id),
        }
    }
    summary.requested = to_fetch.len();
    Ok((to_fetch, summary))
}

/// Fetch every id that needs it, in batches, and write the results to `cache`.
///
/// A transport failure aborts the refresh; batches already written stay
/// cached.
pub fn refresh_cache<S, C>(
    source: &S,
    cache: &mut C,
    ids: &[TaxonId],
    policy: &RefreshPolicy,
) -> Result<RefreshSummary, FetchError>
where
    S: TaxonSource + ?Sized,
    C: CacheStore + ?Sized,
{
    let (to_fetch, mut summary) = plan_refresh(cache, ids, policy.ttl, Utc::now())?;
    tracing::info!(
        requested = summary.requested,
        missing_before = summary.missing_before,
        fresh_before = summary.fresh_before,
        "refreshing cache"
    );

    for batch in to_fetch.chunks(policy.batch_size.max(1)) {
        let documents = source.fetch_taxa(batch, &policy.culture)?;
        let wanted: HashSet<TaxonId> = batch.iter().copied().collect();
        let mut returned = HashSet::with_capacity(batch.len());

        for doc in documents {
            let Some(id) = document_id(&doc) else {
                tracing::warn!("upstream returned a document without an integer taxonId, ignoring");
                continue;
            };
            if !wanted.contains(&id) || !returned.insert(id) {
                tracing::warn!(taxon_id = %id, "unrequested or repeated document in batch, ignoring");
                continue;
            }
            cache.put(id, Some(doc), FetchStatus::Found)?;
            summary.fetched_ok += 1;
        }

        for &id in batch.iter().filter(|id| !returned.contains(id)) {
            cache.put(id, None, FetchStatus::NotFound)?;
            summary.not_found += 1;
        }
        tracing::debug!(batch = batch.len(), returned = returned.len(), "batch cached");
    }

    tracing::info!(
        fetched_ok = summary.fetched_ok,
        not_found = summary.not_found,
        "cache refresh finished"
    );
    Ok(summary)
}

fn document_id(doc: &Value) -> Option<TaxonId> {
    doc.as_object()?.get("taxonId")?.as_i64().map(TaxonId)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use taxa_cache::MemoryCache;

    #[test]
    fn plan_skips_fresh_and_duplicate_ids() {
        let now = Utc::now();
        let mut cache = MemoryCache::new();
        cache
            .put_at(TaxonId(1), Some(json!({ "taxonId": 1 })), FetchStatus::Found, now)
            .unwrap();
        cache
            .put_at(TaxonId(2), None, FetchStatus::NotFound, now - ChronoDuration::days(2))
            .unwrap();

        let ids = [TaxonId(1), TaxonId(2), TaxonId(3), TaxonId(3)];
        let ttl = Some(Duration::from_secs(86_400));
        let (to_fetch, summary) = plan_refresh(&cache, &ids, ttl, now).unwrap();
        assert_eq!(to_fetch, vec![TaxonId(2), TaxonId(3)]);
        assert_eq!(summary.fresh_before, 1);
        assert_eq!(summary.missing_before, 1);
        assert_eq!(summary.requested, 2);
    }

    #[test]
    fn without_ttl_only_missing_ids_are_planned() {
        let now = Utc::now();
        let mut cache = MemoryCache::new();
        cache
            .put_at(TaxonId(1), None, FetchStatus::NotFound, now - ChronoDuration::days(400))
            .unwrap();
        let (to_fetch, _) = plan_refresh(&cache, &[TaxonId(1), TaxonId(2)], None, now).unwrap();
        assert_eq!(to_fetch, vec![TaxonId(2)]);
    }

    #[test]
    fn document_id_requires_integer() {
        assert_eq!(document_id(&json!({ "taxonId": 4 })), Some(TaxonId(4)));
        assert_eq!(document_id(&json!({ "taxonId": "4" })), None);
        assert_eq!(document_id(&json!([4])), None);
    }
}
