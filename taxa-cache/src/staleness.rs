//! Freshness policy for cached entries.
//!
//! Signal precedence for one id:
//! 1. `Missing` (no entry, or the entry is corrupt)
//! 2. `Stale` (older than the TTL)
//! 3. `Fresh`
//!
//! A TTL of `None` means entries never expire: only missing ids are fetched.

use std::time::Duration;

use chrono::{DateTime, Utc};

use taxa_core::TaxonId;

use crate::error::CacheError;
use crate::store::{CacheEntry, CacheStore};

/// Freshness of the cache entry for one id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Missing,
    Stale,
    Fresh,
}

impl Freshness {
    pub fn needs_fetch(self) -> bool {
        !matches!(self, Freshness::Fresh)
    }
}

/// `true` when `entry` is at least `ttl` old at `now`.
///
/// Entries stamped in the future (clock skew) count as brand new.
pub fn is_stale(entry: &CacheEntry, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
    if entry.fetched_at.timestamp() <= 0 {
        return true;
    }
    let Some(ttl) = ttl else {
        return false;
    };
    let age = now
        .signed_duration_since(entry.fetched_at)
        .to_std()
        .unwrap_or_default();
    age >= ttl
}

/// Classify the cache entry for `id`.
pub fn freshness<C: CacheStore + ?Sized>(
    cache: &C,
    id: TaxonId,
    ttl: Option<Duration>,
    now: DateTime<Utc>,
) -> Result<Freshness, CacheError> {
    Ok(match cache.get(id)? {
        None => Freshness::Missing,
        Some(entry) if is_stale(&entry, ttl, now) => Freshness::Stale,
        Some(_) => Freshness::Fresh,
    })
}

/// Compact age such as `42s`, `5m`, `3h`, `2d`.
pub fn format_age(timestamp: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(timestamp).num_seconds().max(0) as u64;
    format_seconds(seconds)
}

fn format_seconds(seconds: u64) -> String {
    if seconds < 60 {
        return format!("{seconds}s");
    }
    if seconds < 60 * 60 {
        return format!("{}m", seconds / 60);
    }
    if seconds < 60 * 60 * 24 {
        return format!("{}h", seconds / (60 * 60));
    }
    format!("{}d", seconds / (60 * 60 * 24))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use serde_json::json;
    use taxa_core::FetchStatus;

    use crate::store::MemoryCache;

    fn entry_at(fetched_at: DateTime<Utc>) -> CacheEntry {
        CacheEntry::new(
            TaxonId(1),
            Some(json!({ "taxonId": 1 })),
            FetchStatus::Found,
            fetched_at,
        )
        .unwrap()
    }

    #[test]
    fn no_ttl_never_expires() {
        let now = Utc::now();
        let entry = entry_at(now - ChronoDuration::days(3650));
        assert!(!is_stale(&entry, None, now));
    }

    #[test]
    fn entry_at_exactly_ttl_is_stale() {
        let now = Utc::now();
        let ttl = Duration::from_secs(60);
        assert!(is_stale(&entry_at(now - ChronoDuration::seconds(60)), Some(ttl), now));
        assert!(!is_stale(&entry_at(now - ChronoDuration::seconds(59)), Some(ttl), now));
    }

    #[test]
    fn epoch_timestamp_is_always_stale() {
        let epoch = Utc.timestamp_opt(0, 0).unwrap();
        assert!(is_stale(&entry_at(epoch), None, Utc::now()));
    }

    #[test]
    fn future_timestamp_is_fresh() {
        let now = Utc::now();
        let entry = entry_at(now + ChronoDuration::hours(1));
        assert!(!is_stale(&entry, Some(Duration::from_secs(1)), now));
    }

    #[test]
    fn freshness_covers_missing_stale_and_fresh() {
        let now = Utc::now();
        let ttl = Some(Duration::from_secs(3600));
        let mut cache = MemoryCache::new();
        cache
            .put_at(TaxonId(1), None, FetchStatus::NotFound, now - ChronoDuration::hours(2))
            .unwrap();
        cache
            .put_at(TaxonId(2), Some(json!({})), FetchStatus::Found, now)
            .unwrap();

        assert_eq!(freshness(&cache, TaxonId(1), ttl, now).unwrap(), Freshness::Stale);
        assert_eq!(freshness(&cache, TaxonId(2), ttl, now).unwrap(), Freshness::Fresh);
        assert_eq!(freshness(&cache, TaxonId(3), ttl, now).unwrap(), Freshness::Missing);
        assert!(Freshness::Missing.needs_fetch());
        assert!(!Freshness::Fresh.needs_fetch());
    }

    #[test]
    fn ages_are_compact() {
        let now = Utc::now();
        assert_eq!(format_age(now, now), "0s");
        assert_eq!(format_age(now - ChronoDuration::seconds(65), now), "1m");
        assert_eq!(format_age(now - ChronoDuration::hours(5), now), "5h");
        assert_eq!(format_age(now - ChronoDuration::days(2), now), "2d");
        assert_eq!(format_age(now + ChronoDuration::days(2), now), "0s");
    }
}
