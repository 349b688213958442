use std::fs;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use taxa_cache::{
    digest::{self, Classification},
    freshness, CacheStore, FsCache, Freshness,
};
use taxa_core::{FetchStatus, TaxonId};
use tempfile::TempDir;

#[test]
fn refetch_with_reordered_fields_keeps_the_same_hash() {
    let tmp = TempDir::new().expect("tmp");
    let mut cache = FsCache::new(tmp.path());
    let id = TaxonId(219641);

    let first: serde_json::Value = serde_json::from_str(
        r#"{"taxonId":219641,"category":{"value":"Species"},"names":[{"name":"Aglais io"}]}"#,
    )
    .expect("json");
    let second: serde_json::Value = serde_json::from_str(
        "{\n  \"names\": [ { \"name\": \"Aglais io\" } ],\n  \"category\": { \"value\": \"Species\" },\n  \"taxonId\": 219641\n}",
    )
    .expect("json");

    let before = cache.put(id, Some(first), FetchStatus::Found).expect("put");
    let after = cache.put(id, Some(second), FetchStatus::Found).expect("put");

    assert_eq!(
        digest::classify(before.content_hash.as_ref(), after.content_hash.as_ref().expect("hash")),
        Classification::Unchanged
    );
}

#[test]
fn corrupt_entry_forces_refetch() {
    let tmp = TempDir::new().expect("tmp");
    let mut cache = FsCache::new(tmp.path());
    let id = TaxonId(77);
    cache
        .put(id, Some(json!({ "taxonId": 77 })), FetchStatus::Found)
        .expect("put");
    assert_eq!(
        freshness(&cache, id, None, Utc::now()).expect("freshness"),
        Freshness::Fresh
    );

    fs::write(cache.entry_path(id), b"\x00\x01 not json").expect("corrupt");
    assert_eq!(
        freshness(&cache, id, None, Utc::now()).expect("freshness"),
        Freshness::Missing
    );
}

#[test]
fn not_found_entries_are_not_refetched_until_ttl_expires() {
    let tmp = TempDir::new().expect("tmp");
    let mut cache = FsCache::new(tmp.path());
    let id = TaxonId(404);
    let now = Utc::now();
    cache
        .put_at(id, None, FetchStatus::NotFound, now - ChronoDuration::minutes(30))
        .expect("put");

    let hour = Some(Duration::from_secs(3600));
    let quarter = Some(Duration::from_secs(900));
    assert_eq!(freshness(&cache, id, hour, now).expect("f"), Freshness::Fresh);
    assert_eq!(freshness(&cache, id, quarter, now).expect("f"), Freshness::Stale);
    assert_eq!(freshness(&cache, id, None, now).expect("f"), Freshness::Fresh);
}
