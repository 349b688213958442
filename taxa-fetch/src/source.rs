//! The upstream seam and the response shapes it deals in.

use serde_json::Value;

use taxa_core::TaxonId;

use crate::error::FetchError;

/// Read access to the upstream taxonomy.
///
/// [`crate::ArtdatabankenClient`] is the network implementation; tests use
/// in-process fakes.
pub trait TaxonSource {
    /// Resolve the taxon id of the root taxon called `name`.
    fn find_root(&self, name: &str, culture: &str) -> Result<TaxonId, FetchError>;

    /// Every descendant id below `root`.
    fn child_ids(&self, root: TaxonId) -> Result<Vec<TaxonId>, FetchError>;

    /// Full documents for `ids`. Ids unknown upstream are simply absent
    /// from the result.
    fn fetch_taxa(&self, ids: &[TaxonId], culture: &str) -> Result<Vec<Value>, FetchError>;
}

/// Pick the root taxon out of a name-search response.
///
/// Prefers an accepted taxonomic order whose recommended scientific name is
/// exactly `name`; otherwise any hit whose name and recommended name both
/// equal `name`.
pub fn pick_root(search: &Value, name: &str) -> Option<TaxonId> {
    let hits = search.get("data")?.as_array()?;

    let recommended = |hit: &Value| {
        hit.get("taxonInformation")
            .and_then(|ti| ti.get("recommendedScientificName"))
            .and_then(Value::as_str)
            == Some(name)
    };
    let taxon_id = |hit: &Value| {
        hit.get("taxonInformation")
            .and_then(|ti| ti.get("taxonId"))
            .and_then(Value::as_i64)
            .map(TaxonId)
    };
    let value_of = |hit: &Value, field: &str| {
        hit.get(field)
            .and_then(|f| f.get("value"))
            .and_then(Value::as_str)
            .map(str::to_owned)
    };

    let accepted_order = hits.iter().find(|hit| {
        recommended(hit)
            && value_of(hit, "category").as_deref() == Some("Order")
            && value_of(hit, "type").as_deref() == Some("Taxonomic")
            && value_of(hit, "status").as_deref() == Some("Accepted")
    });
    if let Some(id) = accepted_order.and_then(taxon_id) {
        return Some(id);
    }

    hits.iter()
        .filter(|hit| recommended(hit) && hit.get("name").and_then(Value::as_str) == Some(name))
        .find_map(taxon_id)
}

/// Child ids from a `childids` response: a bare array, or an object with a
/// `taxonIds` or `data` array. Non-integer elements are dropped.
pub fn extract_child_ids(payload: &Value) -> Option<Vec<TaxonId>> {
    let list = match payload {
        Value::Array(items) => items,
        Value::Object(obj) => obj
            .get("taxonIds")
            .or_else(|| obj.get("data"))
            .and_then(Value::as_array)?,
        _ => return None,
    };
    Some(list.iter().filter_map(Value::as_i64).map(TaxonId).collect())
}
