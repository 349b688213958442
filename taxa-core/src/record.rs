//! Canonical record extraction and the inclusion filter.
//!
//! Upstream taxon documents look roughly like:
//!
//! ```json
//! {
//!   "taxonId": 101,
//!   "parentId": 2002,
//!   "category": { "value": "Species" },
//!   "type":     { "value": "Taxonomic" },
//!   "status":   { "value": "Accepted" },
//!   "names": [
//!     { "name": "Papilio machaon", "isRecommended": true,
//!       "category": { "value": "ScientificName" } },
//!     { "name": "makaonfjäril", "isRecommended": true,
//!       "category": { "value": "SwedishName" } }
//!   ]
//! }
//! ```
//!
//! Only the fields needed for persistence are read; everything else stays in
//! the raw payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ExtractError;
use crate::types::TaxonId;

const SCIENTIFIC_NAME: &str = "ScientificName";
const SWEDISH_NAME: &str = "SwedishName";

/// The persistence-relevant subset of a cached payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub taxon_id: TaxonId,
    pub scientific_name: Option<String>,
    pub swedish_name: Option<String>,
    pub genus: Option<String>,
    pub parent_id: Option<TaxonId>,
    pub category: Option<String>,
    pub taxon_type: Option<String>,
    pub status: Option<String>,
}

impl CanonicalRecord {
    /// Extract a record from an upstream taxon document.
    pub fn from_payload(payload: &Value) -> Result<Self, ExtractError> {
        let obj = payload.as_object().ok_or(ExtractError::NotAnObject)?;

        let taxon_id = match obj.get("taxonId") {
            None | Some(Value::Null) => return Err(ExtractError::MissingTaxonId),
            Some(v) => v
                .as_i64()
                .ok_or_else(|| ExtractError::InvalidTaxonId(v.to_string()))?,
        };

        let scientific_name = pick_name(payload, SCIENTIFIC_NAME);
        let genus = scientific_name
            .as_deref()
            .and_then(|sci| sci.split_whitespace().next())
            .map(str::to_owned);

        Ok(Self {
            taxon_id: TaxonId(taxon_id),
            swedish_name: pick_name(payload, SWEDISH_NAME),
            scientific_name,
            genus,
            parent_id: obj.get("parentId").and_then(Value::as_i64).map(TaxonId),
            category: value_field(payload, "category"),
            taxon_type: value_field(payload, "type"),
            status: value_field(payload, "status"),
        })
    }

    /// Like [`from_payload`](Self::from_payload) but also checks the payload
    /// belongs to `expected`.
    pub fn from_payload_for(expected: TaxonId, payload: &Value) -> Result<Self, ExtractError> {
        let record = Self::from_payload(payload)?;
        if record.taxon_id != expected {
            return Err(ExtractError::IdMismatch {
                expected: expected.0,
                found: record.taxon_id.0,
            });
        }
        Ok(record)
    }
}

/// Reads `payload[field].value` as a string.
fn value_field(payload: &Value, field: &str) -> Option<String> {
    payload
        .get(field)?
        .get("value")?
        .as_str()
        .map(str::to_owned)
}

/// Recommended name of the given category, falling back to the first
/// non-empty name of that category.
fn pick_name(payload: &Value, category: &str) -> Option<String> {
    let names = payload.get("names")?.as_array()?;
    let mut fallback = None;
    for entry in names {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        let entry_category = entry
            .get("category")
            .and_then(|c| c.get("value"))
            .and_then(Value::as_str);
        if entry_category != Some(category) {
            continue;
        }
        if entry.get("isRecommended").and_then(Value::as_bool) == Some(true) {
            return Some(name.to_owned());
        }
        if fallback.is_none() {
            fallback = Some(name.to_owned());
        }
    }
    fallback
}

/// Category / type / status gate deciding which records are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InclusionFilter {
    pub category: String,
    #[serde(rename = "type")]
    pub taxon_type: String,
    pub status: String,
}

impl Default for InclusionFilter {
    fn default() -> Self {
        Self {
            category: "Species".to_string(),
            taxon_type: "Taxonomic".to_string(),
            status: "Accepted".to_string(),
        }
    }
}

impl InclusionFilter {
    pub fn accepts(&self, record: &CanonicalRecord) -> bool {
        record.category.as_deref() == Some(self.category.as_str())
            && record.taxon_type.as_deref() == Some(self.taxon_type.as_str())
            && record.status.as_deref() == Some(self.status.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    fn species(id: i64) -> Value {
        json!({
            "taxonId": id,
            "parentId": 5000,
            "category": { "value": "Species" },
            "type": { "value": "Taxonomic" },
            "status": { "value": "Accepted" },
            "names": [
                { "name": "Papilio hospiton", "isRecommended": false,
                  "category": { "value": "ScientificName" } },
                { "name": "Papilio machaon", "isRecommended": true,
                  "category": { "value": "ScientificName" } },
                { "name": "makaonfjäril", "isRecommended": true,
                  "category": { "value": "SwedishName" } }
            ]
        })
    }

    #[test]
    fn extracts_recommended_names_and_genus() {
        let record = CanonicalRecord::from_payload(&species(101)).unwrap();
        assert_eq!(record.taxon_id, TaxonId(101));
        assert_eq!(record.scientific_name.as_deref(), Some("Papilio machaon"));
        assert_eq!(record.swedish_name.as_deref(), Some("makaonfjäril"));
        assert_eq!(record.genus.as_deref(), Some("Papilio"));
        assert_eq!(record.parent_id, Some(TaxonId(5000)));
        assert_eq!(record.category.as_deref(), Some("Species"));
    }

    #[test]
    fn falls_back_to_first_name_when_none_recommended() {
        let payload = json!({
            "taxonId": 7,
            "names": [
                { "name": "", "category": { "value": "SwedishName" } },
                { "name": "ängsmätare", "category": { "value": "SwedishName" } },
                { "name": "senare", "category": { "value": "SwedishName" } }
            ]
        });
        let record = CanonicalRecord::from_payload(&payload).unwrap();
        assert_eq!(record.swedish_name.as_deref(), Some("ängsmätare"));
        assert!(record.scientific_name.is_none());
        assert!(record.genus.is_none());
    }

    #[test]
    fn single_word_scientific_name_is_its_own_genus() {
        let payload = json!({
            "taxonId": 8,
            "names": [{ "name": "Zygaena", "isRecommended": true,
                        "category": { "value": "ScientificName" } }]
        });
        let record = CanonicalRecord::from_payload(&payload).unwrap();
        assert_eq!(record.genus.as_deref(), Some("Zygaena"));
    }

    #[rstest]
    #[case(json!([1, 2, 3]), ExtractError::NotAnObject)]
    #[case(json!({ "names": [] }), ExtractError::MissingTaxonId)]
    #[case(json!({ "taxonId": null }), ExtractError::MissingTaxonId)]
    #[case(json!({ "taxonId": "abc" }), ExtractError::InvalidTaxonId("\"abc\"".to_string()))]
    fn malformed_payloads_are_rejected(#[case] payload: Value, #[case] expected: ExtractError) {
        assert_eq!(CanonicalRecord::from_payload(&payload).unwrap_err(), expected);
    }

    #[test]
    fn id_mismatch_is_reported() {
        let err = CanonicalRecord::from_payload_for(TaxonId(1), &species(2)).unwrap_err();
        assert_eq!(err, ExtractError::IdMismatch { expected: 1, found: 2 });
    }

    #[rstest]
    #[case("Species", "Taxonomic", "Accepted", true)]
    #[case("Genus", "Taxonomic", "Accepted", false)]
    #[case("Species", "Collective", "Accepted", false)]
    #[case("Species", "Taxonomic", "Synonym", false)]
    fn filter_requires_all_three_gates(
        #[case] category: &str,
        #[case] taxon_type: &str,
        #[case] status: &str,
        #[case] accepted: bool,
    ) {
        let payload = json!({
            "taxonId": 1,
            "category": { "value": category },
            "type": { "value": taxon_type },
            "status": { "value": status },
        });
        let record = CanonicalRecord::from_payload(&payload).unwrap();
        assert_eq!(InclusionFilter::default().accepts(&record), accepted);
    }

    #[test]
    fn filter_rejects_missing_gate_fields() {
        let record = CanonicalRecord::from_payload(&json!({ "taxonId": 1 })).unwrap();
        assert!(!InclusionFilter::default().accepts(&record));
    }
}
