//! Change detection: canonical SHA-256 over a normalized payload.
//!
//! Normalization rules:
//! 1. Object keys are emitted in sorted (byte) order, at every depth.
//! 2. No whitespace between tokens.
//! 3. Strings use JSON escaping; numbers use their shortest JSON form.
//!
//! Two payloads that differ only in key order or formatting hash identically.

use std::fmt::Write as _;

use serde_json::Value;
use sha2::{Digest, Sha256};

use taxa_core::ContentHash;

use crate::error::CacheError;

/// How a freshly computed digest relates to the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No previous digest exists.
    New,
    /// Digest matches the stored one.
    Unchanged,
    /// Digest differs from the stored one.
    ContentChanged,
}

/// Canonical serialization of `payload`.
pub fn normalize(payload: &Value) -> String {
    let mut out = String::new();
    write_canonical(payload, &mut out);
    out
}

/// SHA-256 of the canonical serialization, lowercase hex.
pub fn hash(payload: &Value) -> ContentHash {
    hash_normalized(&normalize(payload))
}

/// Parse raw JSON text and hash it. Fails when the text is not JSON.
pub fn hash_str(raw: &str) -> Result<ContentHash, CacheError> {
    let value: Value = serde_json::from_str(raw)?;
    Ok(hash(&value))
}

/// Hash an already-normalized string.
pub fn hash_normalized(normalized: &str) -> ContentHash {
    let mut h = Sha256::new();
    h.update(normalized.as_bytes());
    ContentHash(hex::encode(h.finalize()))
}

pub fn classify(previous: Option<&ContentHash>, new: &ContentHash) -> Classification {
    match previous {
        None => Classification::New,
        Some(prev) if prev == new => Classification::Unchanged,
        Some(_) => Classification::ContentChanged,
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    // Serializing a &str into JSON cannot fail.
    match serde_json::to_string(s) {
        Ok(escaped) => out.push_str(&escaped),
        Err(_) => out.push_str("\"\""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn keys_are_sorted_at_every_depth() {
        let payload = json!({ "b": 1, "a": { "z": [3, { "y": 1, "x": 2 }], "c": null } });
        assert_eq!(
            normalize(&payload),
            r#"{"a":{"c":null,"z":[3,{"x":2,"y":1}]},"b":1}"#
        );
    }

    #[test]
    fn reordered_and_reformatted_payloads_hash_identically() {
        let a = r#"{"taxonId": 1, "names": [{"name": "Aglais io", "isRecommended": true}]}"#;
        let b = "{\n  \"names\":[{\"isRecommended\":true,\"name\":\"Aglais io\"}],\n  \"taxonId\":1\n}";
        assert_eq!(hash_str(a).unwrap(), hash_str(b).unwrap());
    }

    #[test]
    fn array_order_is_significant() {
        assert_ne!(hash(&json!([1, 2])), hash(&json!([2, 1])));
    }

    #[test]
    fn strings_are_escaped() {
        let payload = json!({ "name": "quote\" and åäö\n" });
        assert_eq!(normalize(&payload), r#"{"name":"quote\" and åäö\n"}"#);
    }

    #[test]
    fn hash_is_lowercase_hex_sha256() {
        let digest = hash(&json!({}));
        assert_eq!(digest.as_str().len(), 64);
        assert!(digest.as_str().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        // sha256("{}")
        assert_eq!(
            digest.as_str(),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    #[test]
    fn non_json_input_is_rejected() {
        assert!(hash_str("{not json").is_err());
    }

    #[rstest]
    #[case(None, "aa", Classification::New)]
    #[case(Some("aa"), "aa", Classification::Unchanged)]
    #[case(Some("aa"), "bb", Classification::ContentChanged)]
    fn classify_cases(
        #[case] previous: Option<&str>,
        #[case] new: &str,
        #[case] expected: Classification,
    ) {
        let previous = previous.map(ContentHash::from);
        assert_eq!(classify(previous.as_ref(), &ContentHash::from(new)), expected);
    }
}
