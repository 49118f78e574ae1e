//! Hashing - SHA-256 fingerprints for edit outcomes
//!
//! Content hashes let a caller confirm which file state an outcome refers to.
//! Request hashes identify identical edit requests across runs.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

const CONTENT_HASH_PREFIX: &str = "sha256:";

/// Lowercase hex SHA-256 digest.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Fingerprint of file content, `None` for a file that does not exist.
pub fn content_hash(content: Option<&str>) -> Option<String> {
    content.map(|c| format!("{}{}", CONTENT_HASH_PREFIX, sha256_hex(c.as_bytes())))
}

/// Compact JSON with object keys in sorted order at every depth.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&canonicalize(serde_json::to_value(value)?))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, inner)| (key, canonicalize(inner)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Hash of an edit request as applied to `path` by this engine version.
///
/// Two requests that differ only in JSON key order hash the same.
pub fn compute_request_hash(
    path: &str,
    request: &impl Serialize,
    engine_version: &str,
) -> Result<String, serde_json::Error> {
    let payload = canonical_json(&serde_json::json!({
        "engine": engine_version,
        "path": path,
        "request": request,
    }))?;
    Ok(sha256_hex(payload.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_keys_sorted() {
        let request = json!({
            "kind": "line_edits",
            "edits": [{"start": 1, "end": 2, "new_content": ""}]
        });
        assert_eq!(
            canonical_json(&request).unwrap(),
            r#"{"edits":[{"end":2,"new_content":"","start":1}],"kind":"line_edits"}"#
        );
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_content_hash_absent_file() {
        assert!(content_hash(None).is_none());
        assert_eq!(
            content_hash(Some("")).unwrap(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_request_hash_ignores_key_order() {
        let a = json!({"kind": "rewrite", "content": "x"});
        let b = json!({"content": "x", "kind": "rewrite"});
        assert_eq!(
            compute_request_hash("a.py", &a, "1.0.0").unwrap(),
            compute_request_hash("a.py", &b, "1.0.0").unwrap()
        );
        assert_ne!(
            compute_request_hash("a.py", &a, "1.0.0").unwrap(),
            compute_request_hash("b.py", &a, "1.0.0").unwrap()
        );
        assert_ne!(
            compute_request_hash("a.py", &a, "1.0.0").unwrap(),
            compute_request_hash("a.py", &a, "1.1.0").unwrap()
        );
    }
}
