//! Request fingerprints
//!
//! A fingerprint is the SHA-256 of the task kind and a canonical JSON form of
//! the payload. Canonicalization sorts object keys, trims string values and
//! normalizes line endings, so two payloads that differ only in field order
//! or incidental whitespace share a key.

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::CacheError;

/// Fingerprint `payload` submitted as `task_kind`
pub fn fingerprint<P>(task_kind: &str, payload: &P) -> Result<String, CacheError>
where
    P: Serialize + ?Sized,
{
    let canonical = serde_json::to_string(&canonicalize(serde_json::to_value(payload)?))?;

    let mut hasher = Sha256::new();
    hasher.update(task_kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (key, value) in entries {
                sorted.insert(key, canonicalize(value));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::String(s) => Value::String(s.replace("\r\n", "\n").trim().to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deterministic() {
        let a = fingerprint("chat", &json!({"prompt": "hello"})).unwrap();
        let b = fingerprint("chat", &json!({"prompt": "hello"})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_ignores_key_order_and_padding() {
        let a = fingerprint("chat", &json!({"prompt": "  hello\r\nworld ", "temperature": 0.5})).unwrap();
        let b = fingerprint("chat", &json!({"temperature": 0.5, "prompt": "hello\nworld"})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_kind_and_content_matter() {
        let payload = json!({"prompt": "hello"});
        assert_ne!(
            fingerprint("chat", &payload).unwrap(),
            fingerprint("vision", &payload).unwrap()
        );
        assert_ne!(
            fingerprint("chat", &payload).unwrap(),
            fingerprint("chat", &json!({"prompt": "hello!"})).unwrap()
        );
    }

    #[test]
    fn test_nested_arrays_canonicalized() {
        let a = fingerprint("chat", &json!({"messages": [{"role": "user", "content": "hi "}]})).unwrap();
        let b = fingerprint("chat", &json!({"messages": [{"content": "hi", "role": "user"}]})).unwrap();
        assert_eq!(a, b);
    }
}
