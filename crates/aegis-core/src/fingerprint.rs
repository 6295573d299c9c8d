//! Stable hashing of inbound request bodies for deduplication.
//!
//! The fingerprint is a BLAKE3 hash over a canonical JSON encoding of the
//! request body: object keys are recursively sorted so field order in the
//! original request never changes the hash. The `stream` flag is excluded:
//! a streaming and a non-streaming arrival of the same logical request are
//! meant to dedup, with the broadcaster adapting to whichever mode the
//! originator actually used (see `aegis_transform::adapt`).

use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(body: &Value) -> Self {
        let mut normalized = body.clone();
        if let Value::Object(map) = &mut normalized {
            map.remove("stream");
        }
        let canonical = canonicalize(&normalized);
        let bytes = serde_json::to_vec(&canonical).expect("canonical value always serializes");
        Fingerprint(*blake3::hash(&bytes).as_bytes())
    }

    pub fn to_hex(self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Recursively rewrites object keys through a `BTreeMap` so serialization
/// order is deterministic regardless of the source object's key order.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> =
                map.iter().map(|(k, v)| (k.clone(), canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_fingerprint() {
        let a = json!({"model": "claude-3", "max_tokens": 10, "messages": []});
        let b = json!({"messages": [], "max_tokens": 10, "model": "claude-3"});
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn stream_flag_does_not_affect_fingerprint() {
        let a = json!({"model": "claude-3", "messages": [], "stream": true});
        let b = json!({"model": "claude-3", "messages": [], "stream": false});
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn different_content_changes_fingerprint() {
        let a = json!({"model": "claude-3", "messages": [{"role": "user", "content": "ping"}]});
        let b = json!({"model": "claude-3", "messages": [{"role": "user", "content": "pong"}]});
        assert_ne!(Fingerprint::of(&a), Fingerprint::of(&b));
    }

    #[test]
    fn nested_object_key_order_does_not_affect_fingerprint() {
        let a = json!({"model": "m", "messages": [{"role": "user", "content": "hi"}], "tools": [{"name": "t", "input_schema": {"type": "object", "properties": {}}}]});
        let b = json!({"tools": [{"input_schema": {"properties": {}, "type": "object"}, "name": "t"}], "messages": [{"content": "hi", "role": "user"}], "model": "m"});
        assert_eq!(Fingerprint::of(&a), Fingerprint::of(&b));
    }
}
