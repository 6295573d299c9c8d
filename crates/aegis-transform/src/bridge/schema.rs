//! Adjustments applied to a Claude tool's `input_schema` before it is
//! forwarded as an OpenAI `function.parameters` schema.
//!
//! OpenAI-compatible providers are stricter about JSON Schema than Claude's
//! own tool-use implementation tolerates: a `format: "uri"` constraint on a
//! string property is rejected by some providers, and an object schema with
//! no declared `properties` but `additionalProperties: true` is sometimes
//! rejected as under-specified. Both are rewritten here; everything else in
//! the schema passes through unchanged.

use aegis_protocol::claude::count_tokens::types::JsonObject;
use serde_json::{Map, Value};

/// Recursively rewrites a tool input schema for OpenAI compatibility.
pub fn adjust_tool_schema(schema: &JsonObject) -> JsonObject {
    let mut map: Map<String, Value> = schema.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    adjust_object(&mut map);
    map.into_iter().collect()
}

fn adjust_value(value: &mut Value) {
    match value {
        Value::Object(map) => adjust_object(map),
        Value::Array(items) => items.iter_mut().for_each(adjust_value),
        _ => {}
    }
}

fn adjust_object(object: &mut Map<String, Value>) {
    for value in object.values_mut() {
        adjust_value(value);
    }
    strip_uri_format(object);
    collapse_empty_object(object);
}

/// Drops `format: "uri"` from a schema node typed as a string; other formats
/// (`date-time`, `email`, ...) are left alone since providers generally
/// accept them.
fn strip_uri_format(object: &mut Map<String, Value>) {
    let is_string = object.get("type").and_then(Value::as_str) == Some("string");
    let is_uri_format = object.get("format").and_then(Value::as_str) == Some("uri");
    if is_string && is_uri_format {
        object.remove("format");
    }
}

/// Collapses an object schema with empty/absent `properties` and
/// `additionalProperties: true` down to a bare `{"type": "object"}`, which
/// OpenAI-compatible providers accept unambiguously.
fn collapse_empty_object(object: &mut Map<String, Value>) {
    let is_object = object.get("type").and_then(Value::as_str) == Some("object");
    if !is_object {
        return;
    }
    let properties_empty = match object.get("properties") {
        None => true,
        Some(Value::Object(props)) => props.is_empty(),
        _ => false,
    };
    let additional_properties_true = object
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    if properties_empty && additional_properties_true {
        object.remove("properties");
        object.remove("additionalProperties");
        object.remove("required");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(value: Value) -> JsonObject {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[test]
    fn strips_uri_format_from_string_properties() {
        let schema = obj(json!({
            "type": "object",
            "properties": {
                "homepage": {"type": "string", "format": "uri"},
                "email": {"type": "string", "format": "email"},
            }
        }));
        let adjusted = adjust_tool_schema(&schema);
        let props = adjusted.get("properties").unwrap().as_object().unwrap();
        assert!(props["homepage"].get("format").is_none());
        assert_eq!(props["email"]["format"], "email");
    }

    #[test]
    fn collapses_open_ended_object() {
        let schema = obj(json!({
            "type": "object",
            "additionalProperties": true
        }));
        let adjusted = adjust_tool_schema(&schema);
        assert!(adjusted.get("properties").is_none());
        assert!(adjusted.get("additionalProperties").is_none());
    }

    #[test]
    fn leaves_closed_schema_untouched() {
        let schema = obj(json!({
            "type": "object",
            "properties": {"query": {"type": "string"}},
            "required": ["query"]
        }));
        let adjusted = adjust_tool_schema(&schema);
        assert_eq!(adjusted, schema);
    }
}
