//! Typed-attribute decoding for change-stream records
//!
//! The store provider encodes every attribute as a tagged union
//! (`{"S": "text"}`, `{"N": "1.5"}`, `{"M": {...}}`, ...). This module
//! decodes that into plain `serde_json::Value` maps so the notifier logic
//! stays independent of the provider's wire format.

use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// One typed attribute value: string/number/bool/null/map/list.
/// Tags outside this set (binary blobs, string sets, ...) don't parse;
/// [`decode_image`] drops such attributes instead of failing the record.
#[derive(Debug, Clone, Deserialize)]
pub enum AttrValue {
    S(String),
    /// Numbers arrive as strings on the wire
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null(bool),
    M(BTreeMap<String, Value>),
    L(Vec<Value>),
}

impl AttrValue {
    /// Decode into a plain JSON value
    pub fn into_json(self) -> Value {
        match self {
            AttrValue::S(s) => Value::String(s),
            AttrValue::N(n) => parse_number(&n),
            AttrValue::Bool(b) => Value::Bool(b),
            AttrValue::Null(_) => Value::Null,
            AttrValue::M(map) => Value::Object(decode_image(map)),
            AttrValue::L(list) => Value::Array(
                list.into_iter()
                    .filter_map(|v| decode_attr("(list item)", v))
                    .collect(),
            ),
        }
    }
}

/// Decode a whole attribute image into a plain JSON object. Attributes
/// with a tag this decoder doesn't model are dropped with a log line;
/// the rest of the record still goes through.
pub fn decode_image(image: BTreeMap<String, Value>) -> Map<String, Value> {
    image
        .into_iter()
        .filter_map(|(key, raw)| decode_attr(&key, raw).map(|v| (key, v)))
        .collect()
}

fn decode_attr(key: &str, raw: Value) -> Option<Value> {
    match serde_json::from_value::<AttrValue>(raw) {
        Ok(attr) => Some(attr.into_json()),
        Err(e) => {
            tracing::warn!(attribute = %key, error = %e, "Unsupported attribute type, dropping");
            None
        }
    }
}

fn parse_number(n: &str) -> Value {
    // Integers stay integers so event timestamps survive decoding exactly
    if let Ok(i) = n.parse::<i64>() {
        return Value::Number(Number::from(i));
    }
    match n.parse::<f64>().ok().and_then(Number::from_f64) {
        Some(num) => Value::Number(num),
        None => Value::String(n.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_decoding() {
        let s: AttrValue = serde_json::from_str(r#"{"S": "hello"}"#).unwrap();
        assert_eq!(s.into_json(), Value::String("hello".to_string()));

        let n: AttrValue = serde_json::from_str(r#"{"N": "0.7"}"#).unwrap();
        assert_eq!(n.into_json(), serde_json::json!(0.7));

        let i: AttrValue = serde_json::from_str(r#"{"N": "1700000000000"}"#).unwrap();
        assert_eq!(i.into_json(), serde_json::json!(1_700_000_000_000_i64));

        let b: AttrValue = serde_json::from_str(r#"{"BOOL": true}"#).unwrap();
        assert_eq!(b.into_json(), Value::Bool(true));

        let null: AttrValue = serde_json::from_str(r#"{"NULL": true}"#).unwrap();
        assert_eq!(null.into_json(), Value::Null);
    }

    #[test]
    fn test_nested_map_and_list() {
        let raw = r#"{
            "M": {
                "confidence": {"N": "0.9"},
                "fireDetected": {"BOOL": true},
                "boxes": {"L": [{"M": {"label": {"S": "fire"}}}]}
            }
        }"#;
        let attr: AttrValue = serde_json::from_str(raw).unwrap();
        let json = attr.into_json();
        assert_eq!(json["confidence"], serde_json::json!(0.9));
        assert_eq!(json["fireDetected"], Value::Bool(true));
        assert_eq!(json["boxes"][0]["label"], "fire");
    }

    #[test]
    fn test_decode_image() {
        let raw = r#"{
            "event_id": {"S": "e1"},
            "risk_level": {"S": "CONFIRMED"},
            "timestamp": {"N": "1700000000000"}
        }"#;
        let image: BTreeMap<String, Value> = serde_json::from_str(raw).unwrap();
        let plain = decode_image(image);
        assert_eq!(plain["event_id"], "e1");
        assert_eq!(plain["risk_level"], "CONFIRMED");
        assert_eq!(plain["timestamp"], serde_json::json!(1_700_000_000_000_i64));
    }

    #[test]
    fn test_unknown_attribute_tag_is_dropped_not_fatal() {
        // Binary and set tags are not modeled; the rest of the image survives
        let raw = r#"{
            "event_id": {"S": "e1"},
            "blob": {"B": "aGVsbG8="},
            "tags": {"SS": ["a", "b"]},
            "risk_level": {"S": "CONFIRMED"}
        }"#;
        let image: BTreeMap<String, Value> = serde_json::from_str(raw).unwrap();
        let plain = decode_image(image);
        assert_eq!(plain["event_id"], "e1");
        assert_eq!(plain["risk_level"], "CONFIRMED");
        assert!(!plain.contains_key("blob"));
        assert!(!plain.contains_key("tags"));
    }

    #[test]
    fn test_unparseable_number_falls_back_to_string() {
        let n: AttrValue = serde_json::from_str(r#"{"N": "not-a-number"}"#).unwrap();
        assert_eq!(n.into_json(), Value::String("not-a-number".to_string()));
    }
}
