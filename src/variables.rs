//! Typed variable model and wire codec.
//!
//! The remote service exchanges variables as typed descriptors
//! (`{value, type, valueInfo}`). Handlers work with native [`Value`]s;
//! the codec maps between the two. Encoding is performed relative to the
//! originally fetched descriptors so serialization hints (object type
//! names, data formats) survive a fetch/complete round-trip.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// Decoded variables as seen by handlers.
pub type Variables = HashMap<String, Value>;

/// Raw wire-side variables.
pub type VariableMap = HashMap<String, ValueDescriptor>;

/// Wire format for a single typed variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueDescriptor {
    #[serde(default)]
    pub value: serde_json::Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub value_info: serde_json::Map<String, serde_json::Value>,
}

impl ValueDescriptor {
    pub fn new(value: serde_json::Value, value_type: impl Into<String>) -> Self {
        Self {
            value,
            value_type: Some(value_type.into()),
            value_info: serde_json::Map::new(),
        }
    }

    fn has_type(&self, name: &str) -> bool {
        self.value_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(name))
    }
}

/// A native variable value.
///
/// `Serialized` wraps a pre-built descriptor that is passed through to the
/// service untouched on completion, for callers that manage serialization
/// themselves.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    String(String),
    Date(DateTime<Utc>),
    Json(serde_json::Value),
    Serialized(ValueDescriptor),
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Date(v)
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

// The REST API rejects fractional seconds on date values.
const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Encode native values into wire descriptors.
///
/// `original` holds the descriptors the task was fetched with; a variable
/// re-submitted under the same name keeps its original `type`/`valueInfo`
/// envelope (notably `Object` serialization metadata).
pub fn encode_variables(values: &Variables, original: &VariableMap) -> VariableMap {
    values
        .iter()
        .map(|(name, value)| (name.clone(), encode_value(value, original.get(name))))
        .collect()
}

fn encode_value(value: &Value, original: Option<&ValueDescriptor>) -> ValueDescriptor {
    match value {
        Value::Null => ValueDescriptor {
            value: serde_json::Value::Null,
            value_type: None,
            value_info: serde_json::Map::new(),
        },
        Value::Boolean(v) => ValueDescriptor::new((*v).into(), "boolean"),
        Value::Integer(v) => ValueDescriptor::new((*v).into(), "integer"),
        Value::Double(v) => ValueDescriptor::new(
            serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            "double",
        ),
        Value::String(v) => ValueDescriptor::new(v.clone().into(), "string"),
        Value::Date(v) => {
            ValueDescriptor::new(v.format(DATE_FORMAT).to_string().into(), "date")
        }
        Value::Json(v) => {
            let text = v.to_string();

            // preserve the Object envelope of the fetched descriptor
            if let Some(original) = original.filter(|d| d.has_type("object")) {
                return ValueDescriptor {
                    value: text.into(),
                    value_type: original.value_type.clone(),
                    value_info: original.value_info.clone(),
                };
            }

            ValueDescriptor::new(text.into(), "json")
        }
        Value::Serialized(descriptor) => descriptor.clone(),
    }
}

/// Decode wire descriptors into native values.
pub fn decode_variables(descriptors: &VariableMap) -> Variables {
    descriptors
        .iter()
        .map(|(name, descriptor)| (name.clone(), decode_value(descriptor)))
        .collect()
}

fn decode_value(descriptor: &ValueDescriptor) -> Value {
    let Some(value_type) = descriptor.value_type.as_deref() else {
        return decode_untyped(&descriptor.value);
    };

    match value_type.to_ascii_lowercase().as_str() {
        "boolean" => match descriptor.value.as_bool() {
            Some(v) => Value::Boolean(v),
            None => Value::Serialized(descriptor.clone()),
        },
        "integer" | "long" | "short" => match descriptor.value.as_i64() {
            Some(v) => Value::Integer(v),
            None => Value::Serialized(descriptor.clone()),
        },
        "double" => match descriptor.value.as_f64() {
            Some(v) => Value::Double(v),
            None => Value::Serialized(descriptor.clone()),
        },
        "string" => match descriptor.value.as_str() {
            Some(v) => Value::String(v.to_string()),
            None => Value::Serialized(descriptor.clone()),
        },
        "date" => match descriptor.value.as_str().and_then(parse_date) {
            Some(v) => Value::Date(v),
            None => Value::Serialized(descriptor.clone()),
        },
        "json" | "object" => match &descriptor.value {
            serde_json::Value::String(text) => match serde_json::from_str(text) {
                Ok(parsed) => Value::Json(parsed),
                Err(_) => Value::Serialized(descriptor.clone()),
            },
            other => Value::Json(other.clone()),
        },
        // unknown engine type, pass through untouched
        _ => Value::Serialized(descriptor.clone()),
    }
}

fn decode_untyped(value: &serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(v) => Value::Boolean(*v),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(v) => Value::Integer(v),
            None => Value::Double(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(v) => Value::String(v.clone()),
        other => Value::Json(other.clone()),
    }
}

fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn roundtrip(value: Value) -> Value {
        let mut values = Variables::new();
        values.insert("var".to_string(), value);
        let encoded = encode_variables(&values, &VariableMap::new());
        let mut decoded = decode_variables(&encoded);
        decoded.remove("var").unwrap()
    }

    #[test]
    fn roundtrip_primitives() {
        assert_eq!(roundtrip(Value::Integer(42)), Value::Integer(42));
        assert_eq!(roundtrip(Value::Double(1.5)), Value::Double(1.5));
        assert_eq!(roundtrip(Value::Boolean(true)), Value::Boolean(true));
        assert_eq!(
            roundtrip(Value::String("BAR".to_string())),
            Value::String("BAR".to_string())
        );
        assert_eq!(roundtrip(Value::Null), Value::Null);
    }

    #[test]
    fn roundtrip_date_at_second_precision() {
        let date = "2010-07-06T10:30:10.250Z"
            .parse::<DateTime<Utc>>()
            .unwrap();
        let expected = "2010-07-06T10:30:10Z".parse::<DateTime<Utc>>().unwrap();

        assert_eq!(roundtrip(Value::Date(date)), Value::Date(expected));
    }

    #[test]
    fn date_encodes_without_fractional_seconds() {
        let date = "2010-07-06T10:30:10.000Z"
            .parse::<DateTime<Utc>>()
            .unwrap();
        let encoded = encode_value(&Value::Date(date), None);

        assert_eq!(encoded.value, json!("2010-07-06T10:30:10"));
        assert_eq!(encoded.value_type.as_deref(), Some("date"));
    }

    #[test]
    fn roundtrip_nested_json() {
        let nested = json!({ "id": "1111", "aList": ["A", "B"] });

        assert_eq!(roundtrip(Value::Json(nested.clone())), Value::Json(nested));
    }

    #[test]
    fn json_encodes_as_stringified_text() {
        let encoded = encode_value(&Value::Json(json!({ "name": "Walter" })), None);

        assert_eq!(encoded.value_type.as_deref(), Some("json"));
        assert_eq!(encoded.value, json!(r#"{"name":"Walter"}"#));
    }

    #[test]
    fn object_envelope_is_preserved_across_roundtrip() {
        let mut value_info = serde_json::Map::new();
        value_info.insert(
            "serializationDataFormat".to_string(),
            json!("application/json"),
        );
        value_info.insert("objectTypeName".to_string(), json!("my.example.Customer"));

        let fetched = ValueDescriptor {
            value: json!(r#"{"name":"Hugo"}"#),
            value_type: Some("Object".to_string()),
            value_info: value_info.clone(),
        };
        let mut original = VariableMap::new();
        original.insert("existingUser".to_string(), fetched.clone());

        // handler sees the deserialized object
        let decoded = decode_variables(&original);
        assert_eq!(
            decoded.get("existingUser"),
            Some(&Value::Json(json!({ "name": "Hugo" })))
        );

        // updated value goes back out with the original envelope
        let mut updated = Variables::new();
        updated.insert(
            "existingUser".to_string(),
            Value::Json(json!({ "name": "Hugo", "age": 31 })),
        );
        let encoded = encode_variables(&updated, &original);
        let descriptor = encoded.get("existingUser").unwrap();

        assert_eq!(descriptor.value_type.as_deref(), Some("Object"));
        assert_eq!(descriptor.value_info, value_info);
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(descriptor.value.as_str().unwrap()).unwrap(),
            json!({ "name": "Hugo", "age": 31 })
        );
    }

    #[test]
    fn serialized_value_passes_through_untouched() {
        let descriptor = ValueDescriptor {
            value: json!("\"hello world\""),
            value_type: Some("Object".to_string()),
            value_info: serde_json::Map::from_iter([(
                "objectTypeName".to_string(),
                json!("java.lang.String"),
            )]),
        };

        let encoded = encode_value(&Value::Serialized(descriptor.clone()), None);

        assert_eq!(encoded, descriptor);
    }

    #[test]
    fn unknown_type_decodes_as_passthrough() {
        let descriptor = ValueDescriptor::new(json!("AQID"), "Bytes");

        assert_eq!(
            decode_value(&descriptor),
            Value::Serialized(descriptor.clone())
        );
        // and survives re-encoding
        assert_eq!(
            encode_value(&decode_value(&descriptor), None),
            descriptor
        );
    }

    #[test]
    fn descriptor_wire_shape() {
        let descriptor = ValueDescriptor::new(json!(1), "integer");
        let wire = serde_json::to_value(&descriptor).unwrap();

        assert_eq!(wire, json!({ "value": 1, "type": "integer" }));
    }
}
