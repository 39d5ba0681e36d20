use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::CoreError;
use crate::ids::*;

/// Key-ordered view of a JSON value. Object keys are sorted recursively so two
/// payloads that differ only in key order encode identically.
#[derive(Serialize)]
#[serde(untagged)]
enum Canonical<'a> {
    Null,
    Bool(bool),
    Number(&'a Number),
    String(&'a str),
    Array(Vec<Canonical<'a>>),
    Object(BTreeMap<&'a str, Canonical<'a>>),
}

impl<'a> Canonical<'a> {
    fn of(value: &'a Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.iter().map(Self::of).collect()),
            Value::Object(map) => Self::Object(Self::object(map)),
        }
    }

    fn object(map: &'a Map<String, Value>) -> BTreeMap<&'a str, Canonical<'a>> {
        map.iter().map(|(k, v)| (k.as_str(), Self::of(v))).collect()
    }
}

/// blake3 digest of the canonical msgpack encoding of a record payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn to_hex(&self) -> String {
        blake3::Hash::from_bytes(self.0).to_hex().to_string()
    }

    pub fn from_hex(hex: &str) -> Result<Self, CoreError> {
        let hash = blake3::Hash::from_hex(hex)
            .map_err(|e| CoreError::InvalidData(format!("invalid fingerprint: {e}")))?;
        Ok(Self(*hash.as_bytes()))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:02x}{:02x}...)", self.0[0], self.0[1])
    }
}

/// Canonical form of submitted record data: stable JSON text plus digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalData {
    pub json: String,
    pub fingerprint: Fingerprint,
}

impl CanonicalData {
    pub fn of(data: &Map<String, Value>) -> Result<Self, CoreError> {
        let canonical = Canonical::object(data);
        let bytes = rmp_serde::to_vec(&canonical)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        let fingerprint = Fingerprint(*blake3::hash(&bytes).as_bytes());
        let json = serde_json::to_string(&canonical)
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(Self { json, fingerprint })
    }
}

/// A submitted value together with the field metadata it was captured under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedValue {
    pub value: Value,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub section_id: SectionId,
    pub section_title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subform_id: Option<SubformId>,
    pub description: Option<String>,
    pub placeholder: Option<String>,
    pub options: Option<Value>,
    pub validation: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormRecord {
    pub id: RecordId,
    pub form_id: FormId,
    pub record_data: BTreeMap<String, EnrichedValue>,
    pub submitted_by: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl FormRecord {
    /// Raw submitted values keyed by field id.
    pub fn raw_values(&self) -> BTreeMap<&str, &Value> {
        self.record_data
            .iter()
            .map(|(k, v)| (k.as_str(), &v.value))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn key_order_does_not_change_fingerprint() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"y": [1, 2], "x": null}}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{ "a": {"x": null, "y": [1,2]},  "b": 1 }"#).unwrap();
        let ca = CanonicalData::of(&object(a)).unwrap();
        let cb = CanonicalData::of(&object(b)).unwrap();
        assert_eq!(ca, cb);
        assert_eq!(ca.json, r#"{"a":{"x":null,"y":[1,2]},"b":1}"#);
    }

    #[test]
    fn different_values_differ() {
        let ca = CanonicalData::of(&object(json!({"fld_1": "Alice"}))).unwrap();
        let cb = CanonicalData::of(&object(json!({"fld_1": "alice"}))).unwrap();
        assert_ne!(ca.fingerprint, cb.fingerprint);
    }

    #[test]
    fn fingerprint_hex_round_trip() {
        let c = CanonicalData::of(&object(json!({"fld_1": 3}))).unwrap();
        let hex = c.fingerprint.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), c.fingerprint);
        assert!(Fingerprint::from_hex("zz").is_err());
    }
}
