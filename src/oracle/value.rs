use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tagged oracle output value. Field lookup always goes through
/// [`OracleData::get`], so "field absent" is an explicit `None` for every
/// consumer instead of an implicit coercion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OracleValue {
    Null,
    Bool(bool),
    String(String),
    Number(Decimal),
}

impl OracleValue {
    /// Numeric coercion used by comparisons. Non-numeric values coerce to
    /// None and fail every operator except a bare existence check.
    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            OracleValue::Number(n) => Some(*n),
            OracleValue::String(s) => s.trim().parse::<Decimal>().ok(),
            OracleValue::Bool(_) | OracleValue::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, OracleValue::Null)
    }

    pub fn from_json(value: &serde_json::Value) -> Option<OracleValue> {
        match value {
            serde_json::Value::Null => Some(OracleValue::Null),
            serde_json::Value::Bool(b) => Some(OracleValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(OracleValue::Number(Decimal::from(i)))
                } else {
                    n.as_f64().and_then(Decimal::from_f64).map(OracleValue::Number)
                }
            }
            serde_json::Value::String(s) => Some(OracleValue::String(s.clone())),
            // nested structures are not part of the oracle data contract
            serde_json::Value::Array(_) | serde_json::Value::Object(_) => None,
        }
    }
}

/// Flat mapping of field name -> tagged value produced by an oracle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OracleData(pub HashMap<String, OracleValue>);

impl OracleData {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, field: &str) -> Option<&OracleValue> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: OracleValue) {
        self.0.insert(field.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Build from an arbitrary JSON object, ignoring nested values
    pub fn from_json(value: &serde_json::Value) -> OracleData {
        let mut data = OracleData::new();
        if let serde_json::Value::Object(map) = value {
            for (k, v) in map {
                if let Some(tagged) = OracleValue::from_json(v) {
                    data.insert(k.clone(), tagged);
                }
            }
        }
        data
    }

    /// Merge fields from `other` that are not already present (first-wins)
    pub fn merge_missing(&mut self, other: &OracleData) {
        for (k, v) in &other.0 {
            self.0.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
}
