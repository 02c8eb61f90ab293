//! JSON-bearing columns.
//!
//! Aggregated output, page entries, usage, warnings and event context are
//! stored as TEXT. Reads never fail on bad JSON: text that does not parse is
//! kept verbatim as `Raw` so a corrupted row still renders.

use serde::de::DeserializeOwned;
use serde::{Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum StructuredValue {
    Json(Value),
    Raw(String),
}

impl StructuredValue {
    /// Parse a nullable TEXT column.
    pub fn from_column(text: Option<String>) -> Option<Self> {
        let text = text?;
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => Some(Self::Json(value)),
            Err(_) => Some(Self::Raw(text)),
        }
    }

    pub fn to_column(&self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Raw(text) => text.clone(),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Raw(_) => None,
        }
    }

    /// Decode the JSON form into `T`. `None` for raw text or a shape mismatch.
    pub fn decode<T: DeserializeOwned>(&self) -> Option<T> {
        self.as_json()
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }
}

impl From<Value> for StructuredValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl Serialize for StructuredValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Json(value) => value.serialize(serializer),
            Self::Raw(text) => serializer.serialize_str(text),
        }
    }
}

/// Parse a TEXT column holding a JSON string array. Non-string items keep
/// their JSON text; a column that is not an array is kept whole.
pub fn string_list_from_column(text: &str) -> Vec<String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => s,
                other => other.to_string(),
            })
            .collect(),
        Ok(Value::String(s)) => vec![s],
        Ok(Value::Null) => Vec::new(),
        _ if text.trim().is_empty() => Vec::new(),
        _ => vec![text.to_string()],
    }
}

pub fn string_list_to_column(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".into())
}
