//! Raw and typed record representations.

use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

/// Field name → raw string value, in arrival order.
pub type RawFields = IndexMap<String, String>;

/// A typed field value of an [`OutputRecord`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    /// Unix timestamp in seconds.
    EpochSeconds(i64),
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) | Self::EpochSeconds(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(v) | Self::EpochSeconds(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
        }
    }
}

/// Correlation key shared by every record derived from one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationKey {
    pub tx_hash: Option<String>,
    pub timestamp: Option<i64>,
}

/// A finished, typed document ready for the sink.
///
/// Built once by the normalizer and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct OutputRecord {
    fields: IndexMap<String, FieldValue>,
}

impl OutputRecord {
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn tx_hash(&self) -> Option<&str> {
        self.get("tx_hash").and_then(FieldValue::as_str)
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.get("timestamp").and_then(FieldValue::as_i64)
    }

    /// `None` when the record carries neither a tx hash nor a timestamp.
    pub fn correlation_key(&self) -> Option<CorrelationKey> {
        let tx_hash = self.tx_hash().map(str::to_string);
        let timestamp = self.timestamp();
        if tx_hash.is_none() && timestamp.is_none() {
            return None;
        }
        Some(CorrelationKey { tx_hash, timestamp })
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), field_to_json(v)))
                .collect(),
        )
    }
}

impl FromIterator<(String, FieldValue)> for OutputRecord {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

fn field_to_json(value: &FieldValue) -> serde_json::Value {
    match value {
        FieldValue::Str(s) => serde_json::Value::String(s.clone()),
        FieldValue::Int(v) | FieldValue::EpochSeconds(v) => serde_json::Value::from(*v),
        FieldValue::Float(v) => serde_json::Number::from_f64(*v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        FieldValue::Bool(v) => serde_json::Value::Bool(*v),
    }
}
