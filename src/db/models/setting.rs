//! Persisted settings rows.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Rows grouped by category, as returned by `load_all`.
pub type StoredSettings = BTreeMap<String, Map<String, Value>>;

/// One value to write, keyed by `(category, key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingEntry {
    pub category: String,
    pub key: String,
    pub value: Value,
}

impl SettingEntry {
    pub fn new(category: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            category: category.into(),
            key: key.into(),
            value,
        }
    }
}

/// Type tag stored next to each value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ValueKind {
    String,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl ValueKind {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => ValueKind::String,
            Value::Number(_) => ValueKind::Number,
            Value::Bool(_) => ValueKind::Boolean,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Null => ValueKind::Null,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Null => "null",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "string" => Some(ValueKind::String),
            "number" => Some(ValueKind::Number),
            "boolean" => Some(ValueKind::Boolean),
            "array" => Some(ValueKind::Array),
            "object" => Some(ValueKind::Object),
            "null" => Some(ValueKind::Null),
            _ => None,
        }
    }
}

/// A full row from the `settings` table.
///
/// Timestamps stay as text: rows written by the automation service use
/// SQLite's `CURRENT_TIMESTAMP` format rather than RFC 3339.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingRow {
    pub id: i64,
    pub category: String,
    pub key: String,
    pub value: Value,
    pub value_type: Option<ValueKind>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}
