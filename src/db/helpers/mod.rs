use anyhow::Error;
use serde_json::Value;

use crate::db::models::ValueKind;
use crate::error::SettingsError;

/// Text form written to the `value` column plus its type tag.
///
/// Strings are stored raw and everything else as JSON, which is the format the
/// automation service reads (`"35"`, `"true"`, `["Speed","Wit"]`).
pub fn encode_value(value: &Value) -> (String, ValueKind) {
    let kind = ValueKind::of(value);
    let text = match value {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    (text, kind)
}

/// Inverse of [`encode_value`].
///
/// Untagged rows (older builds, the automation service) fall back to "parse as
/// JSON, otherwise keep the raw string".
pub fn decode_value(raw: &str, kind: Option<ValueKind>) -> Value {
    match kind {
        Some(ValueKind::String) => Value::String(raw.to_string()),
        _ => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
    }
}

/// Recover a [`SettingsError`] carried inside an `anyhow` chain, or wrap the
/// error with `fallback`.
pub fn into_settings_error(err: Error, fallback: impl FnOnce(String) -> SettingsError) -> SettingsError {
    match err.downcast::<SettingsError>() {
        Ok(settings_err) => settings_err,
        Err(other) => fallback(format!("{other:#}")),
    }
}
