//! Error types for the settings core.
//!
//! The database layer works with `anyhow` internally and maps into
//! [`SettingsError`] at the store boundary, so callers only ever see the
//! variants below. Every variant is recoverable by retrying the action that
//! triggered it.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    /// The database handle is missing, closed, or could not be opened.
    #[error("Settings storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A batch write failed after exhausting its retries.
    #[error("Failed to persist settings after {attempts} attempt(s): {reason}")]
    PersistFailed { attempts: u32, reason: String },

    /// Reading rows back from the database failed.
    #[error("Failed to load settings: {0}")]
    LoadFailed(String),

    /// The import file could not be read or is not a JSON object.
    #[error("Failed to import settings from {path}: {reason}")]
    ImportFailed { path: String, reason: String },

    /// Writing the export file failed.
    #[error("Failed to export settings to {path}: {reason}")]
    ExportFailed { path: String, reason: String },

    #[error("Unknown setting {category}.{key}")]
    UnknownSetting { category: String, key: String },

    #[error("Invalid value for {category}.{key}: {reason}")]
    InvalidValue {
        category: String,
        key: String,
        reason: String,
    },

    #[error("Settings serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SettingsError {
    pub(crate) fn import_failed(path: &Path, reason: impl std::fmt::Display) -> Self {
        SettingsError::ImportFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn export_failed(path: &Path, reason: impl std::fmt::Display) -> Self {
        SettingsError::ExportFailed {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn is_storage_unavailable(&self) -> bool {
        matches!(self, SettingsError::StorageUnavailable(_))
    }
}

/// Serialized as the message string so a UI bridge can show it directly.
impl Serialize for SettingsError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persist_failed_display() {
        let err = SettingsError::PersistFailed {
            attempts: 4,
            reason: "disk I/O error".into(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to persist settings after 4 attempt(s): disk I/O error"
        );
    }

    #[test]
    fn test_import_failed_carries_path() {
        let err = SettingsError::import_failed(Path::new("/tmp/broken.json"), "expected value");
        let message = err.to_string();
        assert!(message.contains("/tmp/broken.json"));
        assert!(message.contains("expected value"));
    }

    #[test]
    fn test_error_serializes_as_message() {
        let err = SettingsError::StorageUnavailable("database closed".into());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Settings storage unavailable: database closed\"");
    }

    #[test]
    fn test_from_serde_json_error() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SettingsError = parse_err.into();
        assert!(matches!(err, SettingsError::Serialization(_)));
        assert!(!err.is_storage_unavailable());
    }
}
