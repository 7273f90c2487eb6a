//! Conversions between the typed [`Settings`] and its category tree, and the
//! tolerant merge used when loading rows or importing files.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use super::model::{
    DebugSettings, GeneralSettings, MiscSettings, OcrSettings, RacingSettings, Settings,
    TrainingEventSettings, TrainingSettings, TrainingStatTargetSettings,
};
use crate::db::{SettingEntry, StoredSettings};
use crate::error::SettingsError;

/// Category name to flat `key -> value` object. Same shape as the rows.
pub type SettingsTree = StoredSettings;

/// A stored or imported value that could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedSetting {
    pub category: String,
    /// `None` when the whole category was rejected.
    pub key: Option<String>,
    pub reason: String,
}

impl std::fmt::Display for RejectedSetting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}.{}: {}", self.category, key, self.reason),
            None => write!(f, "{}: {}", self.category, self.reason),
        }
    }
}

pub fn to_tree(settings: &Settings) -> Result<SettingsTree, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(settings)?)
}

pub fn from_tree(tree: &SettingsTree) -> Result<Settings, serde_json::Error> {
    serde_json::from_value(serde_json::to_value(tree)?)
}

/// Stored rows as a JSON object, ready for [`overlay`].
pub fn stored_to_object(stored: &StoredSettings) -> Map<String, Value> {
    stored
        .iter()
        .map(|(category, entries)| (category.clone(), Value::Object(entries.clone())))
        .collect()
}

fn check<T: DeserializeOwned>(key: &str, value: &Value) -> Result<(), serde_json::Error> {
    let mut probe = Map::new();
    probe.insert(key.to_string(), value.clone());
    serde_json::from_value::<T>(Value::Object(probe)).map(|_| ())
}

/// Validate one value against the type of `category.key`.
///
/// Returns `None` for a category this build does not know.
fn check_value(category: &str, key: &str, value: &Value) -> Option<Result<(), serde_json::Error>> {
    let result = match category {
        "general" => check::<GeneralSettings>(key, value),
        "racing" => check::<RacingSettings>(key, value),
        "training" => check::<TrainingSettings>(key, value),
        "trainingEvent" => check::<TrainingEventSettings>(key, value),
        "trainingStatTarget" => check::<TrainingStatTargetSettings>(key, value),
        "ocr" => check::<OcrSettings>(key, value),
        "debug" => check::<DebugSettings>(key, value),
        "misc" => check::<MiscSettings>(key, value),
        _ => return None,
    };
    Some(result)
}

/// Apply a single value to a copy of the tree, validating key and type.
pub fn apply_value(
    settings: &Settings,
    category: &str,
    key: &str,
    value: Value,
) -> Result<Settings, SettingsError> {
    let mut tree = to_tree(settings)?;
    let unknown = || SettingsError::UnknownSetting {
        category: category.to_string(),
        key: key.to_string(),
    };

    let entries = tree.get_mut(category).ok_or_else(unknown)?;
    if !entries.contains_key(key) {
        return Err(unknown());
    }

    match check_value(category, key, &value) {
        Some(Ok(())) => {}
        Some(Err(err)) => {
            return Err(SettingsError::InvalidValue {
                category: category.to_string(),
                key: key.to_string(),
                reason: err.to_string(),
            })
        }
        None => return Err(unknown()),
    }

    entries.insert(key.to_string(), value);
    Ok(from_tree(&tree)?)
}

/// Merge `incoming` onto `base` key by key.
///
/// Keys missing from `incoming` keep the value from `base`. Unknown categories,
/// unknown keys, non-object categories and values of the wrong type are skipped
/// and returned as rejections instead of failing the whole merge.
pub fn overlay(
    base: &Settings,
    incoming: &Map<String, Value>,
) -> Result<(Settings, Vec<RejectedSetting>), serde_json::Error> {
    let mut tree = to_tree(base)?;
    let mut rejected = Vec::new();

    for (category, section) in incoming {
        let Some(entries) = tree.get_mut(category) else {
            rejected.push(RejectedSetting {
                category: category.clone(),
                key: None,
                reason: "unknown category".into(),
            });
            continue;
        };

        let Value::Object(section) = section else {
            rejected.push(RejectedSetting {
                category: category.clone(),
                key: None,
                reason: "expected an object".into(),
            });
            continue;
        };

        for (key, value) in section {
            if !entries.contains_key(key) {
                rejected.push(RejectedSetting {
                    category: category.clone(),
                    key: Some(key.clone()),
                    reason: "unknown key".into(),
                });
                continue;
            }

            match check_value(category, key, value) {
                Some(Ok(())) => {
                    entries.insert(key.clone(), value.clone());
                }
                Some(Err(err)) => rejected.push(RejectedSetting {
                    category: category.clone(),
                    key: Some(key.clone()),
                    reason: err.to_string(),
                }),
                None => rejected.push(RejectedSetting {
                    category: category.clone(),
                    key: None,
                    reason: "unknown category".into(),
                }),
            }
        }
    }

    Ok((from_tree(&tree)?, rejected))
}

/// Entries of `merged` that have no row in `stored`.
pub fn missing_entries(merged: &SettingsTree, stored: &StoredSettings) -> Vec<SettingEntry> {
    merged
        .iter()
        .flat_map(|(category, entries)| {
            let present = stored.get(category);
            entries
                .iter()
                .filter(move |(key, _)| present.map_or(true, |rows| !rows.contains_key(*key)))
                .map(move |(key, value)| SettingEntry::new(category.clone(), key.clone(), value.clone()))
        })
        .collect()
}

/// Parse the legacy `settings.json`, ignoring anything after the first
/// complete value.
///
/// Files interrupted mid-write usually end with garbage after an otherwise
/// complete object. Any prefix that parses on its own is that first value, so
/// a single streaming pass finds it.
pub fn recover_legacy_json(text: &str) -> Option<Map<String, Value>> {
    match serde_json::Deserializer::from_str(text).into_iter::<Value>().next() {
        Some(Ok(Value::Object(object))) => Some(object),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    #[test]
    fn test_tree_round_trip() {
        let mut settings = Settings::default();
        settings.general.scenario = "URA Finale".into();
        settings.training.training_blacklist = vec!["Guts".into()];

        let tree = to_tree(&settings).unwrap();
        assert_eq!(tree["general"]["scenario"], json!("URA Finale"));
        assert_eq!(from_tree(&tree).unwrap(), settings);
    }

    #[test]
    fn test_overlay_fills_missing_keys_per_key() {
        let incoming = object(json!({
            "training": { "maximumFailureChance": 35 },
            "general": { "scenario": "URA Finale" }
        }));

        let (merged, rejected) = overlay(&Settings::default(), &incoming).unwrap();

        assert!(rejected.is_empty());
        assert_eq!(merged.training.maximum_failure_chance, 35);
        assert_eq!(merged.training.stat_prioritization, Settings::default().training.stat_prioritization);
        assert_eq!(merged.general.scenario, "URA Finale");
        assert_eq!(merged.ocr, Settings::default().ocr);
    }

    #[test]
    fn test_overlay_rejects_bad_entries_individually() {
        let incoming = object(json!({
            "training": { "maximumFailureChance": "high", "disableTrainingOnMaxedStat": false },
            "racing": { "noSuchKey": true },
            "graphics": { "fps": 60 },
            "ocr": 5
        }));

        let (merged, rejected) = overlay(&Settings::default(), &incoming).unwrap();

        assert_eq!(merged.training.maximum_failure_chance, 20);
        assert!(!merged.training.disable_training_on_maxed_stat);

        let labels: Vec<String> = rejected
            .iter()
            .map(|r| format!("{}/{}", r.category, r.key.as_deref().unwrap_or("*")))
            .collect();
        assert_eq!(
            labels,
            vec!["graphics/*", "ocr/*", "racing/noSuchKey", "training/maximumFailureChance"]
        );
    }

    #[test]
    fn test_apply_value_validates() {
        let base = Settings::default();

        let updated = apply_value(&base, "ocr", "ocrThreshold", json!(200)).unwrap();
        assert_eq!(updated.ocr.ocr_threshold, 200);

        let err = apply_value(&base, "ocr", "ocrThreshold", json!(200.5)).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue { .. }));

        let err = apply_value(&base, "ocr", "gamma", json!(1)).unwrap_err();
        assert!(matches!(err, SettingsError::UnknownSetting { .. }));

        let err = apply_value(&base, "audio", "volume", json!(1)).unwrap_err();
        assert!(matches!(err, SettingsError::UnknownSetting { .. }));
    }

    #[test]
    fn test_missing_entries_lists_unstored_keys() {
        let merged = to_tree(&Settings::default()).unwrap();
        let mut stored = merged.clone();
        stored.get_mut("misc").unwrap().clear();
        stored.remove("ocr");

        let missing = missing_entries(&merged, &stored);
        let keys: Vec<String> = missing
            .iter()
            .map(|entry| format!("{}.{}", entry.category, entry.key))
            .collect();
        assert_eq!(
            keys,
            vec![
                "misc.formattedSettingsString",
                "ocr.enableAutomaticOCRRetry",
                "ocr.ocrConfidence",
                "ocr.ocrThreshold",
            ]
        );
    }

    #[test]
    fn test_recover_truncated_legacy_file() {
        let text = r#"{"general":{"scenario":"URA Finale"}}"ngs":{"#;
        let recovered = recover_legacy_json(text).unwrap();
        assert_eq!(recovered["general"]["scenario"], json!("URA Finale"));

        assert!(recover_legacy_json("not json at all").is_none());
        assert!(recover_legacy_json("").is_none());
        assert!(recover_legacy_json("[1, 2]").is_none());

        let twice = r#"{"misc":{"enableSettingsDisplay":true}}{"misc":{}}"#;
        let recovered = recover_legacy_json(twice).unwrap();
        assert_eq!(recovered["misc"]["enableSettingsDisplay"], json!(true));
    }

    #[test]
    fn test_recover_large_legacy_file_is_linear() {
        let events: Map<String, Value> = (0..4000)
            .map(|i| {
                (
                    format!("Character {i}"),
                    json!({ "Event A": 1, "Event B": 2, "Event C": [1, 2, 3] }),
                )
            })
            .collect();
        let full = serde_json::to_string(&json!({
            "general": { "scenario": "URA Finale" },
            "trainingEvent": { "characterEventData": events },
        }))
        .unwrap();
        assert!(full.len() > 100_000);

        let started = std::time::Instant::now();

        let truncated = &full[..full.len() / 2];
        assert!(recover_legacy_json(truncated).is_none());

        let with_garbage = format!("{full}\0\0ngs\":{{\"ocr");
        let recovered = recover_legacy_json(&with_garbage).unwrap();
        assert_eq!(recovered["general"]["scenario"], json!("URA Finale"));
        assert_eq!(
            recovered["trainingEvent"]["characterEventData"]
                .as_object()
                .unwrap()
                .len(),
            4000
        );

        assert!(
            started.elapsed() < std::time::Duration::from_secs(2),
            "recovery took {:?}",
            started.elapsed()
        );
    }
}
