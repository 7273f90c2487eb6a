use serde_json::{Map, Value};

use super::document::{to_tree, SettingsTree};
use super::model::Settings;
use crate::db::SettingEntry;

/// Category -> changed keys. Empty means nothing needs saving.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSet(SettingsTree);

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.0.values().all(Map::is_empty)
    }

    /// Number of changed keys across all categories.
    pub fn len(&self) -> usize {
        self.0.values().map(Map::len).sum()
    }

    pub fn category(&self, name: &str) -> Option<&Map<String, Value>> {
        self.0.get(name)
    }

    pub fn as_tree(&self) -> &SettingsTree {
        &self.0
    }

    pub fn into_entries(self) -> Vec<SettingEntry> {
        self.0
            .into_iter()
            .flat_map(|(category, entries)| {
                entries
                    .into_iter()
                    .map(move |(key, value)| SettingEntry::new(category.clone(), key, value))
            })
            .collect()
    }
}

/// Keys of `current` whose value differs from `last_saved`.
///
/// Objects compare order-independently and arrays order-sensitively. Keys or
/// categories present only in the baseline are never reported.
pub fn diff_trees(current: &SettingsTree, last_saved: Option<&SettingsTree>) -> ChangeSet {
    let Some(last_saved) = last_saved else {
        return ChangeSet(
            current
                .iter()
                .filter(|(_, entries)| !entries.is_empty())
                .map(|(category, entries)| (category.clone(), entries.clone()))
                .collect(),
        );
    };

    let mut changes = SettingsTree::new();
    for (category, entries) in current {
        let changed: Map<String, Value> = match last_saved.get(category) {
            None => entries.clone(),
            Some(saved) => entries
                .iter()
                .filter(|(key, value)| saved.get(*key) != Some(*value))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        };

        if !changed.is_empty() {
            changes.insert(category.clone(), changed);
        }
    }

    ChangeSet(changes)
}

pub fn diff(current: &Settings, last_saved: Option<&Settings>) -> Result<ChangeSet, serde_json::Error> {
    let current = to_tree(current)?;
    let baseline = last_saved.map(to_tree).transpose()?;
    Ok(diff_trees(&current, baseline.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tree(value: Value) -> SettingsTree {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_no_baseline_returns_whole_document() {
        let settings = Settings::default();
        let changes = diff(&settings, None).unwrap();
        assert_eq!(changes.as_tree(), &to_tree(&settings).unwrap());
    }

    #[test]
    fn test_identical_documents_have_no_changes() {
        let settings = Settings::default();
        let changes = diff(&settings, Some(&settings)).unwrap();
        assert!(changes.is_empty());
        assert_eq!(changes.len(), 0);
    }

    #[test]
    fn test_single_key_change_is_isolated() {
        let baseline = Settings::default();
        let mut current = baseline.clone();
        current.training.maximum_failure_chance = 35;

        let changes = diff(&current, Some(&baseline)).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(
            changes.into_entries(),
            vec![SettingEntry::new("training", "maximumFailureChance", json!(35))]
        );
    }

    #[test]
    fn test_category_missing_from_baseline_is_sent_whole() {
        let current = tree(json!({
            "ocr": { "ocrThreshold": 230, "ocrConfidence": 80 },
            "misc": { "formattedSettingsString": "" }
        }));
        let baseline = tree(json!({ "misc": { "formattedSettingsString": "" } }));

        let changes = diff_trees(&current, Some(&baseline));
        assert_eq!(changes.as_tree(), &tree(json!({ "ocr": { "ocrThreshold": 230, "ocrConfidence": 80 } })));
    }

    #[test]
    fn test_baseline_only_keys_are_ignored() {
        let current = tree(json!({ "racing": { "enableFarmingFans": true } }));
        let baseline = tree(json!({
            "racing": { "enableFarmingFans": true, "removedKey": 1 },
            "legacy": { "anything": "x" }
        }));

        assert!(diff_trees(&current, Some(&baseline)).is_empty());
    }

    #[test]
    fn test_object_order_is_ignored_but_array_order_is_not() {
        let baseline = tree(json!({
            "trainingEvent": { "characterEventData": { "a": 1, "b": 2 } },
            "training": { "statPrioritization": ["Speed", "Wit"] }
        }));
        let current = tree(json!({
            "trainingEvent": { "characterEventData": { "b": 2, "a": 1 } },
            "training": { "statPrioritization": ["Wit", "Speed"] }
        }));

        let changes = diff_trees(&current, Some(&baseline));
        assert_eq!(changes.len(), 1);
        assert!(changes.category("trainingEvent").is_none());
        assert_eq!(
            changes.category("training").unwrap()["statPrioritization"],
            json!(["Wit", "Speed"])
        );
    }
}
