use std::path::{Path, PathBuf};

use chrono::Local;
use serde::Serialize;
use serde_json::{json, Value};

use super::coordinator::{DebouncedSave, SaveCoordinator, SaveOutcome, SaveStatus};
use super::diff::diff;
use super::document::{self, RejectedSetting};
use super::model::Settings;
use super::state::SettingsState;
use crate::config::AppConfig;
use crate::db::{Database, SettingsStore};
use crate::error::{Result, SettingsError};
use crate::message_log::{MessageLevel, MessageLog};
use crate::utils::perf::{PerfCategory, PerfLogger};
use crate::{log_error, log_info, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "[SETTINGS]";

/// Entry point for everything that reads or changes settings.
///
/// Owns the state holder and the save coordinator; views mutate settings only
/// through [`SettingsManager::update`] or [`SettingsManager::set_value`].
pub struct SettingsManager<S = Database> {
    store: S,
    coordinator: SaveCoordinator<S>,
    state: SettingsState,
    messages: MessageLog,
    perf: PerfLogger,
    legacy_path: Option<PathBuf>,
    export_dir: PathBuf,
}

impl<S: Clone> Clone for SettingsManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            coordinator: self.coordinator.clone(),
            state: self.state.clone(),
            messages: self.messages.clone(),
            perf: self.perf.clone(),
            legacy_path: self.legacy_path.clone(),
            export_dir: self.export_dir.clone(),
        }
    }
}

impl<S: SettingsStore> SettingsManager<S> {
    pub fn new(store: S, config: &AppConfig, messages: MessageLog, perf: PerfLogger) -> Self {
        let coordinator =
            SaveCoordinator::new(store.clone(), config.save_debounce, messages.clone(), perf.clone());
        Self {
            store,
            coordinator,
            state: SettingsState::new(),
            messages,
            perf,
            legacy_path: Some(config.legacy_settings_path()),
            export_dir: config.export_dir().to_path_buf(),
        }
    }

    pub fn state(&self) -> &SettingsState {
        &self.state
    }

    pub fn current(&self) -> Settings {
        self.state.current()
    }

    pub fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    pub fn save_status(&self) -> SaveStatus {
        self.coordinator.status()
    }

    pub fn coordinator(&self) -> &SaveCoordinator<S> {
        &self.coordinator
    }

    /// Load settings from the database, merged onto the defaults.
    ///
    /// On first run the database is seeded from the legacy `settings.json`
    /// when present, otherwise from the defaults. Seeding is best effort.
    pub async fn load(&self) -> Result<Settings> {
        let timing = self.perf.start_timing("load settings", PerfCategory::Settings);

        if let Err(err) = self.store.initialize().await {
            return Err(self.report("Failed to initialize settings database", err));
        }

        let stored = match self.store.load_all().await {
            Ok(stored) => stored,
            Err(err) => return Err(self.report("Failed to load settings from database", err)),
        };

        let first_run = stored.is_empty();
        let (settings, baseline) = if first_run {
            let settings = self.read_legacy_settings().await.unwrap_or_default();
            let seeded = self.seed(&settings).await;
            (settings.clone(), seeded.then_some(settings))
        } else {
            let (settings, rejected) =
                match document::overlay(&Settings::default(), &document::stored_to_object(&stored)) {
                    Ok(merged) => merged,
                    Err(err) => {
                        return Err(self.report("Failed to load settings from database", err.into()))
                    }
                };
            self.warn_rejected("Ignoring stored setting", &rejected);

            let complete = self.fill_missing_rows(&settings, &stored).await;
            (settings.clone(), complete.then_some(settings))
        };

        self.coordinator.set_baseline(baseline);
        self.state.mark_loaded();
        self.state.publish(settings.clone());

        timing.finish(Some(json!({ "firstRun": first_run, "categories": stored.len() })));
        log_info!("Settings loaded (first run: {first_run})");
        Ok(settings)
    }

    /// Schedule a debounced save of `settings`, or of the current document.
    pub fn save(&self, settings: Option<Settings>) -> DebouncedSave {
        let settings = settings.unwrap_or_else(|| self.state.current());
        self.coordinator.request_debounced_save(settings)
    }

    /// Save without waiting for the debounce timer, e.g. when the app is
    /// backgrounded.
    pub async fn save_immediate(&self, settings: Option<Settings>) -> Result<SaveOutcome> {
        let settings = settings.unwrap_or_else(|| self.state.current());
        self.coordinator.request_immediate_save(settings).await
    }

    /// Mutate the live document and schedule a save.
    pub fn update<F>(&self, mutate: F) -> DebouncedSave
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self.state.current();
        mutate(&mut settings);
        self.state.publish(settings.clone());
        self.coordinator.request_debounced_save(settings)
    }

    /// Set one value by its stored `category` and `key` names.
    pub fn set_value(&self, category: &str, key: &str, value: Value) -> Result<DebouncedSave> {
        let settings = document::apply_value(&self.state.current(), category, key, value)
            .map_err(|err| self.report("Failed to update setting", err))?;
        self.state.publish(settings.clone());
        Ok(self.coordinator.request_debounced_save(settings))
    }

    /// Replace the settings with the contents of a JSON file.
    ///
    /// Categories and keys missing from the file take their default values.
    /// The live document only changes once the import has been written.
    pub async fn import_from_file(&self, path: &Path) -> Result<Settings> {
        let timing = self.perf.start_timing("import settings", PerfCategory::Settings);

        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| self.report("Failed to import settings", SettingsError::import_failed(path, err)))?;

        let incoming = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                return Err(self.report(
                    "Failed to import settings",
                    SettingsError::import_failed(path, "expected a JSON object"),
                ))
            }
            Err(err) => {
                return Err(self.report(
                    "Failed to import settings",
                    SettingsError::import_failed(path, err),
                ))
            }
        };

        let (settings, rejected) = document::overlay(&Settings::default(), &incoming)
            .map_err(|err| self.report("Failed to import settings", err.into()))?;
        self.warn_rejected("Ignoring imported setting", &rejected);

        self.coordinator.commit(settings.clone()).await?;
        self.state.publish(settings.clone());

        timing.finish(Some(json!({ "path": path.display().to_string(), "rejected": rejected.len() })));
        self.messages.push(
            MessageLevel::Success,
            format!("Settings imported from {}", path.display()),
        );
        Ok(settings)
    }

    /// Write the current document to a timestamped file in the export directory.
    pub async fn export_to_file(&self) -> Result<PathBuf> {
        let file_name = format!("settings-{}.json", Local::now().format("%Y%m%d-%H%M%S-%3f"));
        let path = self.export_dir.join(file_name);
        self.export_to_path(&path).await?;
        Ok(path)
    }

    pub async fn export_to_path(&self, path: &Path) -> Result<()> {
        let timing = self.perf.start_timing("export settings", PerfCategory::Settings);

        let body = to_pretty_json(&self.state.current())
            .map_err(|err| self.report("Failed to export settings", SettingsError::export_failed(path, err)))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| self.report("Failed to export settings", SettingsError::export_failed(path, err)))?;
        }

        tokio::fs::write(path, body)
            .await
            .map_err(|err| self.report("Failed to export settings", SettingsError::export_failed(path, err)))?;

        timing.finish(Some(json!({ "path": path.display().to_string() })));
        self.messages.push(
            MessageLevel::Success,
            format!("Settings exported to {}", path.display()),
        );
        Ok(())
    }

    /// Make the defaults the stored and live settings.
    pub async fn reset(&self) -> Result<Settings> {
        let settings = Settings::default();
        self.coordinator.commit(settings.clone()).await?;
        self.state.clear_ready();
        self.state.publish(settings.clone());
        self.messages.push(MessageLevel::Info, "Settings reset to defaults");
        Ok(settings)
    }

    /// Delete every stored row. The next save writes the whole document.
    pub async fn clear_all(&self) -> Result<usize> {
        let removed = self
            .store
            .clear_all()
            .await
            .map_err(|err| self.report("Failed to clear settings", err))?;
        self.coordinator.set_baseline(None);
        log_info!("Cleared {removed} stored setting(s)");
        Ok(removed)
    }

    /// Write the current document and release the database.
    pub async fn shutdown(&self) -> Result<()> {
        let result = self.coordinator.commit(self.state.current()).await.map(|_| ());
        self.store.close().await;
        result
    }

    async fn seed(&self, settings: &Settings) -> bool {
        let entries = match diff(settings, None) {
            Ok(changes) => changes.into_entries(),
            Err(err) => {
                log_warn!("Could not serialize initial settings: {err}");
                return false;
            }
        };

        match self.store.save_batch(entries).await {
            Ok(()) => true,
            Err(err) => {
                log_warn!("Failed to seed settings database: {err}");
                self.messages.push(
                    MessageLevel::Warn,
                    format!("Failed to save initial settings to database: {err}"),
                );
                false
            }
        }
    }

    /// Write defaults for keys the database has no row for yet. Returns
    /// whether the database now holds the full document.
    async fn fill_missing_rows(&self, settings: &Settings, stored: &crate::db::StoredSettings) -> bool {
        let tree = match document::to_tree(settings) {
            Ok(tree) => tree,
            Err(err) => {
                log_warn!("Could not serialize settings: {err}");
                return false;
            }
        };

        let missing = document::missing_entries(&tree, stored);
        if missing.is_empty() {
            return true;
        }

        log_info!("Adding {} missing setting(s) to the database", missing.len());
        match self.store.save_batch(missing).await {
            Ok(()) => true,
            Err(err) => {
                log_warn!("Failed to store missing settings: {err}");
                false
            }
        }
    }

    async fn read_legacy_settings(&self) -> Option<Settings> {
        let path = self.legacy_path.as_deref()?;
        let text = tokio::fs::read_to_string(path).await.ok()?;

        let recovered = tokio::task::spawn_blocking(move || document::recover_legacy_json(&text))
            .await
            .unwrap_or_else(|err| {
                log_warn!("Legacy settings recovery task failed: {err}");
                None
            });

        let Some(object) = recovered else {
            log_warn!("Legacy settings at {} could not be recovered", path.display());
            self.messages.push(
                MessageLevel::Warn,
                format!("Could not read legacy settings file {}", path.display()),
            );
            return None;
        };

        match document::overlay(&Settings::default(), &object) {
            Ok((settings, rejected)) => {
                self.warn_rejected("Ignoring legacy setting", &rejected);
                log_info!("Migrating legacy settings from {}", path.display());
                self.messages.push(
                    MessageLevel::Info,
                    format!("Migrated settings from {}", path.display()),
                );
                Some(settings)
            }
            Err(err) => {
                log_warn!("Legacy settings could not be merged: {err}");
                None
            }
        }
    }

    fn warn_rejected(&self, context: &str, rejected: &[RejectedSetting]) {
        for item in rejected {
            log_warn!("{context} {item}");
            self.messages.push(MessageLevel::Warn, format!("{context} {item}"));
        }
    }

    fn report(&self, context: &str, err: SettingsError) -> SettingsError {
        log_error!("{context}: {err}");
        self.messages.push(MessageLevel::Error, format!("{context}: {err}"));
        err
    }
}

#[cfg(test)]
impl<S: SettingsStore> SettingsManager<S> {
    fn without_legacy_file(mut self) -> Self {
        self.legacy_path = None;
        self
    }
}

fn to_pretty_json<T: Serialize>(value: &T) -> std::result::Result<Vec<u8>, serde_json::Error> {
    let mut body = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut body, formatter);
    value.serialize(&mut serializer)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    use super::*;
    use crate::config::RetryPolicy;
    use crate::db::SettingEntry;
    use crate::settings::coordinator::tests::RecordingStore;

    fn test_config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::with_data_dir(dir.path());
        config.save_debounce = Duration::from_millis(20);
        config.retry = RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
        };
        config
    }

    fn sqlite_manager(dir: &TempDir) -> (Database, SettingsManager<Database>, MessageLog) {
        let config = test_config(dir);
        let perf = PerfLogger::default();
        let messages = MessageLog::new();
        let db = Database::new(config.database_path(), config.retry, perf.clone());
        let manager = SettingsManager::new(db.clone(), &config, messages.clone(), perf);
        (db, manager, messages)
    }

    #[tokio::test]
    async fn test_first_load_seeds_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (db, manager, _) = sqlite_manager(&dir);

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded, Settings::default());
        assert!(!manager.is_ready(), "No scenario selected yet");

        let rows = db.load_all_settings().await.unwrap();
        assert_eq!(rows, document::to_tree(&Settings::default()).unwrap());
        assert_eq!(manager.coordinator().baseline(), Some(Settings::default()));
    }

    #[tokio::test]
    async fn test_changed_key_is_the_only_row_written() {
        let dir = tempfile::tempdir().unwrap();
        let (db, manager, _) = sqlite_manager(&dir);
        manager.load().await.unwrap();

        let before = db.list_setting_rows().await.unwrap();

        let outcome = manager
            .update(|settings| settings.training.maximum_failure_chance = 35)
            .outcome()
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Written { entries: 1 });

        let raw: String = db
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT value FROM settings WHERE category = 'training' AND key = 'maximumFailureChance'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert_eq!(raw, "35");

        let after = db.list_setting_rows().await.unwrap();
        let changed: Vec<&str> = before
            .iter()
            .zip(after.iter())
            .filter(|(old, new)| old.value != new.value)
            .map(|(_, new)| new.key.as_str())
            .collect();
        assert_eq!(changed, vec!["maximumFailureChance"]);
    }

    #[tokio::test]
    async fn test_save_reopens_database_after_failed_startup() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("settings.db");
        std::fs::create_dir_all(&db_path).unwrap();
        let (db, manager, _) = sqlite_manager(&dir);

        assert!(manager.load().await.unwrap_err().is_storage_unavailable());
        assert!(!db.is_initialized());

        std::fs::remove_dir_all(&db_path).unwrap();

        let full_document: usize = document::to_tree(&Settings::default())
            .unwrap()
            .values()
            .map(|entries| entries.len())
            .sum();
        let outcome = manager
            .update(|settings| settings.training.maximum_failure_chance = 55)
            .outcome()
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Written { entries: full_document });
        assert!(db.is_initialized());

        let immediate = manager
            .save_immediate(Some({
                let mut settings = manager.current();
                settings.training.maximum_failure_chance = 56;
                settings
            }))
            .await
            .unwrap();
        assert_eq!(immediate, SaveOutcome::Written { entries: 1 });

        let stored = db.load_setting("training", "maximumFailureChance").await.unwrap();
        assert_eq!(stored, Some(json!(56)));
    }

    #[tokio::test]
    async fn test_reload_merges_stored_values_onto_defaults() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (db, _, _) = sqlite_manager(&dir);
            db.initialize().await.unwrap();
            db.save_settings_batch(vec![
                SettingEntry::new("general", "scenario", json!("URA Finale")),
                SettingEntry::new("training", "maximumFailureChance", json!(35)),
                SettingEntry::new("training", "retired", json!(true)),
            ])
            .await
            .unwrap();
            db.close().await;
        }

        let (db, manager, messages) = sqlite_manager(&dir);
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.general.scenario, "URA Finale");
        assert_eq!(loaded.training.maximum_failure_chance, 35);
        assert_eq!(loaded.ocr, Settings::default().ocr);
        assert!(manager.is_ready());
        assert!(messages
            .entries()
            .iter()
            .any(|line| line.contains("training.retired")));

        // Gap-filled keys were written back.
        let stored = db.load_all_settings().await.unwrap();
        assert_eq!(stored["ocr"]["ocrThreshold"], json!(230));
    }

    #[tokio::test]
    async fn test_legacy_settings_file_is_migrated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("settings.json"),
            r#"{"general":{"scenario":"Unity Cup"},"racing":{"daysToRunExtraRaces":7}}garbage"#,
        )
        .unwrap();

        let (db, manager, _) = sqlite_manager(&dir);
        let loaded = manager.load().await.unwrap();

        assert_eq!(loaded.general.scenario, "Unity Cup");
        assert_eq!(loaded.racing.days_to_run_extra_races, 7);
        assert_eq!(
            db.load_setting("racing", "daysToRunExtraRaces").await.unwrap(),
            Some(json!(7))
        );
    }

    #[tokio::test]
    async fn test_export_then_import_restores_document() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, manager, _) = sqlite_manager(&dir);
        manager.load().await.unwrap();

        manager
            .set_value("general", "scenario", json!("URA Finale"))
            .unwrap()
            .outcome()
            .await
            .unwrap();
        manager
            .update(|settings| {
                settings.training.stat_prioritization = vec!["Wit".into(), "Speed".into()];
            })
            .outcome()
            .await
            .unwrap();
        let exported_doc = manager.current();

        let path = manager.export_to_file().await.unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"debug\": {"), "Export uses 4-space indent");

        manager.reset().await.unwrap();
        assert_eq!(manager.current(), Settings::default());
        assert!(!manager.is_ready());

        let imported = manager.import_from_file(&path).await.unwrap();
        assert_eq!(imported, exported_doc);
        assert_eq!(manager.current(), exported_doc);
        assert!(manager.is_ready());
    }

    #[tokio::test]
    async fn test_import_fills_missing_categories_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (db, manager, _) = sqlite_manager(&dir);
        manager.load().await.unwrap();

        let path = dir.path().join("partial.json");
        std::fs::write(&path, r#"{"ocr":{"ocrThreshold":200}}"#).unwrap();

        let imported = manager.import_from_file(&path).await.unwrap();

        let mut expected = Settings::default();
        expected.ocr.ocr_threshold = 200;
        assert_eq!(imported, expected);
        assert_eq!(db.load_setting("ocr", "ocrThreshold").await.unwrap(), Some(json!(200)));
    }

    #[tokio::test]
    async fn test_malformed_import_leaves_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, manager, messages) = sqlite_manager(&dir);
        manager.load().await.unwrap();
        manager.update(|settings| settings.ocr.ocr_confidence = 90);
        let before = manager.current();

        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let err = manager.import_from_file(&path).await.unwrap_err();
        assert!(matches!(err, SettingsError::ImportFailed { .. }));
        assert_eq!(manager.current(), before);
        assert!(messages.last().unwrap().starts_with("[ERROR] Failed to import settings"));

        let missing = manager
            .import_from_file(&dir.path().join("missing.json"))
            .await
            .unwrap_err();
        assert!(matches!(missing, SettingsError::ImportFailed { .. }));
    }

    #[tokio::test]
    async fn test_set_value_rejects_unknown_and_mistyped() {
        let dir = tempfile::tempdir().unwrap();
        let (_db, manager, _) = sqlite_manager(&dir);
        manager.load().await.unwrap();

        assert!(matches!(
            manager.set_value("ocr", "brightness", json!(1)),
            Err(SettingsError::UnknownSetting { .. })
        ));
        assert!(matches!(
            manager.set_value("racing", "enableForceRacing", json!("yes")),
            Err(SettingsError::InvalidValue { .. })
        ));
        assert_eq!(manager.current(), Settings::default());
    }

    #[tokio::test]
    async fn test_shutdown_commits_pending_changes_and_closes() {
        let dir = tempfile::tempdir().unwrap();
        let (db, manager, _) = sqlite_manager(&dir);
        manager.load().await.unwrap();

        let ticket = manager.update(|settings| settings.debug.enable_debug_mode = true);
        manager.shutdown().await.unwrap();

        assert_eq!(ticket.outcome().await.unwrap(), SaveOutcome::Superseded);
        assert!(!db.is_initialized());

        db.initialize().await.unwrap();
        assert_eq!(
            db.load_setting("debug", "enableDebugMode").await.unwrap(),
            Some(json!(true))
        );
    }

    #[tokio::test]
    async fn test_clear_all_forces_full_write() {
        let store = RecordingStore::default();
        let dir = tempfile::tempdir().unwrap();
        let manager =
            SettingsManager::new(store.clone(), &test_config(&dir), MessageLog::new(), PerfLogger::default())
                .without_legacy_file();
        manager.load().await.unwrap();

        assert!(manager.clear_all().await.unwrap() > 0);
        assert_eq!(manager.coordinator().baseline(), None);

        let outcome = manager.save_immediate(None).await.unwrap();
        let full = diff(&Settings::default(), None).unwrap().len();
        assert_eq!(outcome, SaveOutcome::Written { entries: full });
    }

    #[tokio::test]
    async fn test_failed_seed_is_not_fatal() {
        let store = RecordingStore::default();
        store.fail.store(true, std::sync::atomic::Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let messages = MessageLog::new();
        let manager = SettingsManager::new(store.clone(), &test_config(&dir), messages.clone(), PerfLogger::default())
            .without_legacy_file();

        let loaded = manager.load().await.unwrap();
        assert_eq!(loaded, Settings::default());
        assert_eq!(manager.coordinator().baseline(), None);
        assert!(messages.last().unwrap().starts_with("[WARN]"));
    }
}
