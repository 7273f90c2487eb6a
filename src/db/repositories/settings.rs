use std::sync::Arc;

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{json, Map, Value};

use crate::db::{
    helpers::{decode_value, encode_value, into_settings_error},
    models::{SettingEntry, SettingRow, StoredSettings, ValueKind},
    Database, SettingsStore,
};
use crate::error::SettingsError;
use crate::utils::perf::PerfCategory;
use crate::{log_debug, log_error, log_warn};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "[DB]";

const UPSERT_SETTING: &str = "INSERT INTO settings (category, key, value, value_type)
     VALUES (?1, ?2, ?3, ?4)
     ON CONFLICT(category, key) DO UPDATE SET
         value = excluded.value,
         value_type = excluded.value_type,
         updated_at = CURRENT_TIMESTAMP";

fn row_to_setting(row: &Row) -> rusqlite::Result<SettingRow> {
    let raw: String = row.get("value")?;
    let value_type = row
        .get::<_, Option<String>>("value_type")?
        .as_deref()
        .and_then(ValueKind::parse);

    Ok(SettingRow {
        id: row.get("id")?,
        category: row.get("category")?,
        key: row.get("key")?,
        value: decode_value(&raw, value_type),
        value_type,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

/// Upsert every entry inside one transaction; nothing is applied on failure.
fn write_batch(conn: &mut Connection, entries: &[SettingEntry]) -> Result<()> {
    let tx = conn.transaction()?;
    {
        let mut stmt = tx.prepare_cached(UPSERT_SETTING)?;
        for entry in entries {
            let (text, kind) = encode_value(&entry.value);
            stmt.execute(params![entry.category, entry.key, text, kind.as_str()])?;
        }
    }
    tx.commit()?;
    Ok(())
}

impl Database {
    /// Write a batch of settings atomically, retrying with exponential backoff.
    ///
    /// A closed database is reported immediately as `StorageUnavailable`
    /// without retrying. Any other failure is retried up to the configured
    /// limit and then surfaced as `PersistFailed`.
    pub async fn save_settings_batch(
        &self,
        entries: Vec<SettingEntry>,
    ) -> crate::error::Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let retry = self.retry_policy();
        let count = entries.len();
        let entries = Arc::new(entries);
        let timing = self
            .perf()
            .start_timing("save settings batch", PerfCategory::Database);

        let mut attempt: u32 = 0;
        loop {
            let batch = entries.clone();
            let result = self.execute(move |conn| write_batch(conn, &batch)).await;

            let err = match result {
                Ok(()) => {
                    log_debug!("Saved {count} setting(s) on attempt {}", attempt + 1);
                    timing.finish(Some(json!({ "entries": count, "attempts": attempt + 1 })));
                    return Ok(());
                }
                Err(err) => err,
            };

            let attempts = attempt + 1;
            let err = into_settings_error(err, |reason| SettingsError::PersistFailed {
                attempts,
                reason,
            });

            if err.is_storage_unavailable() {
                log_error!("Batch save aborted: {err}");
                timing.finish(Some(json!({ "entries": count, "error": err.to_string() })));
                return Err(err);
            }

            if attempt >= retry.max_retries {
                log_error!("Batch save failed after {attempts} attempt(s): {err}");
                timing.finish(Some(json!({ "entries": count, "attempts": attempts, "error": err.to_string() })));
                return Err(match err {
                    SettingsError::PersistFailed { .. } => err,
                    other => SettingsError::PersistFailed {
                        attempts,
                        reason: other.to_string(),
                    },
                });
            }

            let delay = retry.delay_for(attempt);
            log_warn!(
                "Batch save attempt {attempts} failed, retrying in {}ms: {err}",
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Every stored setting grouped by category.
    pub async fn load_all_settings(&self) -> crate::error::Result<StoredSettings> {
        let timing = self
            .perf()
            .start_timing("load all settings", PerfCategory::Database);

        let rows = self
            .execute(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT category, key, value, value_type FROM settings ORDER BY category, key",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        let category: String = row.get(0)?;
                        let key: String = row.get(1)?;
                        let raw: String = row.get(2)?;
                        let kind: Option<String> = row.get(3)?;
                        Ok((category, key, decode_value(&raw, kind.as_deref().and_then(ValueKind::parse))))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(|err| into_settings_error(err, SettingsError::LoadFailed))?;

        let row_count = rows.len();
        let mut settings = StoredSettings::new();
        for (category, key, value) in rows {
            settings.entry(category).or_default().insert(key, value);
        }

        timing.finish(Some(json!({ "rows": row_count, "categories": settings.len() })));
        Ok(settings)
    }

    pub async fn load_category(&self, category: &str) -> crate::error::Result<Map<String, Value>> {
        let category = category.to_string();
        let rows = self
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT key, value, value_type FROM settings WHERE category = ?1 ORDER BY key",
                )?;
                let rows = stmt
                    .query_map(params![category], |row| {
                        let key: String = row.get(0)?;
                        let raw: String = row.get(1)?;
                        let kind: Option<String> = row.get(2)?;
                        Ok((key, decode_value(&raw, kind.as_deref().and_then(ValueKind::parse))))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await
            .map_err(|err| into_settings_error(err, SettingsError::LoadFailed))?;

        Ok(rows.into_iter().collect())
    }

    pub async fn load_setting(
        &self,
        category: &str,
        key: &str,
    ) -> crate::error::Result<Option<Value>> {
        let category = category.to_string();
        let key = key.to_string();
        self.execute(move |conn| {
            let found = conn
                .query_row(
                    "SELECT value, value_type FROM settings WHERE category = ?1 AND key = ?2",
                    params![category, key],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
                )
                .optional()?;
            Ok(found.map(|(raw, kind)| decode_value(&raw, kind.as_deref().and_then(ValueKind::parse))))
        })
        .await
        .map_err(|err| into_settings_error(err, SettingsError::LoadFailed))
    }

    /// Full rows including ids and timestamps, for inspection tools.
    pub async fn list_setting_rows(&self) -> crate::error::Result<Vec<SettingRow>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, category, key, value, value_type, created_at, updated_at
                 FROM settings
                 ORDER BY category, key",
            )?;
            let rows = stmt
                .query_map([], row_to_setting)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
        .await
        .map_err(|err| into_settings_error(err, SettingsError::LoadFailed))
    }

    /// Returns whether a row was removed.
    pub async fn delete_setting(&self, category: &str, key: &str) -> crate::error::Result<bool> {
        let category = category.to_string();
        let key = key.to_string();
        self.execute(move |conn| {
            let removed = conn.execute(
                "DELETE FROM settings WHERE category = ?1 AND key = ?2",
                params![category, key],
            )?;
            Ok(removed > 0)
        })
        .await
        .map_err(|err| into_settings_error(err, SettingsError::LoadFailed))
    }

    pub async fn delete_category(&self, category: &str) -> crate::error::Result<usize> {
        let category = category.to_string();
        self.execute(move |conn| {
            Ok(conn.execute("DELETE FROM settings WHERE category = ?1", params![category])?)
        })
        .await
        .map_err(|err| into_settings_error(err, SettingsError::LoadFailed))
    }

    /// Remove every row. Returns the number of rows deleted.
    pub async fn clear_all_settings(&self) -> crate::error::Result<usize> {
        let removed = self
            .execute(|conn| Ok(conn.execute("DELETE FROM settings", [])?))
            .await
            .map_err(|err| into_settings_error(err, SettingsError::LoadFailed))?;
        log_debug!("Cleared {removed} setting row(s)");
        Ok(removed)
    }
}

impl SettingsStore for Database {
    async fn initialize(&self) -> crate::error::Result<()> {
        Database::initialize(self).await
    }

    async fn save_batch(&self, entries: Vec<SettingEntry>) -> crate::error::Result<()> {
        self.save_settings_batch(entries).await
    }

    async fn load_all(&self) -> crate::error::Result<StoredSettings> {
        self.load_all_settings().await
    }

    async fn clear_all(&self) -> crate::error::Result<usize> {
        self.clear_all_settings().await
    }

    async fn close(&self) {
        Database::close(self).await
    }
}
