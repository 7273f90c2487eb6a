use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};

pub const DATABASE_FILE: &str = "settings.db";
pub const LEGACY_SETTINGS_FILE: &str = "settings.json";
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(100);

const APP_DIR_NAME: &str = "uma-android-automation";

/// Backoff schedule for batch writes: `base_delay * 2^attempt` between tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Holds the settings database and any legacy `settings.json`.
    pub data_dir: PathBuf,
    /// Where exported settings files are written.
    pub export_dir: PathBuf,
    pub save_debounce: Duration,
    pub retry: RetryPolicy,
    pub debug: bool,
}

impl AppConfig {
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            export_dir: data_dir.join("exports"),
            data_dir,
            save_debounce: DEFAULT_SAVE_DEBOUNCE,
            retry: RetryPolicy::default(),
            debug: false,
        }
    }

    /// Build the configuration from `UMA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var_os("UMA_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir(),
        };

        let mut config = Self::with_data_dir(data_dir);

        config.export_dir = match std::env::var_os("UMA_EXPORT_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::document_dir()
                .map(|dir| dir.join(APP_DIR_NAME))
                .unwrap_or_else(|| config.data_dir.join("exports")),
        };

        if let Ok(raw) = std::env::var("UMA_SAVE_DEBOUNCE_MS") {
            let millis: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("UMA_SAVE_DEBOUNCE_MS must be milliseconds, got '{raw}'"))?;
            config.save_debounce = Duration::from_millis(millis);
        }

        config.debug = std::env::var("UMA_DEBUG")
            .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }

    pub fn legacy_settings_path(&self) -> PathBuf {
        self.data_dir.join(LEGACY_SETTINGS_FILE)
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
