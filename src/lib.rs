pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod message_log;
pub mod settings;
pub mod utils;

use anyhow::Context;
use clap::Parser;
use tokio::{sync::mpsc, task::JoinHandle};

use config::AppConfig;
use db::Database;
use message_log::{MessageLevel, MessageLog, ServiceMessage};
use settings::SettingsManager;
use utils::perf::PerfLogger;

pub use error::{Result, SettingsError};

/// Everything the app wires together at startup.
pub struct AppContext {
    config: AppConfig,
    database: Database,
    settings: SettingsManager<Database>,
    messages: MessageLog,
    perf: PerfLogger,
    service_tx: mpsc::UnboundedSender<ServiceMessage>,
    service_listener: JoinHandle<()>,
}

impl AppContext {
    /// Open the database, load settings and start listening for service
    /// messages.
    ///
    /// A failed load is not fatal: the defaults stay in place, the error is in
    /// the message log, and saving retries the database later.
    pub async fn bootstrap(config: AppConfig) -> Self {
        let messages = MessageLog::new();
        let perf = PerfLogger::default();
        if config.debug {
            perf.mirror_to(messages.clone());
        }

        let database = Database::new(config.database_path(), config.retry, perf.clone());
        let settings = SettingsManager::new(database.clone(), &config, messages.clone(), perf.clone());

        if let Err(err) = settings.load().await {
            log::warn!("Continuing with default settings: {err}");
        }

        let (service_tx, service_rx) = mpsc::unbounded_channel();
        let service_listener = messages.attach_service(service_rx);

        messages.push(MessageLevel::Info, "Settings ready");

        Self {
            config,
            database,
            settings,
            messages,
            perf,
            service_tx,
            service_listener,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn settings(&self) -> &SettingsManager<Database> {
        &self.settings
    }

    pub fn messages(&self) -> &MessageLog {
        &self.messages
    }

    pub fn perf(&self) -> &PerfLogger {
        &self.perf
    }

    /// Sender handed to the automation service bridge.
    pub fn service_events(&self) -> mpsc::UnboundedSender<ServiceMessage> {
        self.service_tx.clone()
    }

    /// Flush the current document and close the database.
    pub async fn shutdown(self) -> Result<()> {
        let result = self.settings.shutdown().await;
        self.service_listener.abort();
        result
    }
}

pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let config = cli.config()?;
    utils::logging::init_logging(config.debug);

    log::info!("Uma companion starting up...");

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    runtime.block_on(async move {
        let ctx = AppContext::bootstrap(config).await;
        let result = cli::execute(&ctx, cli.command).await;

        for line in ctx.messages().entries() {
            eprintln!("{line}");
        }

        let shutdown = ctx.shutdown().await;
        result?;
        shutdown.map_err(anyhow::Error::from)
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_bootstrap_loads_and_accepts_service_messages() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::with_data_dir(dir.path());
        config.save_debounce = Duration::from_millis(10);

        let ctx = AppContext::bootstrap(config).await;
        assert!(ctx.database().is_initialized());
        assert_eq!(ctx.settings().current(), settings::Settings::default());

        ctx.service_events().send("Bot started".into()).unwrap();
        for _ in 0..50 {
            if ctx.messages().last().as_deref() == Some("Bot started") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(ctx.messages().last().as_deref(), Some("Bot started"));

        ctx.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_bootstrap_survives_unusable_database() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("settings.db")).unwrap();

        let ctx = AppContext::bootstrap(AppConfig::with_data_dir(dir.path())).await;
        assert!(!ctx.database().is_initialized());
        assert_eq!(ctx.settings().current(), settings::Settings::default());
        assert!(ctx
            .messages()
            .entries()
            .iter()
            .any(|line| line.starts_with("[ERROR] Failed to initialize settings database")));
    }
}
