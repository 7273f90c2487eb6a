use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use rusqlite::Connection;
use serde_json::json;
use tokio::sync::{oneshot, watch};

pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use migrations::CURRENT_SCHEMA_VERSION;
pub use models::{SettingEntry, SettingRow, StoredSettings, ValueKind};

use crate::config::RetryPolicy;
use crate::error::SettingsError;
use crate::utils::{
    lock_or_recover,
    perf::{PerfCategory, PerfLogger},
};
use crate::{log_debug, log_error, log_info};
use migrations::run_migrations;

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "[DB]";

/// The persistence operations the save path depends on.
///
/// [`Database`] is the production implementation; tests substitute stores that
/// record batches or fail on demand.
pub trait SettingsStore: Clone + Send + Sync + 'static {
    fn initialize(&self) -> impl Future<Output = crate::error::Result<()>> + Send;

    fn save_batch(
        &self,
        entries: Vec<SettingEntry>,
    ) -> impl Future<Output = crate::error::Result<()>> + Send;

    fn load_all(&self) -> impl Future<Output = crate::error::Result<StoredSettings>> + Send;

    fn clear_all(&self) -> impl Future<Output = crate::error::Result<usize>> + Send;

    fn close(&self) -> impl Future<Output = ()> + Send;
}

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

/// An open connection owned by a dedicated worker thread.
struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = lock_or_recover(&self.worker);

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                log_error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                log_error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

type InitOutcome = Option<std::result::Result<(), String>>;

enum ConnectionState {
    Closed,
    Opening(watch::Receiver<InitOutcome>),
    Open(Arc<DatabaseInner>),
}

struct Shared {
    db_path: PathBuf,
    retry: RetryPolicy,
    perf: PerfLogger,
    state: Mutex<ConnectionState>,
}

/// Handle to the settings database. Cheap to clone; all clones share one
/// connection.
#[derive(Clone)]
pub struct Database {
    shared: Arc<Shared>,
}

impl Database {
    /// Create an unopened handle. Call [`Database::initialize`] before use.
    pub fn new(db_path: PathBuf, retry: RetryPolicy, perf: PerfLogger) -> Self {
        Self {
            shared: Arc::new(Shared {
                db_path,
                retry,
                perf,
                state: Mutex::new(ConnectionState::Closed),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        self.shared.db_path.as_path()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.shared.retry
    }

    pub(crate) fn perf(&self) -> &PerfLogger {
        &self.shared.perf
    }

    pub fn is_initialized(&self) -> bool {
        matches!(
            *lock_or_recover(&self.shared.state),
            ConnectionState::Open(_)
        )
    }

    /// Open the database and run migrations.
    ///
    /// Idempotent. Callers arriving while an open is in flight wait for that
    /// same attempt instead of starting another one.
    pub async fn initialize(&self) -> crate::error::Result<()> {
        let mut ready_rx = {
            let mut state = lock_or_recover(&self.shared.state);
            let in_flight = match &*state {
                ConnectionState::Open(_) => {
                    log_debug!("Database already initialized, skipping...");
                    return Ok(());
                }
                ConnectionState::Opening(rx) => Some(rx.clone()),
                ConnectionState::Closed => None,
            };

            match in_flight {
                Some(rx) => {
                    log_debug!("Database initialization already in progress, waiting...");
                    rx
                }
                None => {
                    let (ready_tx, ready_rx) = watch::channel(None);
                    *state = ConnectionState::Opening(ready_rx.clone());
                    tokio::spawn(open_and_publish(self.shared.clone(), ready_tx));
                    ready_rx
                }
            }
        };

        let outcome = ready_rx
            .wait_for(|outcome| outcome.is_some())
            .await
            .map_err(|_| {
                SettingsError::StorageUnavailable("database initialization was abandoned".into())
            })?
            .clone();

        match outcome {
            Some(Ok(())) => Ok(()),
            Some(Err(reason)) => Err(SettingsError::StorageUnavailable(reason)),
            None => Err(SettingsError::StorageUnavailable(
                "database initialization produced no result".into(),
            )),
        }
    }

    /// Release the connection. Later operations fail with
    /// `StorageUnavailable` until [`Database::initialize`] runs again.
    pub async fn close(&self) {
        let inner = {
            let mut state = lock_or_recover(&self.shared.state);
            match std::mem::replace(&mut *state, ConnectionState::Closed) {
                ConnectionState::Open(inner) => Some(inner),
                ConnectionState::Opening(rx) => {
                    // Leave an in-flight open alone; it publishes its own result.
                    *state = ConnectionState::Opening(rx);
                    None
                }
                ConnectionState::Closed => None,
            }
        };

        if let Some(inner) = inner {
            log_info!("Closing database connection...");
            // Dropping the last reference joins the worker thread.
            if let Err(err) = tokio::task::spawn_blocking(move || drop(inner)).await {
                log_error!("Error closing database connection: {err}");
            } else {
                log_info!("Database connection closed successfully");
            }
        }
    }

    /// Run `task` on the database thread and await its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = {
            let state = lock_or_recover(&self.shared.state);
            match &*state {
                ConnectionState::Open(inner) => inner.sender.clone(),
                _ => {
                    return Err(anyhow::Error::new(SettingsError::StorageUnavailable(
                        "database not initialized".into(),
                    )))
                }
            }
        };

        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                log_error!("DB caller dropped before receiving result");
            }
        }));

        sender.send(command).map_err(|err| {
            anyhow::Error::new(SettingsError::StorageUnavailable(format!(
                "failed to send command to DB thread: {err}"
            )))
        })?;

        reply_rx.await.map_err(|_| {
            anyhow::Error::new(SettingsError::StorageUnavailable(
                "database thread terminated unexpectedly".into(),
            ))
        })?
    }
}

async fn open_and_publish(shared: Arc<Shared>, ready_tx: watch::Sender<InitOutcome>) {
    let timing = shared
        .perf
        .start_timing("initialize database", PerfCategory::Database);

    let opened = spawn_worker(shared.db_path.clone()).await;

    let published = {
        let mut state = lock_or_recover(&shared.state);
        match opened {
            Ok(inner) => {
                *state = ConnectionState::Open(Arc::new(inner));
                Ok(())
            }
            Err(err) => {
                *state = ConnectionState::Closed;
                Err(format!("{err:#}"))
            }
        }
    };

    match &published {
        Ok(()) => log_info!("Database initialized at {}", shared.db_path.display()),
        Err(reason) => log_error!("Failed to initialize database: {reason}"),
    }
    timing.finish(Some(json!({ "success": published.is_ok() })));

    ready_tx.send_replace(Some(published));
}

async fn spawn_worker(db_path: PathBuf) -> Result<DatabaseInner> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
    }

    let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
    let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
    let path_for_thread = db_path.clone();

    let worker = thread::Builder::new()
        .name("uma-settings-db".into())
        .spawn(move || {
            let mut conn = match Connection::open(&path_for_thread) {
                Ok(connection) => connection,
                Err(err) => {
                    let _ = ready_tx.send(Err(
                        anyhow::Error::new(err).context("failed to open SQLite database")
                    ));
                    return;
                }
            };

            if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                log_error!("Failed to enable WAL mode: {err}");
            }

            let init_result =
                run_migrations(&mut conn).context("failed to run database migrations");
            let init_failed = init_result.is_err();
            if ready_tx.send(init_result).is_err() {
                log_error!("DB initialization receiver dropped before ready signal");
                return;
            }
            if init_failed {
                return;
            }

            while let Ok(command) = command_rx.recv() {
                match command {
                    DbCommand::Execute(task) => {
                        task(&mut conn);
                    }
                    DbCommand::Shutdown => break,
                }
            }

            log_info!("Database thread shutting down");
        })
        .with_context(|| "failed to spawn database worker thread")?;

    let ready = ready_rx
        .await
        .map_err(|_| anyhow!("database worker exited before signaling readiness"));

    match ready {
        Ok(Ok(())) => Ok(DatabaseInner {
            sender: command_tx,
            worker: Mutex::new(Some(worker)),
        }),
        Ok(Err(err)) | Err(err) => {
            let _ = worker.join();
            Err(err)
        }
    }
}
