//! Serializes and debounces writes of the settings document.
//!
//! At most one write is in flight. Debounced requests collapse into a single
//! write of the last document; a request arriving while a write is running is
//! dropped, since the next user change schedules another one anyway.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Serialize;
use serde_json::json;
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use super::diff::diff;
use super::model::Settings;
use crate::db::SettingsStore;
use crate::error::{Result, SettingsError};
use crate::message_log::{MessageLevel, MessageLog};
use crate::utils::{
    lock_or_recover,
    perf::{PerfCategory, PerfLogger},
};
use crate::{log_debug, log_error};

const ENABLE_LOGS: bool = true;
const LOG_TAG: &str = "[SAVE]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SaveStatus {
    Idle,
    Saving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// `entries` changed keys were written.
    Written { entries: usize },
    /// The document matched the last save.
    Unchanged,
    /// A newer request replaced this one before its timer fired.
    Superseded,
    /// Another write was already in flight.
    Skipped,
}

/// Result of [`SaveCoordinator::request_debounced_save`].
#[derive(Debug)]
pub enum DebouncedSave {
    Scheduled(oneshot::Receiver<Result<SaveOutcome>>),
    /// A write was in flight; the request was ignored.
    Dropped,
}

impl DebouncedSave {
    pub fn is_scheduled(&self) -> bool {
        matches!(self, DebouncedSave::Scheduled(_))
    }

    /// Wait for the write this request ended up in.
    pub async fn outcome(self) -> Result<SaveOutcome> {
        match self {
            DebouncedSave::Dropped => Ok(SaveOutcome::Skipped),
            // The sender only goes away if its timer task was cancelled
            // without being answered, which means it was superseded.
            DebouncedSave::Scheduled(rx) => rx.await.unwrap_or(Ok(SaveOutcome::Superseded)),
        }
    }
}

struct PendingSave {
    id: u64,
    cancel: CancellationToken,
    reply: oneshot::Sender<Result<SaveOutcome>>,
}

impl PendingSave {
    fn supersede(self) {
        self.cancel.cancel();
        let _ = self.reply.send(Ok(SaveOutcome::Superseded));
    }
}

struct Schedule {
    status: SaveStatus,
    pending: Option<PendingSave>,
    next_id: u64,
}

struct CoordinatorInner<S> {
    store: S,
    debounce: Duration,
    schedule: Mutex<Schedule>,
    last_saved: Mutex<Option<Settings>>,
    status_tx: watch::Sender<SaveStatus>,
    messages: MessageLog,
    perf: PerfLogger,
}

impl<S> CoordinatorInner<S> {
    fn set_status(&self, schedule: &mut Schedule, status: SaveStatus) {
        schedule.status = status;
        self.status_tx.send_replace(status);
    }
}

/// Returns the coordinator to `Idle` when the write finishes, even if the
/// task running it panics.
struct SavingGuard<S> {
    inner: Arc<CoordinatorInner<S>>,
}

impl<S> Drop for SavingGuard<S> {
    fn drop(&mut self) {
        let mut schedule = lock_or_recover(&self.inner.schedule);
        self.inner.set_status(&mut schedule, SaveStatus::Idle);
    }
}

pub struct SaveCoordinator<S> {
    inner: Arc<CoordinatorInner<S>>,
}

impl<S> Clone for SaveCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: SettingsStore> SaveCoordinator<S> {
    pub fn new(store: S, debounce: Duration, messages: MessageLog, perf: PerfLogger) -> Self {
        let (status_tx, _) = watch::channel(SaveStatus::Idle);
        Self {
            inner: Arc::new(CoordinatorInner {
                store,
                debounce,
                schedule: Mutex::new(Schedule {
                    status: SaveStatus::Idle,
                    pending: None,
                    next_id: 0,
                }),
                last_saved: Mutex::new(None),
                status_tx,
                messages,
                perf,
            }),
        }
    }

    pub fn status(&self) -> SaveStatus {
        lock_or_recover(&self.inner.schedule).status
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status_tx.subscribe()
    }

    /// The document as of the last successful write, if any.
    pub fn baseline(&self) -> Option<Settings> {
        lock_or_recover(&self.inner.last_saved).clone()
    }

    /// Replace the baseline. `None` makes the next save write everything.
    pub fn set_baseline(&self, settings: Option<Settings>) {
        *lock_or_recover(&self.inner.last_saved) = settings;
    }

    /// Schedule a write of `settings` after the debounce interval.
    ///
    /// A still-pending earlier request is cancelled and resolves as
    /// `Superseded`.
    pub fn request_debounced_save(&self, settings: Settings) -> DebouncedSave {
        let (id, cancel, reply_rx) = {
            let mut schedule = lock_or_recover(&self.inner.schedule);
            if schedule.status == SaveStatus::Saving {
                log_debug!("Save already in progress, dropping debounced request");
                return DebouncedSave::Dropped;
            }

            if let Some(previous) = schedule.pending.take() {
                previous.supersede();
            }

            let id = schedule.next_id;
            schedule.next_id += 1;
            let cancel = CancellationToken::new();
            let (reply_tx, reply_rx) = oneshot::channel();
            schedule.pending = Some(PendingSave {
                id,
                cancel: cancel.clone(),
                reply: reply_tx,
            });
            (id, cancel, reply_rx)
        };

        let coordinator = self.clone();
        let debounce = self.inner.debounce;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(debounce) => {
                    coordinator.fire_debounced(id, settings).await;
                }
            }
        });

        DebouncedSave::Scheduled(reply_rx)
    }

    /// Write `settings` now, bypassing the timer.
    ///
    /// Returns `Skipped` without writing if another write is in flight.
    pub async fn request_immediate_save(&self, settings: Settings) -> Result<SaveOutcome> {
        match self.try_claim() {
            Some(guard) => self.spawn_write(guard, settings).await,
            None => {
                log_debug!("Save already in progress, skipping immediate save");
                Ok(SaveOutcome::Skipped)
            }
        }
    }

    /// Write `settings` once any in-flight write has finished. Never skipped.
    pub async fn commit(&self, settings: Settings) -> Result<SaveOutcome> {
        let mut status_rx = self.inner.status_tx.subscribe();
        loop {
            if let Some(guard) = self.try_claim() {
                return self.spawn_write(guard, settings).await;
            }
            // The sender lives in `inner`, which we hold, so this cannot fail.
            let _ = status_rx.wait_for(|status| *status == SaveStatus::Idle).await;
        }
    }

    fn try_claim(&self) -> Option<SavingGuard<S>> {
        let mut schedule = lock_or_recover(&self.inner.schedule);
        if schedule.status == SaveStatus::Saving {
            return None;
        }
        if let Some(pending) = schedule.pending.take() {
            pending.supersede();
        }
        self.inner.set_status(&mut schedule, SaveStatus::Saving);
        Some(SavingGuard {
            inner: self.inner.clone(),
        })
    }

    async fn fire_debounced(&self, id: u64, settings: Settings) {
        let claimed = {
            let mut schedule = lock_or_recover(&self.inner.schedule);
            match schedule.pending.take() {
                Some(pending) if pending.id == id => {
                    if schedule.status == SaveStatus::Saving {
                        let _ = pending.reply.send(Ok(SaveOutcome::Skipped));
                        None
                    } else {
                        self.inner.set_status(&mut schedule, SaveStatus::Saving);
                        Some((
                            pending.reply,
                            SavingGuard {
                                inner: self.inner.clone(),
                            },
                        ))
                    }
                }
                other => {
                    schedule.pending = other;
                    None
                }
            }
        };

        if let Some((reply, guard)) = claimed {
            let result = self.write(settings).await;
            drop(guard);
            let _ = reply.send(result);
        }
    }

    /// Run the write in its own task so dropping the caller cannot cancel an
    /// in-flight batch.
    async fn spawn_write(&self, guard: SavingGuard<S>, settings: Settings) -> Result<SaveOutcome> {
        let coordinator = self.clone();
        let task = tokio::spawn(async move {
            let result = coordinator.write(settings).await;
            drop(guard);
            result
        });

        task.await.unwrap_or_else(|err| {
            Err(SettingsError::PersistFailed {
                attempts: 0,
                reason: format!("save task failed: {err}"),
            })
        })
    }

    async fn write(&self, settings: Settings) -> Result<SaveOutcome> {
        let timing = self
            .inner
            .perf
            .start_timing("save settings", PerfCategory::Settings);

        let baseline = self.baseline();
        let changes = match diff(&settings, baseline.as_ref()) {
            Ok(changes) => changes,
            Err(err) => return Err(self.report(err.into())),
        };

        if changes.is_empty() {
            log_debug!("No changes since last save");
            timing.finish(Some(json!({ "changed": 0 })));
            return Ok(SaveOutcome::Unchanged);
        }

        let entries = changes.into_entries();
        let count = entries.len();

        // A failed startup open leaves the store closed; every write retries it.
        if let Err(err) = self.inner.store.initialize().await {
            timing.finish(Some(json!({ "changed": count, "error": err.to_string() })));
            return Err(self.report(err));
        }

        if let Err(err) = self.inner.store.save_batch(entries).await {
            timing.finish(Some(json!({ "changed": count, "error": err.to_string() })));
            return Err(self.report(err));
        }

        self.set_baseline(Some(settings));
        timing.finish(Some(json!({ "changed": count })));
        Ok(SaveOutcome::Written { entries: count })
    }

    fn report(&self, err: SettingsError) -> SettingsError {
        log_error!("Failed to save settings to database: {err}");
        self.inner.messages.push(
            MessageLevel::Error,
            format!("Failed to save settings to database: {err}"),
        );
        err
    }
}
