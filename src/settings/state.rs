use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use tokio::sync::watch;

use super::model::Settings;

struct StateInner {
    document: watch::Sender<Settings>,
    ready: watch::Sender<bool>,
    loaded: AtomicBool,
}

/// Holds the live settings document for views.
///
/// Readers get snapshots or watch receivers; only the manager publishes.
#[derive(Clone)]
pub struct SettingsState {
    inner: Arc<StateInner>,
}

impl Default for SettingsState {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsState {
    pub fn new() -> Self {
        let (document, _) = watch::channel(Settings::default());
        let (ready, _) = watch::channel(false);
        Self {
            inner: Arc::new(StateInner {
                document,
                ready,
                loaded: AtomicBool::new(false),
            }),
        }
    }

    pub fn current(&self) -> Settings {
        self.inner.document.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.inner.document.subscribe()
    }

    /// True once settings have been loaded and a scenario is selected.
    pub fn is_ready(&self) -> bool {
        *self.inner.ready.borrow()
    }

    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.inner.ready.subscribe()
    }

    pub(crate) fn mark_loaded(&self) {
        self.inner.loaded.store(true, Ordering::SeqCst);
    }

    pub(crate) fn publish(&self, settings: Settings) {
        let ready = self.inner.loaded.load(Ordering::SeqCst) && settings.has_scenario();
        self.inner.document.send_replace(settings);
        self.inner.ready.send_if_modified(|current| {
            let changed = *current != ready;
            *current = ready;
            changed
        });
    }

    pub(crate) fn clear_ready(&self) {
        self.inner.ready.send_replace(false);
    }
}
