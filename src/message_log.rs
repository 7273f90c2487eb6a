//! User-visible message log.
//!
//! Failures in the settings core are appended here so they show up on screen
//! without crashing the app. Messages from the automation service arrive
//! asynchronously and sit in a queue until flushed into the visible log.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::utils::lock_or_recover;

pub const MAX_LOG_LINES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLevel {
    Info,
    Success,
    Warn,
    Error,
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            MessageLevel::Info => "[INFO]",
            MessageLevel::Success => "[SUCCESS]",
            MessageLevel::Warn => "[WARN]",
            MessageLevel::Error => "[ERROR]",
        };
        f.write_str(tag)
    }
}

/// Event payload emitted by the automation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMessage {
    pub message: String,
}

impl From<&str> for ServiceMessage {
    fn from(message: &str) -> Self {
        Self {
            message: message.to_string(),
        }
    }
}

#[derive(Default)]
struct MessageLogInner {
    lines: VecDeque<String>,
    async_queue: Vec<String>,
}

impl MessageLogInner {
    fn append(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > MAX_LOG_LINES {
            self.lines.pop_front();
        }
    }
}

#[derive(Clone, Default)]
pub struct MessageLog {
    inner: Arc<Mutex<MessageLogInner>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, level: MessageLevel, message: impl fmt::Display) {
        self.push_raw(format!("{level} {message}"));
    }

    pub fn push_raw(&self, line: impl Into<String>) {
        lock_or_recover(&self.inner).append(line.into());
    }

    /// Queue a message from the automation service without showing it yet.
    pub fn enqueue_async(&self, message: ServiceMessage) {
        lock_or_recover(&self.inner).async_queue.push(message.message);
    }

    /// Move queued service messages into the visible log, oldest first.
    pub fn flush_async(&self) -> usize {
        let mut inner = lock_or_recover(&self.inner);
        let queued: Vec<String> = inner.async_queue.drain(..).collect();
        let count = queued.len();
        for line in queued {
            inner.append(line);
        }
        count
    }

    pub fn pending_async(&self) -> usize {
        lock_or_recover(&self.inner).async_queue.len()
    }

    pub fn entries(&self) -> Vec<String> {
        lock_or_recover(&self.inner).lines.iter().cloned().collect()
    }

    pub fn last(&self) -> Option<String> {
        lock_or_recover(&self.inner).lines.back().cloned()
    }

    pub fn len(&self) -> usize {
        lock_or_recover(&self.inner).lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = lock_or_recover(&self.inner);
        inner.lines.clear();
        inner.async_queue.clear();
    }

    /// Listen for service events until every sender is dropped.
    pub fn attach_service(&self, mut events: mpsc::UnboundedReceiver<ServiceMessage>) -> JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                log.enqueue_async(event);
                log.flush_async();
            }
            log::debug!("Automation service event channel closed");
        })
    }
}
