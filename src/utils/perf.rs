//! Operation timing for database and settings work.
//!
//! A [`PerfLogger`] keeps a bounded history of [`PerfMetric`]s and logs each
//! one as it is recorded. Anything slower than [`SLOW_OPERATION`] is logged at
//! warn level so regressions in the save path show up without debug logging.

use std::{
    collections::VecDeque,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::message_log::MessageLog;
use crate::utils::lock_or_recover;

pub const SLOW_OPERATION: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_HISTORY: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PerfCategory {
    Database,
    Settings,
    State,
    Ui,
}

impl PerfCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PerfCategory::Database => "DATABASE",
            PerfCategory::Settings => "SETTINGS",
            PerfCategory::State => "STATE",
            PerfCategory::Ui => "UI",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfMetric {
    pub operation: String,
    pub category: PerfCategory,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    pub details: Option<Value>,
}

impl PerfMetric {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }

    pub fn is_slow(&self) -> bool {
        self.duration > SLOW_OPERATION
    }
}

impl fmt::Display for PerfMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[PERF] {} - {}: {:.2}ms",
            self.category.as_str(),
            self.operation,
            self.duration_ms()
        )?;
        if let Some(details) = &self.details {
            write!(f, " | Details: {details}")?;
        }
        Ok(())
    }
}

struct PerfInner {
    metrics: VecDeque<PerfMetric>,
    max_history: usize,
    message_log: Option<MessageLog>,
}

#[derive(Clone)]
pub struct PerfLogger {
    inner: Arc<Mutex<PerfInner>>,
}

impl Default for PerfLogger {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl PerfLogger {
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PerfInner {
                metrics: VecDeque::new(),
                max_history: max_history.max(1),
                message_log: None,
            })),
        }
    }

    /// Mirror every recorded metric into the user-visible message log.
    pub fn mirror_to(&self, message_log: MessageLog) {
        lock_or_recover(&self.inner).message_log = Some(message_log);
    }

    pub fn start_timing(&self, operation: impl Into<String>, category: PerfCategory) -> Timing {
        Timing {
            logger: self.clone(),
            operation: operation.into(),
            category,
            started: Instant::now(),
            timestamp: Utc::now(),
        }
    }

    pub fn record(&self, metric: PerfMetric) {
        if metric.is_slow() {
            log::warn!("{metric}");
        } else {
            log::debug!("{metric}");
        }

        let mirror = {
            let mut inner = lock_or_recover(&self.inner);
            inner.metrics.push_back(metric.clone());
            while inner.metrics.len() > inner.max_history {
                inner.metrics.pop_front();
            }
            inner.message_log.clone()
        };

        if let Some(message_log) = mirror {
            message_log.push_raw(metric.to_string());
        }
    }

    pub fn metrics(&self) -> Vec<PerfMetric> {
        lock_or_recover(&self.inner).metrics.iter().cloned().collect()
    }

    pub fn metrics_for(&self, category: PerfCategory) -> Vec<PerfMetric> {
        lock_or_recover(&self.inner)
            .metrics
            .iter()
            .filter(|metric| metric.category == category)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        lock_or_recover(&self.inner).metrics.clear();
    }
}

/// An operation being timed; call [`Timing::finish`] when it completes.
#[must_use = "a timing records nothing until finish() is called"]
pub struct Timing {
    logger: PerfLogger,
    operation: String,
    category: PerfCategory,
    started: Instant,
    timestamp: DateTime<Utc>,
}

impl Timing {
    pub fn finish(self, details: Option<Value>) -> PerfMetric {
        let metric = PerfMetric {
            operation: self.operation,
            category: self.category,
            duration: self.started.elapsed(),
            timestamp: self.timestamp,
            details,
        };
        self.logger.record(metric.clone());
        metric
    }
}
