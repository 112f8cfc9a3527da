use std::{
    fmt,
    sync::{Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};

/// Receives log lines produced while a submission runs.
///
/// Entries must be kept in the order `append` is called.
pub trait LogSink: Send + Sync {
    fn append(&self, source: &str, message: String);
}

impl<F> LogSink for F
where
    F: Fn(&str, String) + Send + Sync,
{
    fn append(&self, source: &str, message: String) {
        self(source, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub source: String,
    pub message: String,
    pub recorded_at: DateTime<Utc>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.source, self.message)
    }
}

/// Append-only in-memory log owned by the presentation layer.
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: Mutex<Vec<LogEntry>>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries().clone()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn entries(&self) -> MutexGuard<'_, Vec<LogEntry>> {
        // A panic while holding the lock cannot leave a half-written entry behind.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogSink for ActivityLog {
    fn append(&self, source: &str, message: String) {
        self.entries().push(LogEntry {
            source: source.to_string(),
            message,
            recorded_at: Utc::now(),
        });
    }
}

#[cfg(test)]
#[path = "tests/activity_log_tests.rs"]
mod tests;
