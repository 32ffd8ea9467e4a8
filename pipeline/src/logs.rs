//! Stage progress logging.
//!
//! Every stage boundary reports what it loaded, dropped and kept. The helpers
//! here emit a `tracing` event and keep the entry in a process-wide journal so
//! a run can be archived next to its outputs (`--log-json`).

use std::sync::Mutex;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Log level of a journal entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A single log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Log message
    pub message: String,
    /// Nesting level (stage = 0, step inside a stage = 1)
    #[serde(default)]
    pub indent: u8,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Info, message: message.into(), indent: 0 }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Success, message: message.into(), indent: 0 }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Warning, message: message.into(), indent: 0 }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: LogLevel::Error, message: message.into(), indent: 0 }
    }

    pub fn with_indent(mut self, indent: u8) -> Self {
        self.indent = indent;
        self
    }
}

/// Global run journal
pub static LOG_JOURNAL: Lazy<LogJournal> = Lazy::new(LogJournal::new);

/// Records log entries and forwards them to `tracing`
pub struct LogJournal {
    entries: Mutex<Vec<LogEntry>>,
    capacity: usize,
}

impl LogJournal {
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { entries: Mutex::new(Vec::new()), capacity }
    }

    /// Emit an entry and keep it in the journal
    pub fn log(&self, entry: LogEntry) {
        let indent = "   ".repeat(entry.indent as usize);
        match entry.level {
            LogLevel::Info => tracing::info!("{}{}", indent, entry.message),
            LogLevel::Success => tracing::info!("{}✓ {}", indent, entry.message),
            LogLevel::Warning => tracing::warn!("{}{}", indent, entry.message),
            LogLevel::Error => tracing::error!("{}{}", indent, entry.message),
        }

        // A poisoned journal only loses history, never the event itself
        if let Ok(mut entries) = self.entries.lock() {
            if entries.len() == self.capacity {
                entries.remove(0);
            }
            entries.push(entry);
        }
    }

    /// Snapshot of the recorded entries
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Take all recorded entries, leaving the journal empty
    pub fn drain(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .map(|mut e| std::mem::take(&mut *e))
            .unwrap_or_default()
    }
}

impl Default for LogJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenient logging functions
pub fn log_info(msg: impl Into<String>) {
    LOG_JOURNAL.log(LogEntry::info(msg));
}

pub fn log_success(msg: impl Into<String>) {
    LOG_JOURNAL.log(LogEntry::success(msg));
}

pub fn log_warning(msg: impl Into<String>) {
    LOG_JOURNAL.log(LogEntry::warning(msg));
}

pub fn log_error(msg: impl Into<String>) {
    LOG_JOURNAL.log(LogEntry::error(msg));
}

pub fn log_info_indent(msg: impl Into<String>, indent: u8) {
    LOG_JOURNAL.log(LogEntry::info(msg).with_indent(indent));
}
