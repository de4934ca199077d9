//! Time and Logging Abstractions
//!
//! Provides an injectable time source and a logging sink for host integration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// Time source trait
///
/// Playback positions and sync checkpoints are ordered by wall-clock time, so
/// every component that stamps a record takes its time from a `Clock`. Tests
/// substitute a fixed clock to make last-write-wins ordering deterministic.
pub trait Clock: Send + Sync {
    /// Get current UTC time
    fn now(&self) -> DateTime<Utc>;

    /// Get current Unix timestamp in milliseconds
    fn unix_timestamp_millis(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// System clock implementation using actual system time
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
    pub span_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span_id: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }
}

/// Logger sink trait
///
/// Forwards structured logs from the core to host logging pipelines
/// (OSLog, Logcat, desktop log files).
///
/// Implementations must not persist tokens or other secrets; the core
/// redacts known-sensitive fields before they reach the sink.
#[async_trait::async_trait]
pub trait LoggerSink: Send + Sync {
    /// Forward a log entry to the host logging system
    async fn log(&self, entry: LogEntry) -> Result<()>;

    /// Flush any buffered logs
    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Minimum level the sink wants to receive
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock() {
        let clock = SystemClock;
        let before = Utc::now().timestamp_millis();
        let millis = clock.unix_timestamp_millis();
        assert!(millis >= before);
    }

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(LogLevel::Warn, "core_sync", "orphaned bookmark")
            .with_field("book_id", "li_42")
            .with_span_id("span-7");

        assert_eq!(entry.level, LogLevel::Warn);
        assert_eq!(entry.target, "core_sync");
        assert_eq!(entry.fields.get("book_id"), Some(&"li_42".to_string()));
        assert_eq!(entry.span_id, Some("span-7".to_string()));
    }

    #[test]
    fn levels_are_ordered() {
        assert!(LogLevel::Error > LogLevel::Warn);
        assert!(LogLevel::Trace < LogLevel::Info);
    }
}
