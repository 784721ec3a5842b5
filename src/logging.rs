//! Structured logging for the automation toolkit.
//!
//! Every component logs through [`ActionLogger`]: resolution misses, swallowed
//! action faults, validation verdicts, and session lifecycle events all pass
//! here before any error propagates. The logger either forwards records to an
//! external sink supplied by the embedding application or prints them through
//! [`default_log_handler`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Callback type used to hand log records to an external sink.
pub type LogCallback = Arc<dyn Fn(&ActionLogRecord) + Send + Sync>;

/// Verbosity levels, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error = 0,
    Info = 1,
    Debug = 2,
}

impl LogLevel {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Short uppercase label used by the console handler.
    pub fn label(self) -> &'static str {
        match self {
            LogLevel::Error => "ERROR",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
        }
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

/// A single structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct ActionLogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    /// Component that produced the record, e.g. `"resolver"` or `"session"`.
    pub category: Option<String>,
    /// Free-form structured payload (locators, observed text, attempt counts).
    pub auxiliary: Option<Value>,
}

impl ActionLogRecord {
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            category: category.map(str::to_owned),
            auxiliary,
        }
    }
}

/// Prints a record to stdout as `timestamp [LEVEL] [category] message`.
pub fn default_log_handler(record: &ActionLogRecord) {
    let category = record
        .category
        .as_deref()
        .map(|c| format!(" [{c}]"))
        .unwrap_or_default();
    println!(
        "{} [{}]{} {}",
        record.timestamp.to_rfc3339(),
        record.level.label(),
        category,
        record.message
    );
}

/// Logger configuration: verbosity gate plus an optional external sink.
#[derive(Clone, Default)]
pub struct LogConfig {
    /// Records above this level are dropped. Errors always pass.
    pub verbose: LogLevel,
    /// When set, records go to this callback instead of the console.
    pub external: Option<LogCallback>,
}

impl fmt::Debug for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogConfig")
            .field("verbose", &self.verbose)
            .field("external", &self.external.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl LogConfig {
    /// Errors are always logged; other levels pass the verbosity gate.
    pub fn should_log(&self, level: LogLevel) -> bool {
        level == LogLevel::Error || level.as_u8() <= self.verbose.as_u8()
    }
}

/// Shared logger handed (by clone) to every toolkit component.
#[derive(Clone, Default)]
pub struct ActionLogger {
    config: LogConfig,
}

impl fmt::Debug for ActionLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionLogger")
            .field("verbose", &self.config.verbose)
            .field("external", &self.config.external.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

impl ActionLogger {
    pub fn new(config: LogConfig) -> Self {
        Self { config }
    }

    /// Build and emit a record if the configured verbosity admits it.
    pub fn log(
        &self,
        level: LogLevel,
        message: &str,
        category: Option<&str>,
        auxiliary: Option<Value>,
    ) {
        if !self.config.should_log(level) {
            return;
        }
        let record = ActionLogRecord::new(level, message, category, auxiliary);
        match &self.config.external {
            Some(sink) => sink(&record),
            None => default_log_handler(&record),
        }
    }

    pub fn error(&self, message: &str, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(LogLevel::Error, message, category, auxiliary);
    }

    pub fn info(&self, message: &str, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(LogLevel::Info, message, category, auxiliary);
    }

    pub fn debug(&self, message: &str, category: Option<&str>, auxiliary: Option<Value>) {
        self.log(LogLevel::Debug, message, category, auxiliary);
    }
}
