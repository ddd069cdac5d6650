//! Structured logging for the router.
//!
//! Each router owns a [`Logger`] handed to it at construction. Entries are
//! buffered for inspection and forwarded to the `tracing` facade.

use crate::core::{now, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

/// Log level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level (most verbose)
    Trace = 0,
    /// Debug level
    Debug = 1,
    /// Info level
    Info = 2,
    /// Warning level
    Warn = 3,
    /// Error level
    Error = 4,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// A structured log entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    /// Timestamp
    pub timestamp: Timestamp,
    /// Log level
    pub level: LogLevel,
    /// Message
    pub message: String,
    /// Router that emitted the entry
    pub router_id: String,
    /// Message being routed, if any
    pub message_id: Option<String>,
    /// Structured fields
    pub fields: HashMap<String, serde_json::Value>,
}

impl LogEntry {
    /// Create a new log entry.
    pub fn new(level: LogLevel, message: &str) -> Self {
        Self {
            timestamp: now(),
            level,
            message: message.to_string(),
            router_id: String::new(),
            message_id: None,
            fields: HashMap::new(),
        }
    }

    /// Attach the id of the message being routed.
    pub fn with_message(mut self, message_id: &str) -> Self {
        self.message_id = Some(message_id.to_string());
        self
    }

    /// Add a field.
    pub fn with_field(mut self, key: &str, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.fields.insert(key.to_string(), v);
        }
        self
    }

    /// Format as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Format as text.
    pub fn to_text(&self) -> String {
        let fields_str = if self.fields.is_empty() {
            String::new()
        } else {
            format!(" {:?}", self.fields)
        };
        let message_str = match &self.message_id {
            Some(id) => format!(" message={}", id),
            None => String::new(),
        };

        format!(
            "{} {} [{}] {}{}{}",
            self.timestamp, self.level, self.router_id, self.message, message_str, fields_str
        )
    }
}

/// Log output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogFormat {
    /// Plain text
    Text,
    /// JSON
    Json,
}

/// Logger configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Minimum log level
    pub level: LogLevel,
    /// Format used by [`Logger::render`]
    pub format: LogFormat,
    /// Maximum buffered entries
    pub max_buffer: usize,
    /// Forward entries to `tracing`
    pub emit_tracing: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Text,
            max_buffer: 1000,
            emit_tracing: true,
        }
    }
}

/// Logger injected into a router.
pub struct Logger {
    /// Configuration
    config: LoggerConfig,
    /// Router identity stamped on every entry
    router_id: String,
    /// Log buffer (for inspection)
    buffer: RwLock<Vec<LogEntry>>,
}

impl Logger {
    /// Create a new logger for a router.
    pub fn new(router_id: &str, config: LoggerConfig) -> Self {
        Self {
            config,
            router_id: router_id.to_string(),
            buffer: RwLock::new(Vec::new()),
        }
    }

    /// Log an entry.
    pub fn log(&self, mut entry: LogEntry) {
        if entry.level < self.config.level {
            return;
        }
        entry.router_id = self.router_id.clone();

        if self.config.emit_tracing {
            emit(&entry);
        }

        if self.config.max_buffer == 0 {
            return;
        }
        if let Ok(mut buffer) = self.buffer.write() {
            if buffer.len() >= self.config.max_buffer {
                buffer.remove(0);
            }
            buffer.push(entry);
        }
    }

    /// Log at trace level.
    pub fn trace(&self, message: &str) {
        self.log(LogEntry::new(LogLevel::Trace, message));
    }

    /// Log at debug level.
    pub fn debug(&self, message: &str) {
        self.log(LogEntry::new(LogLevel::Debug, message));
    }

    /// Log at info level.
    pub fn info(&self, message: &str) {
        self.log(LogEntry::new(LogLevel::Info, message));
    }

    /// Log at warn level.
    pub fn warn(&self, message: &str) {
        self.log(LogEntry::new(LogLevel::Warn, message));
    }

    /// Log at error level.
    pub fn error(&self, message: &str) {
        self.log(LogEntry::new(LogLevel::Error, message));
    }

    /// Get buffered logs.
    pub fn get_logs(&self) -> Vec<LogEntry> {
        self.buffer.read().map(|b| b.clone()).unwrap_or_default()
    }

    /// Get logs at or above a level.
    pub fn get_logs_at_level(&self, min_level: LogLevel) -> Vec<LogEntry> {
        self.buffer
            .read()
            .map(|b| b.iter().filter(|e| e.level >= min_level).cloned().collect())
            .unwrap_or_default()
    }

    /// Render buffered logs in the configured format, one entry per line.
    pub fn render(&self) -> String {
        self.get_logs()
            .iter()
            .map(|e| match self.config.format {
                LogFormat::Text => e.to_text(),
                LogFormat::Json => e.to_json(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Clear the buffer.
    pub fn clear(&self) {
        if let Ok(mut buffer) = self.buffer.write() {
            buffer.clear();
        }
    }

    /// Router identity this logger stamps.
    pub fn router_id(&self) -> &str {
        &self.router_id
    }
}

fn emit(entry: &LogEntry) {
    let message_id = entry.message_id.as_deref().unwrap_or("-");
    match entry.level {
        LogLevel::Trace => tracing::trace!(
            router = %entry.router_id, message_id, fields = ?entry.fields, "{}", entry.message
        ),
        LogLevel::Debug => tracing::debug!(
            router = %entry.router_id, message_id, fields = ?entry.fields, "{}", entry.message
        ),
        LogLevel::Info => tracing::info!(
            router = %entry.router_id, message_id, fields = ?entry.fields, "{}", entry.message
        ),
        LogLevel::Warn => tracing::warn!(
            router = %entry.router_id, message_id, fields = ?entry.fields, "{}", entry.message
        ),
        LogLevel::Error => tracing::error!(
            router = %entry.router_id, message_id, fields = ?entry.fields, "{}", entry.message
        ),
    }
}

/// Install a `tracing-subscriber` fmt subscriber at the configured level.
///
/// Returns `false` when a global subscriber is already installed.
pub fn init_tracing(config: &LoggerConfig) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::from(config.level))
        .with_target(false)
        .try_init()
        .is_ok()
}
