//! Log record data structures

use serde::{Deserialize, Serialize};

/// One log event as handed over by the logging framework
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogRecord {
    /// Milliseconds since Unix epoch
    pub timestamp: i64,
    pub level: LogLevel,
    pub logger: String,
    pub marker: Option<String>,
    pub message: String,
    pub thread_name: String,
    pub thread_id: Option<i64>,
    pub thread_priority: Option<i64>,
    /// Rendered throwable, one entry per line
    pub throwable: Option<Vec<String>>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "TRACE"),
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Fatal => write!(f, "FATAL"),
        }
    }
}

impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "TRACE" | "VERBOSE" => LogLevel::Trace,
            "DEBUG" => LogLevel::Debug,
            "INFO" | "INFORMATION" => LogLevel::Info,
            "WARN" | "WARNING" => LogLevel::Warn,
            "ERROR" | "ERR" => LogLevel::Error,
            "FATAL" | "CRITICAL" => LogLevel::Fatal,
            _ => LogLevel::Info, // Default fallback
        }
    }
}

impl From<&tracing::Level> for LogLevel {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => LogLevel::Trace,
            tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

impl LogRecord {
    /// Create a record stamped with the current time and thread
    pub fn new(level: LogLevel, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: current_timestamp_millis(),
            level,
            logger: logger.into(),
            marker: None,
            message: message.into(),
            thread_name: current_thread_name(),
            thread_id: None,
            thread_priority: None,
            throwable: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = Some(marker.into());
        self
    }

    pub fn with_thread(mut self, name: impl Into<String>, id: Option<i64>, priority: Option<i64>) -> Self {
        self.thread_name = name.into();
        self.thread_id = id;
        self.thread_priority = priority;
        self
    }

    pub fn with_throwable(mut self, lines: Vec<String>) -> Self {
        self.throwable = Some(lines);
        self
    }
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn current_thread_name() -> String {
    std::thread::current().name().unwrap_or("unnamed").to_string()
}
