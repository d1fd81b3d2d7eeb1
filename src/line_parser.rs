//! Parsing of raw log lines into records
//!
//! Used by the binary to ship the lines of an arbitrary text stream. JSON
//! objects are read field by field; anything else is matched against a few
//! common plain-text layouts and falls back to an INFO record holding the
//! whole line.

use crate::record::{current_timestamp_millis, LogLevel, LogRecord};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub trait LineParser: Send + Sync {
    fn parse_line(&self, line: &str) -> Option<LogRecord>;
}

/// Parser for JSON lines
pub struct JsonLineParser {
    default_logger: String,
}

impl JsonLineParser {
    pub fn new(default_logger: impl Into<String>) -> Self {
        Self {
            default_logger: default_logger.into(),
        }
    }
}

fn first_str<'a>(json: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter().find_map(|key| json[*key].as_str())
}

impl LineParser for JsonLineParser {
    fn parse_line(&self, line: &str) -> Option<LogRecord> {
        let json: Value = serde_json::from_str(line).ok()?;
        if !json.is_object() {
            return None;
        }

        let message = first_str(&json, &["message", "msg", "text"])?.to_string();

        let timestamp = json["timestamp"]
            .as_i64()
            .or_else(|| json["@timestamp"].as_i64())
            .or_else(|| json["time"].as_i64())
            .or_else(|| {
                first_str(&json, &["timestamp", "@timestamp", "time"]).and_then(parse_timestamp)
            })
            .unwrap_or_else(current_timestamp_millis);

        let level = first_str(&json, &["level", "severity", "log_level"]).unwrap_or("INFO");
        let logger = first_str(&json, &["logger", "logger_name", "target"])
            .unwrap_or(&self.default_logger);

        let mut record = LogRecord::new(LogLevel::from(level), logger, message)
            .with_timestamp(timestamp);

        if let Some(thread) = first_str(&json, &["thread_name", "thread"]) {
            record.thread_name = thread.to_string();
        }
        record.thread_id = json["thread_id"].as_i64();
        record.thread_priority = json["thread_priority"].as_i64();
        record.marker = first_str(&json, &["marker"]).map(str::to_string);

        record.throwable = match &json["stack_trace"] {
            Value::Array(lines) => Some(
                lines
                    .iter()
                    .filter_map(|l| l.as_str().map(str::to_string))
                    .collect(),
            ),
            _ => first_str(&json, &["exception", "stack_trace", "error"])
                .map(|e| e.lines().map(str::to_string).collect()),
        };

        Some(record)
    }
}

/// Regex-based parser for unstructured lines
pub struct RegexLineParser {
    patterns: &'static [LinePattern],
    default_logger: String,
}

struct LinePattern {
    regex: Regex,
    level_group: usize,
    message_group: usize,
    timestamp_group: Option<usize>,
    thread_group: Option<usize>,
    logger_group: Option<usize>,
}

impl RegexLineParser {
    pub fn new(default_logger: impl Into<String>) -> Self {
        Self {
            patterns: Self::default_patterns(),
            default_logger: default_logger.into(),
        }
    }

    fn default_patterns() -> &'static [LinePattern] {
        static PATTERNS: OnceLock<Vec<LinePattern>> = OnceLock::new();
        PATTERNS.get_or_init(|| {
            let specs: [(&str, usize, usize, Option<usize>, Option<usize>, Option<usize>); 4] = [
                // log4j default: 2023-12-01 10:30:45,123 [main] ERROR com.example.App - Message
                (
                    r"^(\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2}(?:[.,]\d{3})?)\s+\[([^\]]+)\]\s+(\w+)\s+(\S+)\s+-\s+(.+)$",
                    3, 5, Some(1), Some(2), Some(4),
                ),
                // [2023-12-01T10:30:45Z] INFO: Message
                (r"^\[([^\]]+)\]\s+(\w+):\s+(.+)$", 2, 3, Some(1), None, None),
                // 2023/12/01 10:30:45 [error] Message
                (
                    r"^(\d{4}/\d{2}/\d{2}\s+\d{2}:\d{2}:\d{2})\s+\[(\w+)\]\s+(.+)$",
                    2, 3, Some(1), None, None,
                ),
                // ERROR: Message
                (r"^([A-Za-z]+):\s+(.+)$", 1, 2, None, None, None),
            ];

            specs
                .into_iter()
                .filter_map(|(pattern, level, message, timestamp, thread, logger)| {
                    Some(LinePattern {
                        regex: Regex::new(pattern).ok()?,
                        level_group: level,
                        message_group: message,
                        timestamp_group: timestamp,
                        thread_group: thread,
                        logger_group: logger,
                    })
                })
                .collect()
        })
    }
}

impl LineParser for RegexLineParser {
    fn parse_line(&self, line: &str) -> Option<LogRecord> {
        for pattern in self.patterns {
            let Some(captures) = pattern.regex.captures(line) else {
                continue;
            };

            let group = |index: Option<usize>| index.and_then(|i| captures.get(i)).map(|m| m.as_str());

            let message = group(Some(pattern.message_group)).unwrap_or("");
            if message.is_empty() {
                continue;
            }

            let level = group(Some(pattern.level_group)).unwrap_or("INFO");
            let logger = group(pattern.logger_group).unwrap_or(&self.default_logger);
            let timestamp = group(pattern.timestamp_group)
                .and_then(parse_timestamp)
                .unwrap_or_else(current_timestamp_millis);

            let mut record = LogRecord::new(LogLevel::from(level), logger, message)
                .with_timestamp(timestamp);
            if let Some(thread) = group(pattern.thread_group) {
                record.thread_name = thread.to_string();
            }
            return Some(record);
        }

        Some(LogRecord::new(LogLevel::Info, self.default_logger.as_str(), line))
    }
}

/// Tries JSON first, then the plain-text layouts
pub struct CompositeLineParser {
    json_parser: JsonLineParser,
    regex_parser: RegexLineParser,
}

impl CompositeLineParser {
    pub fn new(default_logger: &str) -> Self {
        Self {
            json_parser: JsonLineParser::new(default_logger),
            regex_parser: RegexLineParser::new(default_logger),
        }
    }
}

impl LineParser for CompositeLineParser {
    fn parse_line(&self, line: &str) -> Option<LogRecord> {
        if line.trim().is_empty() {
            return None;
        }

        if line.trim_start().starts_with('{') {
            if let Some(record) = self.json_parser.parse_line(line) {
                return Some(record);
            }
        }

        self.regex_parser.parse_line(line)
    }
}

/// Parse common timestamp layouts into milliseconds since epoch
fn parse_timestamp(ts_str: &str) -> Option<i64> {
    use chrono::{DateTime, NaiveDateTime};

    if let Ok(dt) = DateTime::parse_from_rfc3339(ts_str) {
        return Some(dt.timestamp_millis());
    }

    let formats = [
        "%Y-%m-%d %H:%M:%S,%3f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
    ];

    for format in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(ts_str, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }

    ts_str.parse::<i64>().ok()
}

/// Factory for creating line parsers
pub fn create_parser(format: &str, default_logger: &str) -> Box<dyn LineParser> {
    match format.to_lowercase().as_str() {
        "json" => Box::new(JsonLineParser::new(default_logger)),
        "regex" | "text" => Box::new(RegexLineParser::new(default_logger)),
        _ => Box::new(CompositeLineParser::new(default_logger)),
    }
}
