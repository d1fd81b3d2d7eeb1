//! Wire representation of a single log record
//!
//! A point renders as one line of `name=value` pairs separated by tabs:
//!
//! ```text
//! timestamp=1718000000000\tlevel=INFO\tlogger=app\t...\texception=\n
//! ```

use crate::errors::EncodingError;
use crate::record::LogRecord;

/// Field names produced by [`record_to_point`], in wire order
pub const FIELD_NAMES: [&str; 9] = [
    "timestamp",
    "level",
    "logger",
    "marker",
    "message",
    "thread_name",
    "thread_id",
    "thread_priority",
    "exception",
];

const FIELD_SEPARATOR: u8 = b'\t';
const LINE_TERMINATOR: u8 = b'\n';

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    /// Milliseconds since Unix epoch
    Timestamp(i64),
    Str(String),
    Int(i64),
}

impl FieldValue {
    /// Remote schema type name for this value
    pub fn schema_type(&self) -> &'static str {
        match self {
            FieldValue::Timestamp(_) => "date",
            FieldValue::Str(_) => "string",
            FieldValue::Int(_) => "long",
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        match self {
            FieldValue::Timestamp(v) | FieldValue::Int(v) => {
                buf.extend_from_slice(v.to_string().as_bytes());
            }
            FieldValue::Str(s) => escape_into(s, buf),
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            FieldValue::Timestamp(v) | FieldValue::Int(v) => decimal_len(*v),
            FieldValue::Str(s) => s
                .bytes()
                .map(|b| if needs_escape(b) { 2 } else { 1 })
                .sum(),
        }
    }
}

/// An immutable, ordered set of named fields
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Point {
    fields: Vec<(String, FieldValue)>,
    encoded_len: usize,
}

impl Point {
    /// Build a point from fields in the order given
    pub fn from_fields(fields: Vec<(String, FieldValue)>) -> Self {
        // name + '=' + value per field, separators between fields, trailing newline
        let encoded_len = fields
            .iter()
            .map(|(name, value)| name.len() + 1 + value.encoded_len())
            .sum::<usize>()
            + fields.len().saturating_sub(1)
            + 1;

        Self { fields, encoded_len }
    }

    pub fn fields(&self) -> &[(String, FieldValue)] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Number of bytes this point occupies in a payload, newline included
    pub fn encoded_len(&self) -> usize {
        self.encoded_len
    }

    /// Append the encoded line for this point to `buf`
    pub fn encode_into(&self, buf: &mut Vec<u8>) -> Result<(), EncodingError> {
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if !is_valid_field_name(name) {
                return Err(EncodingError::InvalidFieldName(name.clone()));
            }
            if i > 0 {
                buf.push(FIELD_SEPARATOR);
            }
            buf.extend_from_slice(name.as_bytes());
            buf.push(b'=');
            value.encode_into(buf);
        }
        buf.push(LINE_TERMINATOR);
        Ok(())
    }
}

/// Map a log record onto the fixed nine-field point layout
pub fn record_to_point(record: &LogRecord) -> Point {
    let exception = record
        .throwable
        .as_ref()
        .map(|lines| lines.join("\n"))
        .unwrap_or_default();

    let values = [
        FieldValue::Timestamp(record.timestamp),
        FieldValue::Str(record.level.to_string()),
        FieldValue::Str(record.logger.clone()),
        FieldValue::Str(record.marker.clone().unwrap_or_default()),
        FieldValue::Str(record.message.clone()),
        FieldValue::Str(record.thread_name.clone()),
        FieldValue::Int(record.thread_id.unwrap_or(0)),
        FieldValue::Int(record.thread_priority.unwrap_or(0)),
        FieldValue::Str(exception),
    ];

    Point::from_fields(
        FIELD_NAMES
            .iter()
            .map(|name| name.to_string())
            .zip(values)
            .collect(),
    )
}

fn is_valid_field_name(name: &str) -> bool {
    !name.is_empty() && !name.bytes().any(|b| b == b'=' || needs_escape(b))
}

fn needs_escape(b: u8) -> bool {
    matches!(b, b'\\' | b'\t' | b'\n' | b'\r')
}

fn escape_into(s: &str, buf: &mut Vec<u8>) {
    for b in s.bytes() {
        match b {
            b'\\' => buf.extend_from_slice(b"\\\\"),
            b'\t' => buf.extend_from_slice(b"\\t"),
            b'\n' => buf.extend_from_slice(b"\\n"),
            b'\r' => buf.extend_from_slice(b"\\r"),
            _ => buf.push(b),
        }
    }
}

fn decimal_len(v: i64) -> usize {
    let sign = usize::from(v < 0);
    let mut n = v.unsigned_abs();
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    sign + digits
}
