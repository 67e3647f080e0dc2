//! Timestamp-aware message trees.
//!
//! Engine messages carry ISO-8601 `date` fields. On the way in they are
//! decoded into [`Payload`] trees where every parseable `date` becomes a
//! [`Payload::Timestamp`]; on the way out [`encode`] turns them back into
//! wire text. Every other key and value passes through unchanged.

use chrono::{DateTime, FixedOffset, Timelike};
use serde_json::{Map, Number, Value};

/// Reserved field name whose value is converted between text and time.
pub const TIMESTAMP_FIELD: &str = "date";

/// JSON-shaped tree that can additionally hold parsed timestamps.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// JSON number.
    Number(Number),
    /// JSON string.
    String(String),
    /// Parsed value of a [`TIMESTAMP_FIELD`] entry.
    Timestamp(DateTime<FixedOffset>),
    /// JSON array.
    Array(Vec<Payload>),
    /// JSON object.
    Object(Vec<(String, Payload)>),
}

impl Payload {
    /// Look up a field on an object node.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Payload> {
        match self {
            Self::Object(entries) => entries
                .iter()
                .find_map(|(name, value)| (name == key).then_some(value)),
            _ => None,
        }
    }

    /// String contents of a string node.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text.as_str()),
            _ => None,
        }
    }

    /// Timestamp held by a timestamp node.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<&DateTime<FixedOffset>> {
        match self {
            Self::Timestamp(at) => Some(at),
            _ => None,
        }
    }
}

/// Convert a wire value into a [`Payload`], parsing every textual `date`.
///
/// A `date` whose text is not a valid timestamp stays a string.
#[must_use]
pub fn decode(value: Value) -> Payload {
    match value {
        Value::Null => Payload::Null,
        Value::Bool(flag) => Payload::Bool(flag),
        Value::Number(number) => Payload::Number(number),
        Value::String(text) => Payload::String(text),
        Value::Array(items) => Payload::Array(items.into_iter().map(decode).collect()),
        Value::Object(map) => Payload::Object(
            map.into_iter()
                .map(|(key, value)| {
                    let node = match value {
                        Value::String(text) if key == TIMESTAMP_FIELD => parse_wire(&text)
                            .map_or(Payload::String(text), Payload::Timestamp),
                        other => decode(other),
                    };
                    (key, node)
                })
                .collect(),
        ),
    }
}

/// Convert a [`Payload`] back into a wire value, formatting timestamps.
#[must_use]
pub fn encode(payload: &Payload) -> Value {
    match payload {
        Payload::Null => Value::Null,
        Payload::Bool(flag) => Value::Bool(*flag),
        Payload::Number(number) => Value::Number(number.clone()),
        Payload::String(text) => Value::String(text.clone()),
        Payload::Timestamp(at) => Value::String(format_wire(at)),
        Payload::Array(items) => Value::Array(items.iter().map(encode).collect()),
        Payload::Object(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(key.clone(), encode(value));
            }
            Value::Object(map)
        }
    }
}

/// Parse an ISO-8601 timestamp with a `Z` or `±HH:MM` offset.
#[must_use]
pub fn parse_wire(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text).ok()
}

/// Format a timestamp the way engines emit them.
///
/// The fraction is omitted when zero, written with six digits when the
/// sub-microsecond part is zero, and with nine digits otherwise. The offset
/// is always `±HH:MM`.
#[must_use]
pub fn format_wire(at: &DateTime<FixedOffset>) -> String {
    let nanos = at.nanosecond() % 1_000_000_000;
    let fraction = if nanos == 0 {
        String::new()
    } else if nanos % 1_000 == 0 {
        format!(".{:06}", nanos / 1_000)
    } else {
        format!(".{nanos:09}")
    };

    let offset_seconds = at.offset().local_minus_utc();
    let sign = if offset_seconds < 0 { '-' } else { '+' };
    let minutes = offset_seconds.unsigned_abs() / 60;

    format!(
        "{}{fraction}{sign}{:02}:{:02}",
        at.format("%Y-%m-%dT%H:%M:%S"),
        minutes / 60,
        minutes % 60
    )
}
