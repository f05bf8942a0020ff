//! The decoded form of one log event.

use std::fmt;

use chrono::{DateTime, Local, Utc};
use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::{Error, Result};

/// One decoded record: a timestamp plus named string fields in declaration
/// order.
///
/// Reserved fields (`level`, `message`, `facility`, `identity`) have typed
/// accessors returning `Option`; any other declared field is reached through
/// [`LogRecord::field`], which reports an error for names the record does not
/// carry. Use [`LogRecord::has_field`] to probe first.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    timestamp: f64,
    /// Whether the file this record came from resolves time below one
    /// second (`timestamp_scale > 1`). Controls fractional rendering.
    subsecond: bool,
    fields: IndexMap<String, String>,
}

impl LogRecord {
    pub(crate) fn new(timestamp: f64, subsecond: bool) -> Self {
        LogRecord {
            timestamp,
            subsecond,
            fields: IndexMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, name: &str, value: String) {
        self.fields.insert(name.to_owned(), value);
    }

    /// Appends a continuation fragment: a literal newline plus `text`.
    pub(crate) fn append_fragment(&mut self, name: &str, text: &str) {
        let value = self.fields.entry(name.to_owned()).or_default();
        value.push('\n');
        value.push_str(text);
    }

    /// Seconds since the Unix epoch, fractional below the file's tick scale.
    pub fn timestamp(&self) -> f64 {
        self.timestamp
    }

    pub fn timestamp_utc(&self) -> DateTime<Utc> {
        let secs = self.timestamp.floor();
        let nanos = ((self.timestamp - secs) * 1e9).round().min(999_999_999.0);
        DateTime::from_timestamp(secs as i64, nanos as u32)
            .unwrap_or_else(|| DateTime::from_timestamp(0, 0).expect("epoch"))
    }

    pub fn timestamp_local(&self) -> DateTime<Local> {
        self.timestamp_utc().with_timezone(&Local)
    }

    pub fn level(&self) -> Option<&str> {
        self.fields.get("level").map(String::as_str)
    }

    pub fn message(&self) -> Option<&str> {
        self.fields.get("message").map(String::as_str)
    }

    pub fn facility(&self) -> Option<&str> {
        self.fields.get("facility").map(String::as_str)
    }

    pub fn identity(&self) -> Option<&str> {
        self.fields.get("identity").map(String::as_str)
    }

    /// Looks up a field by name; absent names are an error, not a silent
    /// empty value.
    pub fn field(&self, name: &str) -> Result<&str> {
        self.fields
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownField {
                name: name.to_owned(),
            })
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Serialize for LogRecord {
    /// A flat map: `timestamp` as a number, then every field in declaration
    /// order.
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 1))?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl fmt::Display for LogRecord {
    /// `"<local-ts> <level> <facility> <identity>: <message>"`, omitting
    /// absent parts. No trailing newline. Files with a sub-second tick
    /// scale render fractional seconds; whole-second files do not.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let local = self.timestamp_local();
        if self.subsecond {
            write!(f, "{}", local.format("%Y-%m-%d %H:%M:%S%.3f"))?;
        } else {
            write!(f, "{}", local.format("%Y-%m-%d %H:%M:%S"))?;
        }
        for part in [self.level(), self.facility(), self.identity()]
            .into_iter()
            .flatten()
        {
            write!(f, " {part}")?;
        }
        if let Some(message) = self.message() {
            write!(f, ": {message}")?;
        }
        Ok(())
    }
}
