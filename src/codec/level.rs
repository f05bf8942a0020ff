//! Severity level names, aliases, and ordering.
//!
//! On disk a level may appear as its full name (`WARNING`), a historical
//! variant (`WARN`), or the single-letter writer alias (`W`). Readers
//! normalize everything they recognize to the full name; writers compress to
//! the alias. Unrecognized names pass through both directions untouched.

use std::fmt;

/// The nine recognized severity levels, in syslog priority order
/// (`Emergency` = 0 through `Trace` = 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    Emergency,
    Alert,
    Critical,
    Error,
    Warning,
    Notice,
    Info,
    Debug,
    Trace,
}

const ALL: [Level; 9] = [
    Level::Emergency,
    Level::Alert,
    Level::Critical,
    Level::Error,
    Level::Warning,
    Level::Notice,
    Level::Info,
    Level::Debug,
    Level::Trace,
];

impl Level {
    /// The canonical full name, as readers report it.
    pub fn name(self) -> &'static str {
        match self {
            Level::Emergency => "EMERGENCY",
            Level::Alert => "ALERT",
            Level::Critical => "CRITICAL",
            Level::Error => "ERROR",
            Level::Warning => "WARNING",
            Level::Notice => "NOTICE",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    /// The compressed form writers put on the wire.
    pub fn short(self) -> &'static str {
        match self {
            Level::Emergency => "EM",
            Level::Alert => "A",
            Level::Critical => "C",
            Level::Error => "E",
            Level::Warning => "W",
            Level::Notice => "N",
            Level::Info => "I",
            Level::Debug => "D",
            Level::Trace => "T",
        }
    }

    /// Historical spellings accepted on read.
    fn variants(self) -> &'static [&'static str] {
        match self {
            Level::Emergency => &["EMERG"],
            Level::Critical => &["CRIT"],
            Level::Error => &["ERR"],
            Level::Warning => &["WARN"],
            Level::Notice => &["NOTE"],
            _ => &[],
        }
    }

    /// Syslog priority of the base level.
    pub fn priority(self) -> u8 {
        ALL.iter().position(|l| *l == self).unwrap_or(0) as u8
    }

    /// Case-insensitive match against the name, short form, or variants.
    #[allow(clippy::should_implement_trait)] // no sensible FromStr error type
    pub fn from_str(text: &str) -> Option<Level> {
        let upper = text.to_ascii_uppercase();
        ALL.into_iter().find(|level| {
            upper == level.name()
                || upper == level.short()
                || level.variants().contains(&upper.as_str())
        })
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Splits a trailing decimal suffix, as in `DEBUG3` or `T12`.
fn split_suffix(text: &str) -> (&str, Option<u32>) {
    let digits = text.len() - text.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == text.len() || digits == 0 {
        return (text, None);
    }
    match text[digits..].parse() {
        Ok(n) => (&text[..digits], Some(n)),
        Err(_) => (text, None),
    }
}

/// Normalizes a stored level to its full name, or `None` when unrecognized.
/// `DEBUGn`/`TRACEn` (and their short forms) keep the numeric suffix.
pub fn canonicalize(text: &str) -> Option<String> {
    if let Some(level) = Level::from_str(text) {
        return Some(level.name().to_owned());
    }
    let (base, suffix) = split_suffix(text);
    match (Level::from_str(base), suffix) {
        (Some(level @ (Level::Debug | Level::Trace)), Some(n)) => {
            Some(format!("{}{n}", level.name()))
        }
        _ => None,
    }
}

/// Compresses a level to the writer alias; unrecognized names pass through.
pub fn alias(text: &str) -> String {
    if let Some(level) = Level::from_str(text) {
        return level.short().to_owned();
    }
    let (base, suffix) = split_suffix(text);
    match (Level::from_str(base), suffix) {
        (Some(level @ (Level::Debug | Level::Trace)), Some(n)) => {
            format!("{}{n}", level.short())
        }
        _ => text.to_owned(),
    }
}

/// Priority of a stored level as a float: base syslog priority, with a
/// `DEBUGn`/`TRACEn` suffix placed fractionally above the base.
pub fn priority(text: &str) -> Option<f64> {
    if let Some(level) = Level::from_str(text) {
        return Some(level.priority() as f64);
    }
    let (base, suffix) = split_suffix(text);
    match (Level::from_str(base), suffix) {
        (Some(level @ (Level::Debug | Level::Trace)), Some(n)) => {
            Some(level.priority() as f64 + n as f64 / (n as f64 + 1.0))
        }
        _ => None,
    }
}
