//! Shared machinery of the two on-disk formats: format dispatch, tick
//! counter coding, level names, and value validation.

pub mod level;
pub mod ticks;

use std::borrow::Cow;
use std::fmt;

pub use level::Level;

use crate::error::{Error, Result};

/// The two on-disk formats. tsv1 is current; tsv0 is the hexadecimal
/// predecessor without absolute counters or continuation lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Tsv0,
    Tsv1,
}

impl Format {
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Tsv0 => "tsv0",
            Format::Tsv1 => "tsv1",
        }
    }

    pub fn from_token(token: &str) -> Option<Format> {
        match token {
            "tsv0" => Some(Format::Tsv0),
            "tsv1" => Some(Format::Tsv1),
            _ => None,
        }
    }

    /// Required name of the first declared field.
    pub fn first_field(self) -> &'static str {
        match self {
            Format::Tsv0 => "timestamp_step_hex",
            Format::Tsv1 => "dT",
        }
    }

    /// The magic line a writer puts on line 1. tsv0 files historically used
    /// the `--format=` spelling and still do.
    pub fn magic_line(self) -> String {
        match self {
            Format::Tsv0 => format!("#!hydralog-dump --format={}", self.as_str()),
            Format::Tsv1 => format!("#!hydralog-dump --in-format={}", self.as_str()),
        }
    }

    /// Whether values may span lines via TAB-prefixed continuations.
    pub fn supports_continuation(self) -> bool {
        matches!(self, Format::Tsv1)
    }

    /// Encodes a non-negative counter delta in this format's notation.
    pub fn encode_delta(self, delta: u64) -> String {
        match self {
            Format::Tsv0 => ticks::encode_hex(delta),
            Format::Tsv1 => ticks::encode_b64(delta),
        }
    }

    /// Encodes an absolute counter value (tsv1 only).
    pub fn encode_absolute(self, value: u64) -> String {
        debug_assert!(matches!(self, Format::Tsv1));
        format!("={}", ticks::encode_b64(value))
    }

    /// Decodes the first field of a record line against the running counter.
    ///
    /// Empty means "no counter update". A leading `=` is an absolute value
    /// (tsv1 only) and must not move the counter backwards.
    pub fn decode_counter(self, text: &str, current: u64) -> Result<u64> {
        if text.is_empty() {
            return Ok(current);
        }
        if let Some(abs) = text.strip_prefix('=') {
            if self == Format::Tsv0 {
                return Err(Error::MalformedCounter {
                    text: text.to_owned(),
                });
            }
            let value = ticks::decode_b64(abs).ok_or_else(|| Error::MalformedCounter {
                text: text.to_owned(),
            })?;
            if value < current {
                return Err(Error::CounterDecreased {
                    prev: current,
                    next: value,
                });
            }
            return Ok(value);
        }
        let delta = match self {
            Format::Tsv0 => ticks::decode_hex(text),
            Format::Tsv1 => ticks::decode_b64(text),
        }
        .ok_or_else(|| Error::MalformedCounter {
            text: text.to_owned(),
        })?;
        current
            .checked_add(delta)
            .ok_or_else(|| Error::MalformedCounter {
                text: text.to_owned(),
            })
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// True when `text` is free of control bytes. `\n` never appears here (lines
/// are already split), so everything below 0x20 is illegal.
pub(crate) fn is_clean(text: &str) -> bool {
    !text.bytes().any(|b| b < 0x20)
}

/// Writer-side scrub: control bytes become spaces. For tsv1, `\n` survives
/// (it turns into continuation lines); everything else below 0x20 does not.
pub(crate) fn sanitize(text: &str, keep_newline: bool) -> Cow<'_, str> {
    let dirty = text
        .bytes()
        .any(|b| b < 0x20 && !(keep_newline && b == b'\n'));
    if !dirty {
        return Cow::Borrowed(text);
    }
    Cow::Owned(
        text.chars()
            .map(|c| {
                if (c as u32) < 0x20 && !(keep_newline && c == '\n') {
                    ' '
                } else {
                    c
                }
            })
            .collect(),
    )
}
