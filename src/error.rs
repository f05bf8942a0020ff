use std::io;
use std::path::PathBuf;

use snafu::Snafu;

/// All the ways reading, writing, or seeking a log file can fail.
///
/// Transient I/O conditions (`Interrupted`, `WouldBlock`) are handled inside
/// the stream layer and never surface here; everything in this enum is a real
/// failure the caller has to deal with.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// The first line is not a `#!hydralog-dump --in-format=...` magic line.
    #[snafu(display("missing or malformed magic line"))]
    MissingMagic,

    #[snafu(display("unknown log format {found:?}"))]
    UnknownFormat { found: String },

    #[snafu(display("header is missing the required start_epoch metadata"))]
    MissingStartEpoch,

    #[snafu(display("malformed header line {line:?}"))]
    MalformedHeader { line: String },

    #[snafu(display("duplicate field {name:?} in header"))]
    DuplicateField { name: String },

    #[snafu(display("invalid field name {name:?}"))]
    InvalidFieldName { name: String },

    #[snafu(display("first field must be {expected:?}, found {found:?}"))]
    WrongFirstField { expected: String, found: String },

    #[snafu(display("malformed tick counter {text:?}"))]
    MalformedCounter { text: String },

    #[snafu(display("tick counter decreased from {prev} to {next}"))]
    CounterDecreased { prev: u64, next: u64 },

    #[snafu(display("control character in field {field:?}"))]
    ControlCharacter { field: String },

    #[snafu(display(
        "continuation column {column} exceeds the {fields} declared fields"
    ))]
    ContinuationColumn { column: usize, fields: usize },

    #[snafu(display("continuation line at byte {addr} without a preceding record"))]
    OrphanContinuation { addr: u64 },

    #[snafu(display("record has {have} columns but only {declared} declared fields"))]
    ExtraColumns { have: usize, declared: usize },

    #[snafu(display("record is not valid UTF-8"))]
    InvalidUtf8,

    #[snafu(display("I/O error: {source}"))]
    Io { source: io::Error },

    #[snafu(display("{path:?} is being written by another process"))]
    Locked { path: PathBuf },

    #[snafu(display("{path:?} already exists"))]
    FileExists { path: PathBuf },

    #[snafu(display("no field named {name:?} in this record"))]
    UnknownField { name: String },
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Self {
        Error::Io { source }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
