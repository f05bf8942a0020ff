//! Codec and merge engine for append-only tab-separated log files.
//!
//! Two on-disk formats are supported: `tsv1` (base-64 tick deltas, absolute
//! resets, multi-line values via continuation lines) and the older `tsv0`
//! (hexadecimal deltas). [`Reader`] decodes records and seeks by time using
//! a self-building sparse index; [`Writer`] produces the same formats with
//! monotonic-clock-derived timestamps under an exclusive advisory lock;
//! [`MergeReader`] interleaves several files in timestamp order.
//!
//! The library is single-threaded and synchronous: readers tolerate growing
//! files and transient I/O, and nothing here spawns or blocks beyond the
//! underlying reads.

#![deny(clippy::all)]

pub mod codec;
mod error;
mod header;
mod line_iter;
mod merge;
mod reader;
mod record;
pub mod recent_set;
pub mod sliding_array;
mod writer;

pub use self::codec::{Format, Level};
pub use self::error::{Error, Result};
pub use self::header::{FieldSpec, Header};
pub use self::line_iter::{ByteAddr, ReadSeek, StreamLineIter};
pub use self::merge::MergeReader;
pub use self::reader::{Reader, ReaderOptions};
pub use self::record::LogRecord;
pub use self::recent_set::RecentSet;
pub use self::sliding_array::SlidingArray;
pub use self::writer::{Writer, WriterOptions};
