//! Format-aware record reading: header parse, record decode, the
//! self-building sparse index, and time-based seeking.

use std::fs::File;
use std::io::{Read, Seek};
use std::path::Path;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::codec::{self, level, ticks, Format};
use crate::error::{Error, Result};
use crate::header::{Header, HeaderBuilder};
use crate::line_iter::{ByteAddr, StreamLineIter};
use crate::record::LogRecord;

/// Tuning for the automatic seek index.
///
/// Every `autoindex_period` counter-advancing records, one `(ticks, address)`
/// pair is remembered; once `autoindex_size` pairs accumulate, every other
/// one is discarded and the period doubles. A non-positive period disables
/// index growth entirely.
#[derive(Debug, Clone, Copy)]
pub struct ReaderOptions {
    pub autoindex_period: i64,
    pub autoindex_size: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        ReaderOptions {
            autoindex_period: 256,
            autoindex_size: 256,
        }
    }
}

/// Reads records from one log file (either format).
///
/// The reader owns its line iterator and keeps a one-record look-ahead for
/// `peek`. Records come out in file order; their tick counter never
/// decreases. Concurrent writers are fine: end-of-file is soft, and a
/// half-flushed final line is simply not there yet.
pub struct Reader {
    iter: StreamLineIter,
    header: Header,
    cur_ticks: u64,
    peeked: Option<LogRecord>,
    /// Sparse seek index: `(ticks, addr)` pairs where `ticks` is the counter
    /// value in force *before* the record at byte `addr`. Sorted on both
    /// components. Entry 0 is always `(0, first-record-address)`.
    index: Vec<(u64, ByteAddr)>,
    /// A scheduled index entry waiting for the next record's address.
    pending_entry: Option<u64>,
    countdown: i64,
    period: i64,
    autoindex_size: usize,
}

impl Reader {
    /// Opens a log file on disk.
    pub fn open(path: impl AsRef<Path>, opts: ReaderOptions) -> Result<Reader> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opening log file");
        Self::from_iter(StreamLineIter::from_file(file)?, opts)
    }

    /// Reads from an in-memory byte buffer.
    pub fn from_bytes(data: impl Into<Bytes>, opts: ReaderOptions) -> Result<Reader> {
        Self::from_iter(StreamLineIter::from_bytes(data), opts)
    }

    /// Reads from a seekable handle positioned at the magic line.
    pub fn from_handle<R: Read + Seek + 'static>(
        handle: R,
        opts: ReaderOptions,
    ) -> Result<Reader> {
        Self::from_iter(StreamLineIter::from_handle(handle)?, opts)
    }

    /// Reads from a forward-only stream such as a pipe.
    pub fn from_stream<R: Read + 'static>(stream: R, opts: ReaderOptions) -> Result<Reader> {
        Self::from_iter(StreamLineIter::from_stream(stream), opts)
    }

    fn from_iter(mut iter: StreamLineIter, opts: ReaderOptions) -> Result<Reader> {
        let magic = iter.next()?.ok_or(Error::MissingMagic)?;
        let mut builder = HeaderBuilder::from_magic(&decode_line(&magic)?)?;
        loop {
            let line = iter.next()?.ok_or_else(|| Error::MalformedHeader {
                line: "missing #: field declaration".to_owned(),
            })?;
            let text = decode_line(&line)?;
            if text.starts_with("#%") {
                builder.add_metadata(&text)?;
            } else if text.starts_with("#:") {
                builder.set_fields(&text)?;
                break;
            } else {
                return Err(Error::MalformedHeader { line: text });
            }
        }
        let header = builder.finish()?;
        let first_addr = iter.next_line_addr();
        iter.set_first_line_addr(first_addr);
        debug!(
            format = %header.format,
            fields = header.fields.len(),
            start_epoch = header.start_epoch,
            scale = header.timestamp_scale,
            "log opened"
        );
        Ok(Reader {
            iter,
            header,
            cur_ticks: 0,
            peeked: None,
            index: vec![(0, first_addr)],
            pending_entry: None,
            countdown: opts.autoindex_period,
            period: opts.autoindex_period,
            autoindex_size: opts.autoindex_size.max(2),
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// The running tick counter, including any record currently peeked.
    pub fn current_ticks(&self) -> u64 {
        self.cur_ticks
    }

    #[cfg(test)]
    pub(crate) fn index_entries(&self) -> &[(u64, ByteAddr)] {
        &self.index
    }

    /// The upcoming record without consuming it.
    pub fn peek(&mut self) -> Result<Option<&LogRecord>> {
        if self.peeked.is_none() {
            self.peeked = self.fetch()?;
        }
        Ok(self.peeked.as_ref())
    }

    /// The next record, or `None` at end of input.
    #[allow(clippy::should_implement_trait)] // fallible, so not Iterator
    pub fn next(&mut self) -> Result<Option<LogRecord>> {
        if let Some(record) = self.peeked.take() {
            return Ok(Some(record));
        }
        self.fetch()
    }

    /// Positions the reader so the next record is the first one whose
    /// timestamp is at or past `epoch` (absent when every record is
    /// earlier).
    pub fn seek(&mut self, epoch: f64) -> Result<&mut Self> {
        let scale = self.header.timestamp_scale as f64;
        let raw = (epoch - self.header.start_epoch) * scale;
        if raw.ceil() <= 0.0 {
            debug!(epoch, "seek to start");
            self.iter.seek(self.iter.first_line_addr())?;
            self.cur_ticks = 0;
            self.reset_index_cursor();
            return Ok(self);
        }
        let target = raw.ceil() as u64;
        if target <= self.cur_ticks {
            // Resume from the closest index entry strictly below the target,
            // so a record sitting exactly on it is still ahead of us.
            let at = self.index.partition_point(|&(t, _)| t < target) - 1;
            let (ticks, addr) = self.index[at];
            debug!(target, ticks, addr, "seeking via index");
            self.iter.seek(addr)?;
            self.cur_ticks = ticks;
            self.reset_index_cursor();
        }
        loop {
            if self.peek()?.is_none() || self.cur_ticks >= target {
                break;
            }
            self.next()?;
        }
        Ok(self)
    }

    /// Jumps to the end and returns the final record, or `None` for a file
    /// with no records. Leaves the reader at end-of-input.
    pub fn seek_last(&mut self) -> Result<Option<LogRecord>> {
        self.reset_index_cursor();
        self.iter.seek_to_end()?;
        // Walk back past comments, blanks, and continuations to the final
        // primary record line.
        let text = loop {
            let Some(raw) = self.iter.prev()? else {
                return Ok(None);
            };
            let text = decode_line(&raw)?;
            if text.is_empty() || text.starts_with('#') || text.starts_with('\t') {
                continue;
            }
            break text;
        };
        let addr = self.iter.cur_line_addr().expect("prev returned a line");
        if self.header.format == Format::Tsv1 && text.starts_with('=') {
            // Absolute counter: the record decodes without any context.
            debug!(addr, "seek_last lands on an absolute record");
            self.cur_ticks = 0;
            self.iter.seek(addr)?;
            return self.next();
        }
        // Differential tail: replay from the nearest indexed position. Any
        // anchor comments on the way reset the counter and shorten nothing
        // here, but they keep the replay correct.
        let at = self.index.partition_point(|&(_, a)| a <= addr) - 1;
        let (ticks, start) = self.index[at];
        debug!(addr, ticks, start, "seek_last replays from index");
        self.iter.seek(start)?;
        self.cur_ticks = ticks;
        let mut last = None;
        while let Some(record) = self.next()? {
            last = Some(record);
        }
        Ok(last)
    }

    fn reset_index_cursor(&mut self) {
        self.peeked = None;
        self.pending_entry = None;
        self.countdown = self.period;
    }

    /// Decodes the next record, skipping comments and blanks, honoring
    /// anchor comments, and maintaining the auto-index.
    fn fetch(&mut self) -> Result<Option<LogRecord>> {
        loop {
            let addr = self.iter.next_line_addr();
            let Some(raw) = self.iter.next()? else {
                // End of input: a scheduled entry anchors here, which is
                // exactly where the next record lands if the file grows.
                self.flush_pending(addr);
                return Ok(None);
            };
            let text = decode_line(&raw)?;
            if text.is_empty() {
                continue;
            }
            if let Some(rest) = text.strip_prefix('#') {
                if let Some(hex) = rest.strip_prefix("\tt=") {
                    match ticks::decode_hex(hex) {
                        Some(t) if t >= self.cur_ticks => {
                            trace!(ticks = t, "anchor comment");
                            self.cur_ticks = t;
                            self.pending_entry = Some(t);
                        }
                        _ => warn!(anchor = hex, "ignoring stale or malformed anchor"),
                    }
                }
                continue;
            }
            if text.starts_with('\t') {
                return Err(Error::OrphanContinuation { addr });
            }
            self.flush_pending(addr);
            let record = self.decode_record(&text)?;
            return Ok(Some(record));
        }
    }

    fn decode_record(&mut self, text: &str) -> Result<LogRecord> {
        let cols: Vec<&str> = text.split('\t').collect();
        let declared = self.header.fields.len();
        if cols.len() > declared {
            return Err(Error::ExtraColumns {
                have: cols.len(),
                declared,
            });
        }
        let prev = self.cur_ticks;
        self.cur_ticks = self.header.format.decode_counter(cols[0], prev)?;
        let scale = self.header.timestamp_scale as f64;
        let mut record = LogRecord::new(
            self.header.start_epoch + self.cur_ticks as f64 / scale,
            self.header.timestamp_scale > 1,
        );
        for (i, spec) in self.header.fields.iter().enumerate().skip(1) {
            let raw = cols.get(i).copied().unwrap_or("");
            if !codec::is_clean(raw) {
                return Err(Error::ControlCharacter {
                    field: spec.name.clone(),
                });
            }
            let value = if raw.is_empty() {
                match &spec.default {
                    Some(default) => default.clone(),
                    None => continue,
                }
            } else {
                raw.to_owned()
            };
            let value = if spec.name == "level" {
                level::canonicalize(&value).unwrap_or(value)
            } else {
                value
            };
            record.insert(&spec.name, value);
        }
        if self.header.format.supports_continuation() {
            self.read_continuations(&mut record, declared)?;
        }
        if self.period > 0 {
            self.countdown -= 1;
            if self.countdown <= 0 && self.cur_ticks > prev {
                self.pending_entry = Some(self.cur_ticks);
                self.countdown = self.period;
            }
        }
        Ok(record)
    }

    /// Consumes TAB-prefixed lines extending the record just decoded; the
    /// first non-continuation line is pushed back.
    fn read_continuations(&mut self, record: &mut LogRecord, declared: usize) -> Result<()> {
        loop {
            let Some(raw) = self.iter.next()? else {
                return Ok(());
            };
            if raw.first() != Some(&b'\t') {
                self.iter.prev()?;
                return Ok(());
            }
            let text = decode_line(&raw)?;
            let column = text.bytes().take_while(|b| *b == b'\t').count();
            if column >= declared {
                return Err(Error::ContinuationColumn {
                    column,
                    fields: declared,
                });
            }
            let fragment = &text[column..];
            let name = self.header.fields[column].name.clone();
            if !codec::is_clean(fragment) {
                return Err(Error::ControlCharacter { field: name });
            }
            record.append_fragment(&name, fragment);
        }
    }

    fn flush_pending(&mut self, addr: ByteAddr) {
        let Some(ticks) = self.pending_entry.take() else {
            return;
        };
        let in_order = self
            .index
            .last()
            .is_none_or(|&(t, a)| ticks > t && addr > a);
        if !in_order {
            return;
        }
        self.index.push((ticks, addr));
        trace!(ticks, addr, entries = self.index.len(), "index entry");
        if self.index.len() >= self.autoindex_size {
            self.index = self.index.iter().copied().step_by(2).collect();
            self.period = self.period.saturating_mul(2);
            debug!(period = self.period, "auto-index compacted");
        }
    }
}

fn decode_line(raw: &Bytes) -> Result<String> {
    let bytes = raw.strip_suffix(b"\r").unwrap_or(raw);
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|_| Error::InvalidUtf8)
}
