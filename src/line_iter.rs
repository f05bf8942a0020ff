//! Bidirectional line iteration over a byte source.
//!
//! The iterator works over three kinds of source: an in-memory buffer, a
//! seekable handle (a growing log file), or a forward-only stream (a pipe).
//! Bytes are cached in fixed-size chunks keyed by their aligned start
//! address; discovered line boundaries are cached in a [`SlidingArray`]
//! centered on the current line, so walking forward, backward, or seeking
//! near the current position rarely touches the source at all.
//!
//! A line is the byte range from a line start up to (not including) the next
//! `\n`. `next` returning `Ok(None)` means no complete line is available:
//! that is final for buffers and exhausted streams, and retriable for
//! handles, whose files may still be growing. A sheared final write shows
//! up as a missing terminator here and is simply not returned yet.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

use bytes::{Bytes, BytesMut};
use memchr::{memchr, memrchr};
use tracing::trace;

use crate::recent_set::RecentSet;
use crate::sliding_array::SlidingArray;

/// Byte offset into the source.
pub type ByteAddr = u64;

const DEFAULT_CHUNK_SIZE: u64 = 65536;
const LINE_CACHE_CAPACITY: usize = 64;
const DEFAULT_MAX_CHUNKS: usize = 16;

/// A seekable byte source.
pub trait ReadSeek: Read + Seek {}
impl<T: Read + Seek> ReadSeek for T {}

enum ByteSource {
    /// Static bytes, fully pre-seeded as one oversized chunk at address 0.
    Buffer,
    /// Seekable handle; chunks can be (re)read at any aligned address.
    Handle(Box<dyn ReadSeek>),
    /// Forward-only stream; bytes arrive sequentially and EOF is permanent.
    Stream(Box<dyn Read>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Avail {
    Yes,
    End,
    Pending,
}

enum Scan {
    Found(ByteAddr),
    End,
    Pending,
}

enum BackScan {
    Found(ByteAddr),
    Start,
    Pending,
}

/// Line iterator with bounded caching. See the module docs.
pub struct StreamLineIter {
    source: ByteSource,
    chunks: BTreeMap<ByteAddr, BytesMut>,
    recency: RecentSet<ByteAddr>,
    max_cached_chunks: usize,
    chunk_size: u64,
    /// Line-start addresses; logical index 0 is the start of the last
    /// returned line, index 1 the start of the next one. Index 1 is always
    /// populated.
    lines: SlidingArray<ByteAddr>,
    first_line_addr: ByteAddr,
    /// Streams only: the next address a read would fill.
    stream_pos: ByteAddr,
    /// Streams only: EOF observed, no more bytes will ever arrive.
    exhausted: bool,
}

impl StreamLineIter {
    /// Iterates over a static byte buffer.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let mut chunks = BTreeMap::new();
        chunks.insert(0, BytesMut::from(&data[..]));
        let mut iter = StreamLineIter::base(ByteSource::Buffer, 0);
        iter.chunks = chunks;
        iter
    }

    /// Iterates over a seekable handle. Addressing starts at byte 0 of the
    /// handle; line iteration starts at the handle's current position, which
    /// lets a caller hand over a handle with a pre-read prefix.
    pub fn from_handle<R: Read + Seek + 'static>(mut handle: R) -> io::Result<Self> {
        let pos = handle.stream_position()?;
        Ok(StreamLineIter::base(
            ByteSource::Handle(Box::new(handle)),
            pos,
        ))
    }

    pub fn from_file(file: File) -> io::Result<Self> {
        Self::from_handle(file)
    }

    /// Iterates over a forward-only stream; address 0 is the first byte read.
    pub fn from_stream<R: Read + 'static>(stream: R) -> Self {
        StreamLineIter::base(ByteSource::Stream(Box::new(stream)), 0)
    }

    fn base(source: ByteSource, start: ByteAddr) -> Self {
        let mut lines = SlidingArray::new(LINE_CACHE_CAPACITY);
        lines.put(1, &[start]);
        StreamLineIter {
            source,
            chunks: BTreeMap::new(),
            recency: RecentSet::new(),
            max_cached_chunks: DEFAULT_MAX_CHUNKS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            lines,
            first_line_addr: start,
            stream_pos: 0,
            exhausted: false,
        }
    }

    /// Overrides the chunk size (power of two). Mostly for tests and
    /// benchmarks that want to exercise chunk boundaries.
    pub fn with_chunk_size(mut self, size: u64) -> Self {
        assert!(size.is_power_of_two(), "chunk size must be a power of two");
        assert!(
            matches!(self.source, ByteSource::Handle(_) | ByteSource::Stream(_)),
            "buffer sources are pre-seeded"
        );
        self.chunk_size = size;
        self
    }

    /// Address where records begin; `prev` and `seek` never go below it.
    pub fn first_line_addr(&self) -> ByteAddr {
        self.first_line_addr
    }

    /// Moves the records-begin fence, typically to just past a header the
    /// caller has consumed through this iterator.
    pub fn set_first_line_addr(&mut self, addr: ByteAddr) {
        self.first_line_addr = addr;
    }

    /// Start address of the line the next `next()` call would return.
    pub fn next_line_addr(&self) -> ByteAddr {
        *self.lines.get(1).expect("line cache seeded")
    }

    /// Start address of the last returned line, if any.
    pub fn cur_line_addr(&self) -> Option<ByteAddr> {
        self.lines.get(0).copied()
    }

    /// Returns the next line without its terminator, or `None` when no
    /// complete line is available.
    #[allow(clippy::should_implement_trait)] // fallible, so not Iterator
    pub fn next(&mut self) -> io::Result<Option<Bytes>> {
        let start = self.next_line_addr();
        let nl = match self.lines.get(2) {
            Some(&following) => following - 1,
            None => match self.find_newline_fwd(start)? {
                Scan::Found(nl) => nl,
                Scan::End | Scan::Pending => return Ok(None),
            },
        };
        let Some(line) = self.copy_range(start, nl)? else {
            return Ok(None);
        };
        self.lines.put(2, &[nl + 1]);
        self.lines.slide(1);
        trace!(addr = start, len = line.len(), "line out");
        Ok(Some(line))
    }

    /// Steps back: returns the line before the last returned one and makes
    /// it current. `None` at the records-begin fence.
    pub fn prev(&mut self) -> io::Result<Option<Bytes>> {
        let fresh = self.lines.get(0).is_none();
        let cur = match self.lines.get(0).or_else(|| self.lines.get(1)) {
            Some(&a) => a,
            None => return Ok(None),
        };
        if cur <= self.first_line_addr {
            return Ok(None);
        }
        let cached = if fresh { None } else { self.lines.get(-1).copied() };
        let prev_start = match cached {
            Some(a) => a,
            None if cur - 1 <= self.first_line_addr => self.first_line_addr,
            None => match self.find_newline_back(cur - 2)? {
                BackScan::Found(nl) => nl + 1,
                BackScan::Start => self.first_line_addr,
                BackScan::Pending => return Ok(None),
            },
        };
        let Some(line) = self.copy_range(prev_start, cur - 1)? else {
            return Ok(None);
        };
        if fresh {
            self.lines.put(0, &[prev_start]);
        } else {
            self.lines.put(-1, &[prev_start]);
            self.lines.slide(-1);
        }
        Ok(Some(line))
    }

    /// Positions the iterator so the next `next()` returns the line
    /// containing `addr`. Returns `false` when no line contains it (before
    /// the fence, or at/past the end; the iterator is then parked where
    /// `next()` reports no line).
    pub fn seek(&mut self, addr: ByteAddr) -> io::Result<bool> {
        if addr < self.first_line_addr {
            self.reset_cache_to(self.first_line_addr);
            return Ok(false);
        }
        if let (Some(min), Some(lim)) = (self.lines.min_index(), self.lines.lim_index()) {
            let lo = *self.lines.get(min).expect("contiguous cache");
            let hi = *self.lines.get(lim - 1).expect("contiguous cache");
            if addr == hi {
                self.lines.slide(lim - 2);
                return Ok(true);
            }
            if (lo..hi).contains(&addr) {
                let (mut a, mut b) = (min, lim - 1);
                while b - a > 1 {
                    let mid = a + (b - a) / 2;
                    if *self.lines.get(mid).expect("contiguous cache") <= addr {
                        a = mid;
                    } else {
                        b = mid;
                    }
                }
                self.lines.slide(a - 1);
                return Ok(true);
            }
        }
        match self.fill_to(addr)? {
            Avail::End => {
                self.reset_cache_to(addr);
                return Ok(false);
            }
            Avail::Pending => return Err(io::ErrorKind::WouldBlock.into()),
            Avail::Yes => {}
        }
        let start = if addr == self.first_line_addr {
            addr
        } else {
            match self.find_newline_back(addr - 1)? {
                BackScan::Found(nl) => nl + 1,
                BackScan::Start => self.first_line_addr,
                BackScan::Pending => return Err(io::ErrorKind::WouldBlock.into()),
            }
        };
        self.reset_cache_to(start);
        Ok(true)
    }

    /// Positions past the last complete line (a trailing unterminated run is
    /// ignored) and returns that address. `prev()` then walks the file
    /// backwards from the end.
    pub fn seek_to_end(&mut self) -> io::Result<ByteAddr> {
        let phys = if matches!(self.source, ByteSource::Stream(_)) {
            while !self.exhausted {
                match self.fill_to(self.stream_pos)? {
                    Avail::End => break,
                    Avail::Pending => return Err(io::ErrorKind::WouldBlock.into()),
                    Avail::Yes => {}
                }
            }
            self.stream_pos
        } else if let ByteSource::Handle(handle) = &mut self.source {
            handle.seek(SeekFrom::End(0))?
        } else {
            self.coverage_end()
        };
        if phys <= self.first_line_addr {
            self.reset_cache_to(self.first_line_addr);
            return Ok(self.first_line_addr);
        }
        let end = match self.find_newline_back(phys - 1)? {
            BackScan::Found(nl) => nl + 1,
            BackScan::Start => self.first_line_addr,
            BackScan::Pending => return Err(io::ErrorKind::WouldBlock.into()),
        };
        self.reset_cache_to(end);
        Ok(end)
    }

    fn reset_cache_to(&mut self, start: ByteAddr) {
        self.lines.clear_all();
        self.lines.put(1, &[start]);
    }

    fn coverage_end(&self) -> ByteAddr {
        self.chunks
            .iter()
            .next_back()
            .map(|(start, buf)| start + buf.len() as u64)
            .unwrap_or(0)
    }

    fn lookup(&self, addr: ByteAddr) -> Option<(ByteAddr, &BytesMut)> {
        let (start, buf) = self.chunks.range(..=addr).next_back()?;
        (addr - start < buf.len() as u64).then_some((*start, buf))
    }

    /// Makes the byte at `addr` available in the chunk cache, reading from
    /// the source as needed.
    fn fill_to(&mut self, addr: ByteAddr) -> io::Result<Avail> {
        let chunk_size = self.chunk_size;
        loop {
            if let Some((start, _)) = self.lookup(addr) {
                if matches!(self.source, ByteSource::Handle(_)) {
                    self.recency.touch([start]);
                }
                return Ok(Avail::Yes);
            }
            if matches!(self.source, ByteSource::Buffer) {
                return Ok(Avail::End);
            }
            if matches!(self.source, ByteSource::Handle(_)) {
                match self.fill_chunk(addr & !(chunk_size - 1))? {
                    Avail::Yes => continue,
                    // A handle's EOF is a low-water mark, not final: the
                    // file may grow before the next call.
                    Avail::End => return Ok(Avail::End),
                    Avail::Pending => return Ok(Avail::Pending),
                }
            }
            // Stream: bytes only ever arrive at stream_pos.
            if self.exhausted || addr < self.stream_pos {
                // Before stream_pos everything is cached (stream chunks are
                // never evicted), so a miss means EOF.
                return Ok(Avail::End);
            }
            let c = self.stream_pos & !(chunk_size - 1);
            let ByteSource::Stream(stream) = &mut self.source else {
                unreachable!("source variants exhausted");
            };
            let buf = self.chunks.entry(c).or_default();
            let off = (self.stream_pos - c) as usize;
            debug_assert_eq!(off, buf.len());
            buf.resize(chunk_size as usize, 0);
            match stream.read(&mut buf[off..]) {
                Ok(0) => {
                    buf.truncate(off);
                    self.exhausted = true;
                }
                Ok(n) => {
                    buf.truncate(off + n);
                    self.stream_pos += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                    buf.truncate(off);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    buf.truncate(off);
                    return Ok(Avail::Pending);
                }
                Err(e) => {
                    buf.truncate(off);
                    return Err(e);
                }
            }
        }
    }

    /// Extends the chunk at aligned address `c` toward a full chunk with a
    /// single positioned read. Partial tails are extended in place.
    fn fill_chunk(&mut self, c: ByteAddr) -> io::Result<Avail> {
        let size = self.chunk_size as usize;
        let ByteSource::Handle(handle) = &mut self.source else {
            unreachable!("fill_chunk is handle-only");
        };
        let buf = self.chunks.entry(c).or_default();
        let mut filled = buf.len();
        debug_assert!(filled < size);
        handle.seek(SeekFrom::Start(c + filled as u64))?;
        buf.resize(size, 0);
        let outcome = loop {
            if filled == size {
                break Avail::Yes;
            }
            match handle.read(&mut buf[filled..]) {
                Ok(0) => break Avail::End,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Avail::Pending,
                Err(e) => {
                    buf.truncate(filled);
                    return Err(e);
                }
            }
        };
        buf.truncate(filled);
        if filled == 0 {
            self.chunks.remove(&c);
        } else {
            self.recency.touch([c]);
            if self.chunks.len() > self.max_cached_chunks {
                for evicted in self.recency.truncate(self.max_cached_chunks) {
                    trace!(chunk = evicted, "evicting cold chunk");
                    self.chunks.remove(&evicted);
                }
            }
        }
        Ok(outcome)
    }

    /// Finds the next `\n` at or after `from`.
    fn find_newline_fwd(&mut self, from: ByteAddr) -> io::Result<Scan> {
        let mut a = from;
        loop {
            match self.fill_to(a)? {
                Avail::End => return Ok(Scan::End),
                Avail::Pending => return Ok(Scan::Pending),
                Avail::Yes => {
                    let (start, buf) = self.lookup(a).expect("just filled");
                    let off = (a - start) as usize;
                    match memchr(b'\n', &buf[off..]) {
                        Some(i) => return Ok(Scan::Found(a + i as u64)),
                        None => a = start + buf.len() as u64,
                    }
                }
            }
        }
    }

    /// Finds the last `\n` at or before `from`, never looking below the
    /// records-begin fence.
    fn find_newline_back(&mut self, from: ByteAddr) -> io::Result<BackScan> {
        let floor = self.first_line_addr;
        let mut a = from;
        loop {
            if a < floor {
                return Ok(BackScan::Start);
            }
            match self.fill_to(a)? {
                Avail::End => return Ok(BackScan::Start),
                Avail::Pending => return Ok(BackScan::Pending),
                Avail::Yes => {
                    let (start, buf) = self.lookup(a).expect("just filled");
                    let off = (a - start) as usize;
                    let lo = floor.saturating_sub(start).min(off as u64) as usize;
                    if let Some(i) = memrchr(b'\n', &buf[lo..=off]) {
                        return Ok(BackScan::Found(start + lo as u64 + i as u64));
                    }
                    if start <= floor {
                        return Ok(BackScan::Start);
                    }
                    a = start - 1;
                }
            }
        }
    }

    /// Copies `[start, end)` out of the chunk cache, reloading chunks as
    /// needed.
    fn copy_range(&mut self, start: ByteAddr, end: ByteAddr) -> io::Result<Option<Bytes>> {
        let mut out = BytesMut::with_capacity((end - start) as usize);
        let mut a = start;
        while a < end {
            match self.fill_to(a)? {
                Avail::End | Avail::Pending => return Ok(None),
                Avail::Yes => {
                    let (cstart, buf) = self.lookup(a).expect("just filled");
                    let off = (a - cstart) as usize;
                    let take = (buf.len() - off).min((end - a) as usize);
                    out.extend_from_slice(&buf[off..off + take]);
                    a += take as u64;
                }
            }
        }
        Ok(Some(out.freeze()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor, Read, Seek, Write};

    use super::*;

    fn collect_all(iter: &mut StreamLineIter) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(line) = iter.next().unwrap() {
            out.push(String::from_utf8(line.to_vec()).unwrap());
        }
        out
    }

    #[test]
    fn next_over_buffer() {
        let mut iter = StreamLineIter::from_bytes(&b"one\ntwo\nthree\n"[..]);
        assert_eq!(collect_all(&mut iter), vec!["one", "two", "three"]);
        assert!(iter.next().unwrap().is_none());
    }

    #[test]
    fn trailing_partial_line_is_absent() {
        let mut iter = StreamLineIter::from_bytes(&b"one\ntwo"[..]);
        assert_eq!(collect_all(&mut iter), vec!["one"]);
    }

    #[test]
    fn prev_walks_backward() {
        let mut iter = StreamLineIter::from_bytes(&b"a\nbb\nccc\n"[..]);
        collect_all(&mut iter);
        // "ccc" was the last line returned; prev steps to the one before it.
        assert_eq!(iter.prev().unwrap().unwrap(), &b"bb"[..]);
        assert_eq!(iter.prev().unwrap().unwrap(), &b"a"[..]);
        assert!(iter.prev().unwrap().is_none());
        // Forward again from the top.
        assert_eq!(iter.next().unwrap().unwrap(), &b"bb"[..]);
    }

    #[test]
    fn next_prev_next_round_trip() {
        let mut iter = StreamLineIter::from_bytes(&b"a\nb\nc\n"[..]);
        assert_eq!(iter.next().unwrap().unwrap(), &b"a"[..]);
        assert_eq!(iter.next().unwrap().unwrap(), &b"b"[..]);
        assert_eq!(iter.prev().unwrap().unwrap(), &b"a"[..]);
        assert_eq!(iter.next().unwrap().unwrap(), &b"b"[..]);
        assert_eq!(iter.next().unwrap().unwrap(), &b"c"[..]);
    }

    #[test]
    fn seek_lands_on_containing_line() {
        let data = b"alpha\nbeta\ngamma\n";
        let mut iter = StreamLineIter::from_bytes(&data[..]);
        // "beta" spans bytes 6..=9, newline at 10.
        assert!(iter.seek(7).unwrap());
        assert_eq!(iter.next().unwrap().unwrap(), &b"beta"[..]);
        assert!(iter.seek(0).unwrap());
        assert_eq!(iter.next().unwrap().unwrap(), &b"alpha"[..]);
        assert!(iter.seek(10).unwrap());
        assert_eq!(iter.next().unwrap().unwrap(), &b"beta"[..]);
    }

    #[test]
    fn seek_beyond_end_is_absent() {
        let mut iter = StreamLineIter::from_bytes(&b"alpha\n"[..]);
        assert!(!iter.seek(100).unwrap());
        assert!(iter.next().unwrap().is_none());
    }

    #[test]
    fn seek_respects_fence() {
        let mut iter = StreamLineIter::from_bytes(&b"header\nbody\n"[..]);
        iter.next().unwrap().unwrap();
        iter.set_first_line_addr(7);
        assert!(!iter.seek(2).unwrap());
        assert_eq!(iter.next().unwrap().unwrap(), &b"body"[..]);
        assert!(iter.prev().unwrap().is_none(), "prev stops at the fence");
    }

    #[test]
    fn seek_to_end_then_prev() {
        let mut iter = StreamLineIter::from_bytes(&b"a\nb\nlast\ntail"[..]);
        let end = iter.seek_to_end().unwrap();
        assert_eq!(end, 9, "partial tail ignored");
        assert_eq!(iter.prev().unwrap().unwrap(), &b"last"[..]);
    }

    #[test]
    fn handle_source_sees_growth() {
        let mut file = tempfile::tempfile().unwrap();
        write!(file, "one\ntw").unwrap();
        file.rewind().unwrap();
        let reopened = file.try_clone().unwrap();
        let mut iter = StreamLineIter::from_handle(reopened).unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), &b"one"[..]);
        assert!(iter.next().unwrap().is_none(), "half-written line held back");
        file.seek(io::SeekFrom::End(0)).unwrap();
        write!(file, "o\n").unwrap();
        file.flush().unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), &b"two"[..]);
    }

    #[test]
    fn small_chunks_cross_boundaries() {
        let mut data = Vec::new();
        for i in 0..200 {
            data.extend_from_slice(format!("line number {i}\n").as_bytes());
        }
        let cursor = Cursor::new(data.clone());
        let mut iter = StreamLineIter::from_handle(cursor)
            .unwrap()
            .with_chunk_size(64);
        let lines = collect_all(&mut iter);
        assert_eq!(lines.len(), 200);
        assert_eq!(lines[199], "line number 199");
        // And backward across the same boundaries, starting from the line
        // before the last one returned.
        assert_eq!(iter.prev().unwrap().unwrap(), &b"line number 198"[..]);
        assert_eq!(iter.prev().unwrap().unwrap(), &b"line number 197"[..]);
    }

    /// Yields `WouldBlock` before every productive read.
    struct Flaky<R> {
        inner: R,
        ready: bool,
    }

    impl<R: Read> Read for Flaky<R> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.ready {
                self.ready = false;
                self.inner.read(buf)
            } else {
                self.ready = true;
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }

    #[test]
    fn stream_retries_after_would_block() {
        let flaky = Flaky {
            inner: Cursor::new(b"aa\nbb\n".to_vec()),
            ready: false,
        };
        let mut iter = StreamLineIter::from_stream(flaky);
        // First attempt hits WouldBlock; state does not advance.
        assert!(iter.next().unwrap().is_none());
        // The retry pulls everything the cursor has.
        assert_eq!(iter.next().unwrap().unwrap(), &b"aa"[..]);
        assert_eq!(iter.next().unwrap().unwrap(), &b"bb"[..]);
        // Past the data: one WouldBlock probe, then EOF, which is permanent.
        assert!(iter.next().unwrap().is_none());
        assert!(iter.next().unwrap().is_none());
        assert!(iter.next().unwrap().is_none(), "stream EOF is permanent");
    }

    #[test]
    fn stream_prev_within_cache() {
        let mut iter = StreamLineIter::from_stream(Cursor::new(b"x\ny\n".to_vec()));
        assert_eq!(iter.next().unwrap().unwrap(), &b"x"[..]);
        assert_eq!(iter.next().unwrap().unwrap(), &b"y"[..]);
        assert_eq!(iter.prev().unwrap().unwrap(), &b"x"[..]);
    }
}
