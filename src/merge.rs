//! Timestamp-ordered merging of several readers.

use tracing::debug;

use crate::error::Result;
use crate::reader::Reader;
use crate::record::LogRecord;

/// K-way merge over a fixed set of readers, ordered by record timestamp.
///
/// A binary min-heap holds `(next timestamp, source index)` pairs: the
/// look-ahead timestamp lives in the heap, not behind a re-peek, so heap
/// repairs are pure arithmetic. Equal timestamps resolve by source index,
/// which makes the merge stable with respect to the source list.
pub struct MergeReader {
    readers: Vec<Reader>,
    heap: Vec<(f64, usize)>,
    primed: bool,
}

impl MergeReader {
    pub fn new(readers: Vec<Reader>) -> Self {
        MergeReader {
            readers,
            heap: Vec::new(),
            primed: false,
        }
    }

    /// Number of underlying sources still capable of producing records.
    pub fn live_sources(&self) -> usize {
        self.heap.len()
    }

    /// Gives the readers back, e.g. to inspect their headers.
    pub fn into_inner(self) -> Vec<Reader> {
        self.readers
    }

    fn prime(&mut self) -> Result<()> {
        if self.primed {
            return Ok(());
        }
        self.heap.clear();
        for (i, reader) in self.readers.iter_mut().enumerate() {
            if let Some(record) = reader.peek()? {
                self.heap.push((record.timestamp(), i));
            }
        }
        let len = self.heap.len();
        for at in (0..len / 2).rev() {
            self.sift_down(at);
        }
        self.primed = true;
        debug!(sources = self.readers.len(), live = len, "merge primed");
        Ok(())
    }

    /// The earliest upcoming record across all sources.
    pub fn peek(&mut self) -> Result<Option<&LogRecord>> {
        self.prime()?;
        match self.heap.first() {
            Some(&(_, i)) => self.readers[i].peek(),
            None => Ok(None),
        }
    }

    /// Consumes and returns the earliest record.
    #[allow(clippy::should_implement_trait)] // fallible, so not Iterator
    pub fn next(&mut self) -> Result<Option<LogRecord>> {
        self.prime()?;
        let Some(&(_, i)) = self.heap.first() else {
            return Ok(None);
        };
        let record = self.readers[i].next()?;
        match self.readers[i].peek()? {
            Some(next) => {
                self.heap[0] = (next.timestamp(), i);
                self.sift_down(0);
            }
            None => {
                let last = self.heap.pop().expect("heap nonempty");
                if !self.heap.is_empty() {
                    self.heap[0] = last;
                    self.sift_down(0);
                }
            }
        }
        Ok(record)
    }

    /// Forwards the seek to every source and rebuilds the heap.
    pub fn seek(&mut self, epoch: f64) -> Result<&mut Self> {
        for reader in &mut self.readers {
            reader.seek(epoch)?;
        }
        self.primed = false;
        self.prime()?;
        Ok(self)
    }

    fn less(a: (f64, usize), b: (f64, usize)) -> bool {
        a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).is_lt()
    }

    fn sift_down(&mut self, mut at: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * at + 1;
            let right = 2 * at + 2;
            let mut smallest = at;
            if left < len && Self::less(self.heap[left], self.heap[smallest]) {
                smallest = left;
            }
            if right < len && Self::less(self.heap[right], self.heap[smallest]) {
                smallest = right;
            }
            if smallest == at {
                return;
            }
            self.heap.swap(at, smallest);
            at = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ReaderOptions;

    fn reader(start_epoch: u64, scale: u32, deltas: &[&str], tag: &str) -> Reader {
        let mut content = format!(
            "#!hydralog-dump --in-format=tsv1\n#% start_epoch={start_epoch}\ttimestamp_scale={scale}\n#: dT\tmessage\n"
        );
        for (i, d) in deltas.iter().enumerate() {
            content.push_str(&format!("{d}\t{tag}{i}\n"));
        }
        Reader::from_bytes(content.into_bytes(), ReaderOptions::default()).unwrap()
    }

    fn drain(merge: &mut MergeReader) -> Vec<(f64, String)> {
        let mut out = Vec::new();
        while let Some(r) = merge.next().unwrap() {
            out.push((r.timestamp(), r.message().unwrap().to_owned()));
        }
        out
    }

    #[test]
    fn merges_in_timestamp_order() {
        let a = reader(100, 1, &["0", "4"], "a"); // 100, 104
        let b = reader(101, 1, &["0", "4"], "b"); // 101, 105
        let mut m = MergeReader::new(vec![a, b]);
        let got = drain(&mut m);
        let times: Vec<f64> = got.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![100.0, 101.0, 104.0, 105.0]);
        assert_eq!(got[0].1, "a0");
        assert_eq!(got[1].1, "b0");
    }

    #[test]
    fn ties_resolve_by_source_index() {
        let a = reader(100, 1, &["0"], "a");
        let b = reader(100, 1, &["0"], "b");
        let c = reader(100, 1, &["0"], "c");
        let mut m = MergeReader::new(vec![a, b, c]);
        let got = drain(&mut m);
        let tags: Vec<&str> = got.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(tags, vec!["a0", "b0", "c0"]);
    }

    #[test]
    fn mixed_scales_merge_correctly() {
        // Same instants expressed at different tick scales.
        let a = reader(100, 16, &["0", "G"], "a"); // 100.0, 101.0
        let b = reader(100, 1, &["0", "1"], "b"); // 100.0, 101.0
        let mut m = MergeReader::new(vec![a, b]);
        let got = drain(&mut m);
        let tags: Vec<&str> = got.iter().map(|(_, m)| m.as_str()).collect();
        assert_eq!(tags, vec!["a0", "b0", "a1", "b1"]);
    }

    #[test]
    fn seek_forwards_to_all_sources() {
        let a = reader(100, 1, &["0", "10"], "a"); // 100, 164
        let b = reader(110, 1, &["0"], "b"); // 110
        let mut m = MergeReader::new(vec![a, b]);
        m.seek(105.0).unwrap();
        let got = drain(&mut m);
        let times: Vec<f64> = got.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![110.0, 164.0]);
    }

    #[test]
    fn empty_sources_are_dropped() {
        let a = reader(100, 1, &[], "a");
        let b = reader(100, 1, &["0"], "b");
        let mut m = MergeReader::new(vec![a, b]);
        assert_eq!(m.peek().unwrap().unwrap().message(), Some("b0"));
        assert_eq!(m.live_sources(), 1);
        drain(&mut m);
        assert_eq!(m.live_sources(), 0);
    }
}
