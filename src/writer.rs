//! Record emission: header, encoded records, continuation lines, periodic
//! anchors, and the single-writer lock.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, BytesMut};
use fs2::FileExt;
use indexmap::IndexMap;
use tracing::{debug, trace, warn};

use crate::codec::{self, level, ticks, Format, Level};
use crate::error::{Error, Result};
use crate::header::{self, FieldSpec, Header};
use crate::reader::{Reader, ReaderOptions};

/// Configuration for a fresh log file.
#[derive(Debug, Clone)]
pub struct WriterOptions {
    pub format: Format,
    /// Data fields after the counter column. The default set is a level
    /// column defaulting to `I` (so INFO-level records cost no bytes) and a
    /// message column.
    pub fields: Vec<FieldSpec>,
    pub timestamp_scale: u32,
    pub metadata: IndexMap<String, String>,
    /// Emit a `#\tt=<hex>` anchor each time this many bytes have been
    /// written; 0 disables anchors.
    pub index_spacing: u64,
}

impl Default for WriterOptions {
    fn default() -> Self {
        WriterOptions {
            format: Format::Tsv1,
            fields: vec![
                FieldSpec::with_default("level", "I"),
                FieldSpec::new("message"),
            ],
            timestamp_scale: 1,
            metadata: IndexMap::new(),
            index_spacing: 0,
        }
    }
}

/// Appends records to one log file, holding an exclusive advisory lock for
/// its whole lifetime.
///
/// Tick counters derive from the monotonic clock, anchored to the wall clock
/// once at startup, so a wall-clock step never bends the record spacing. A
/// record is fully encoded before a single write; a failed write cannot
/// leave half a record behind.
pub struct Writer {
    file: File,
    path: PathBuf,
    header: Header,
    prev_ticks: u64,
    mono_start: Instant,
    /// Wall-clock seconds already elapsed between `start_epoch` and
    /// `mono_start`.
    base_elapsed: f64,
    bytes_written: u64,
    index_spacing: u64,
    next_anchor_at: u64,
}

impl Writer {
    /// Creates a fresh log file. Fails if the path exists or another
    /// process holds the write lock.
    pub fn create(path: impl AsRef<Path>, opts: WriterOptions) -> Result<Writer> {
        let path = path.as_ref();
        let wall = unix_now();
        let start_epoch = if opts.timestamp_scale == 1 {
            wall.trunc()
        } else {
            wall
        };
        let mut fields = vec![FieldSpec::new(opts.format.first_field())];
        for field in opts.fields {
            if field.name == opts.format.first_field()
                || fields.iter().any(|f| f.name == field.name)
            {
                return Err(Error::DuplicateField { name: field.name });
            }
            if !header::valid_name(&field.name) {
                return Err(Error::InvalidFieldName { name: field.name });
            }
            fields.push(field);
        }
        let header = Header {
            format: opts.format,
            metadata: opts.metadata,
            start_epoch,
            timestamp_scale: opts.timestamp_scale,
            fields,
        };
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::AlreadyExists {
                    Error::FileExists {
                        path: path.to_owned(),
                    }
                } else {
                    e.into()
                }
            })?;
        lock(&file, path)?;
        let mut writer = Writer {
            file,
            path: path.to_owned(),
            base_elapsed: wall - header.start_epoch,
            header,
            prev_ticks: 0,
            mono_start: Instant::now(),
            bytes_written: 0,
            index_spacing: 0,
            next_anchor_at: 0,
        };
        let head = writer.header.emit().into_bytes();
        writer.file.write_all(&head)?;
        writer.bytes_written = head.len() as u64;
        writer.set_index_spacing(opts.index_spacing);
        debug!(path = %writer.path.display(), format = %writer.header.format, "log created");
        Ok(writer)
    }

    /// Starts a new file inheriting fields, defaults, scale, and metadata
    /// from an existing header (the rotation path). The epoch is fresh.
    pub fn create_from_template(path: impl AsRef<Path>, template: &Header) -> Result<Writer> {
        Writer::create(
            path,
            WriterOptions {
                format: template.format,
                fields: template.data_fields().to_vec(),
                timestamp_scale: template.timestamp_scale,
                metadata: template.metadata.clone(),
                index_spacing: 0,
            },
        )
    }

    /// Re-opens an existing file for appending: reads the header and final
    /// counter back, then continues the tick sequence monotonically.
    pub fn append(path: impl AsRef<Path>) -> Result<Writer> {
        let path = path.as_ref();
        let mut reader = Reader::open(path, ReaderOptions::default())?;
        reader.seek_last()?;
        let header = reader.header().clone();
        let prev_ticks = reader.current_ticks();
        drop(reader);
        let file = OpenOptions::new().append(true).open(path)?;
        lock(&file, path)?;
        let bytes_written = file.metadata()?.len();
        let wall = unix_now();
        let scale = header.timestamp_scale as f64;
        let mut base_elapsed = wall - header.start_epoch;
        if (base_elapsed * scale).floor() < prev_ticks as f64 {
            // The wall clock stepped back since the file was written;
            // re-anchor so the counter cannot decrease.
            warn!(path = %path.display(), "wall clock behind the file; re-anchoring");
            base_elapsed = prev_ticks as f64 / scale;
        }
        debug!(path = %path.display(), prev_ticks, "log reopened for append");
        Ok(Writer {
            file,
            path: path.to_owned(),
            header,
            prev_ticks,
            mono_start: Instant::now(),
            base_elapsed,
            bytes_written,
            index_spacing: 0,
            next_anchor_at: 0,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Enables (or disables, with 0) periodic anchor comments from here on.
    pub fn set_index_spacing(&mut self, spacing: u64) {
        self.index_spacing = spacing;
        if spacing > 0 {
            self.next_anchor_at = (self.bytes_written / spacing + 1) * spacing;
        }
    }

    fn now_ticks(&self) -> u64 {
        let elapsed = self.mono_start.elapsed().as_secs_f64() + self.base_elapsed;
        let t = (elapsed * self.header.timestamp_scale as f64).floor();
        if t <= 0.0 {
            0
        } else {
            t as u64
        }
    }

    /// Writes one record with the given field values, timestamped now.
    /// Unlisted declared fields are empty; unknown names are ignored with a
    /// log complaint rather than an error, matching how loggers must not
    /// fail their callers.
    pub fn record(&mut self, fields: &[(&str, &str)]) -> Result<()> {
        self.record_at_ticks(self.now_ticks(), fields)
    }

    /// Writes one record at an explicit counter value: the replay/import
    /// path, and what the clock-driven `record` call lands on.
    pub fn record_at_ticks(&mut self, ticks: u64, fields: &[(&str, &str)]) -> Result<()> {
        let format = self.header.format;
        for (name, _) in fields {
            if !self.header.fields.iter().any(|f| f.name == *name) {
                warn!(field = *name, "dropping value for undeclared field");
            }
        }
        let mut buf = BytesMut::new();
        if self.index_spacing > 0 && self.bytes_written >= self.next_anchor_at {
            buf.extend_from_slice(
                format!("#\tt={}\n", ticks::encode_hex(self.prev_ticks)).as_bytes(),
            );
            while self.next_anchor_at <= self.bytes_written {
                self.next_anchor_at += self.index_spacing;
            }
        }
        let (counter, effective) = if ticks >= self.prev_ticks {
            let delta = ticks - self.prev_ticks;
            let text = if delta == 0 {
                String::new()
            } else {
                format.encode_delta(delta)
            };
            (text, ticks)
        } else if format == Format::Tsv1 {
            warn!(ticks, prev = self.prev_ticks, "counter went backwards; writing absolute");
            (format.encode_absolute(ticks), ticks)
        } else {
            warn!(ticks, prev = self.prev_ticks, "counter went backwards; tsv0 holds it");
            (String::new(), self.prev_ticks)
        };
        let mut parts: Vec<String> = Vec::with_capacity(self.header.fields.len());
        parts.push(counter);
        for spec in self.header.data_fields() {
            let raw = fields
                .iter()
                .find(|(name, _)| *name == spec.name)
                .map(|(_, value)| *value)
                .unwrap_or("");
            let clean = codec::sanitize(raw, format.supports_continuation());
            let value = if spec.name == "level" {
                level::alias(&clean)
            } else {
                clean.into_owned()
            };
            let value = if spec.default.as_deref() == Some(value.as_str()) {
                String::new()
            } else {
                value
            };
            parts.push(value);
        }
        for (i, part) in parts.iter().enumerate() {
            if i > 0 {
                buf.put_u8(b'\t');
            }
            buf.extend_from_slice(part.split('\n').next().unwrap_or("").as_bytes());
        }
        buf.put_u8(b'\n');
        for (column, part) in parts.iter().enumerate().skip(1) {
            for fragment in part.split('\n').skip(1) {
                for _ in 0..column {
                    buf.put_u8(b'\t');
                }
                buf.extend_from_slice(fragment.as_bytes());
                buf.put_u8(b'\n');
            }
        }
        self.file.write_all(&buf)?;
        self.bytes_written += buf.len() as u64;
        self.prev_ticks = effective;
        trace!(ticks = effective, bytes = buf.len(), "record written");
        Ok(())
    }

    /// Writes a record at `level` with `message` plus extra field values.
    pub fn log(&mut self, level: Level, message: &str, extra: &[(&str, &str)]) -> Result<()> {
        let mut fields: Vec<(&str, &str)> = Vec::with_capacity(extra.len() + 2);
        fields.push(("level", level.name()));
        fields.push(("message", message));
        fields.extend(extra.iter().copied());
        self.record(&fields)
    }
}

macro_rules! level_helpers {
    ($(($plain:ident, $kv:ident, $level:expr);)*) => {
        impl Writer {
            $(
                pub fn $plain(&mut self, message: &str) -> Result<()> {
                    self.log($level, message, &[])
                }

                pub fn $kv(&mut self, message: &str, extra: &[(&str, &str)]) -> Result<()> {
                    self.log($level, message, extra)
                }
            )*
        }
    };
}

// The classic logger surface. `_kv` variants take the trailing mapping form.
level_helpers! {
    (trace, trace_kv, Level::Trace);
    (debug, debug_kv, Level::Debug);
    (info, info_kv, Level::Info);
    (warn, warn_kv, Level::Warning);
    (error, error_kv, Level::Error);
    (crit, crit_kv, Level::Critical);
    (alert, alert_kv, Level::Alert);
    (emerg, emerg_kv, Level::Emergency);
}

fn lock(file: &File, path: &Path) -> Result<()> {
    file.try_lock_exclusive().map_err(|e| {
        debug!(path = %path.display(), error = %e, "exclusive lock refused");
        Error::Locked {
            path: path.to_owned(),
        }
    })
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
