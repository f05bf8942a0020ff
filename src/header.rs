//! File header model: the `#!` magic line, `#%` metadata, and the `#:`
//! field declaration.

use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;

use crate::codec::Format;
use crate::error::{Error, Result};

static MAGIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--(?:in-)?format=(\S+)").expect("magic regex"));
static NAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\w+$").expect("name regex"));

/// Whether `name` is a legal field name (`\w+`).
pub(crate) fn valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

/// One declared field: `NAME[:ENC][=DEFAULT]`.
///
/// The encoding attribute is carried verbatim and never validated; `*N` on
/// the first field doubles as the timestamp scale. A present-but-empty
/// default means the empty string is a legal stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub encoding: Option<String>,
    pub default: Option<String>,
}

impl FieldSpec {
    pub fn new(name: &str) -> Self {
        FieldSpec {
            name: name.to_owned(),
            encoding: None,
            default: None,
        }
    }

    pub fn with_default(name: &str, default: &str) -> Self {
        FieldSpec {
            name: name.to_owned(),
            encoding: None,
            default: Some(default.to_owned()),
        }
    }

    fn parse(text: &str) -> Result<FieldSpec> {
        let (head, default) = match text.split_once('=') {
            Some((head, default)) => (head, Some(default.to_owned())),
            None => (text, None),
        };
        let (name, encoding) = match head.split_once(':') {
            Some((name, enc)) => (name, Some(enc.to_owned())),
            None => (head, None),
        };
        if !NAME_RE.is_match(name) {
            return Err(Error::InvalidFieldName {
                name: name.to_owned(),
            });
        }
        Ok(FieldSpec {
            name: name.to_owned(),
            encoding,
            default,
        })
    }

    fn emit(&self) -> String {
        let mut out = self.name.clone();
        if let Some(enc) = &self.encoding {
            out.push(':');
            out.push_str(enc);
        }
        if let Some(default) = &self.default {
            out.push('=');
            out.push_str(default);
        }
        out
    }
}

/// Everything the leading comment lines of a file establish: format,
/// metadata, epoch, tick scale, and the field vector (counter field first).
///
/// `start_epoch` and `timestamp_scale` are fixed for the life of the file.
/// Tick-to-seconds conversion ignores leap seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub format: Format,
    pub metadata: IndexMap<String, String>,
    pub start_epoch: f64,
    pub timestamp_scale: u32,
    pub fields: Vec<FieldSpec>,
}

impl Header {
    /// The declared fields after the counter field.
    pub fn data_fields(&self) -> &[FieldSpec] {
        &self.fields[1..]
    }

    /// Renders the complete header, trailing newline included.
    pub fn emit(&self) -> String {
        let mut out = self.format.magic_line();
        out.push('\n');
        out.push_str("#% start_epoch=");
        out.push_str(&format_epoch(self.start_epoch));
        if self.timestamp_scale != 1 {
            out.push_str(&format!("\ttimestamp_scale={}", self.timestamp_scale));
        }
        for (key, value) in &self.metadata {
            if key == "start_epoch" || key == "timestamp_scale" || key == "ts_scale" {
                continue;
            }
            out.push_str(&format!("\t{key}={value}"));
        }
        out.push('\n');
        out.push_str("#:");
        for (i, field) in self.fields.iter().enumerate() {
            out.push(if i == 0 { ' ' } else { '\t' });
            out.push_str(&field.emit());
        }
        out.push('\n');
        out
    }
}

fn format_epoch(epoch: f64) -> String {
    if epoch.fract() == 0.0 {
        (epoch as i64).to_string()
    } else {
        let text = format!("{epoch:.6}");
        text.trim_end_matches('0').trim_end_matches('.').to_owned()
    }
}

/// Incremental header assembly used while the reader consumes the leading
/// comment lines.
#[derive(Debug)]
pub(crate) struct HeaderBuilder {
    format: Format,
    metadata: IndexMap<String, String>,
    fields: Option<Vec<FieldSpec>>,
}

impl HeaderBuilder {
    /// Parses the `#!` magic line, selecting the format variant.
    pub(crate) fn from_magic(line: &str) -> Result<HeaderBuilder> {
        if !line.starts_with("#!") {
            return Err(Error::MissingMagic);
        }
        let token = MAGIC_RE
            .captures(line)
            .and_then(|c| c.get(1))
            .ok_or(Error::MissingMagic)?
            .as_str();
        let format = Format::from_token(token).ok_or_else(|| Error::UnknownFormat {
            found: token.to_owned(),
        })?;
        Ok(HeaderBuilder {
            format,
            metadata: IndexMap::new(),
            fields: None,
        })
    }

    /// Absorbs one `#%` metadata line; later keys override earlier ones.
    pub(crate) fn add_metadata(&mut self, line: &str) -> Result<()> {
        let body = line.strip_prefix("#%").unwrap_or(line).trim_start();
        for pair in body.split('\t') {
            if pair.is_empty() {
                continue;
            }
            let (key, value) = pair.split_once('=').ok_or_else(|| Error::MalformedHeader {
                line: line.to_owned(),
            })?;
            self.metadata.insert(key.to_owned(), value.to_owned());
        }
        Ok(())
    }

    /// Absorbs the single `#:` field declaration line.
    pub(crate) fn set_fields(&mut self, line: &str) -> Result<()> {
        if self.fields.is_some() {
            return Err(Error::MalformedHeader {
                line: line.to_owned(),
            });
        }
        let body = line.strip_prefix("#:").unwrap_or(line).trim_start();
        let mut fields = Vec::new();
        for spec in body.split('\t') {
            let field = FieldSpec::parse(spec)?;
            if fields.iter().any(|f: &FieldSpec| f.name == field.name) {
                return Err(Error::DuplicateField { name: field.name });
            }
            fields.push(field);
        }
        let expected = self.format.first_field();
        match fields.first() {
            Some(first) if first.name == expected => {}
            other => {
                return Err(Error::WrongFirstField {
                    expected: expected.to_owned(),
                    found: other.map(|f| f.name.clone()).unwrap_or_default(),
                })
            }
        }
        self.fields = Some(fields);
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<Header> {
        let fields = self.fields.ok_or_else(|| Error::MalformedHeader {
            line: "missing #: field declaration".to_owned(),
        })?;
        let start_epoch = self
            .metadata
            .get("start_epoch")
            .ok_or(Error::MissingStartEpoch)?
            .parse::<f64>()
            .map_err(|_| Error::MissingStartEpoch)?;
        // `*N` on the counter field wins over the metadata key.
        let scale_enc = fields[0]
            .encoding
            .as_deref()
            .and_then(|enc| enc.strip_prefix('*'));
        let scale_meta = self
            .metadata
            .get("timestamp_scale")
            .or_else(|| self.metadata.get("ts_scale"))
            .map(String::as_str);
        let timestamp_scale = match scale_enc.or(scale_meta) {
            Some(text) => text.parse::<u32>().map_err(|_| Error::MalformedHeader {
                line: text.to_owned(),
            })?,
            None => 1,
        };
        if timestamp_scale == 0 {
            return Err(Error::MalformedHeader {
                line: "timestamp_scale=0".to_owned(),
            });
        }
        Ok(Header {
            format: self.format,
            metadata: self.metadata,
            start_epoch,
            timestamp_scale,
            fields,
        })
    }
}
