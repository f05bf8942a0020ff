//! Thin CLI over the library: decode one or more log files and print the
//! records to stdout, merged by timestamp when several files are given.

use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use hydralog::{LogRecord, MergeReader, Reader, ReaderOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Tsv,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "hydralog-dump", about = "Dump hydralog files as text or JSON")]
struct Args {
    /// Comma-separated field names to print (tsv output only prints these,
    /// json output keeps them in this order).
    #[arg(short = 'f', long = "fields", value_delimiter = ',')]
    fields: Vec<String>,

    /// Output format.
    #[arg(short = 'o', long = "output", value_enum, default_value = "tsv")]
    output: OutputFormat,

    /// Files to read; several files merge into one timestamp-ordered stream.
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("hydralog-dump: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut readers = Vec::with_capacity(args.files.len());
    for path in &args.files {
        readers.push(Reader::open(path, ReaderOptions::default())?);
    }
    let mut merge = MergeReader::new(readers);
    let stdout = io::stdout().lock();
    let mut out = BufWriter::new(stdout);
    while let Some(record) = merge.next()? {
        match args.output {
            OutputFormat::Tsv => write_tsv(&mut out, &record, &args.fields)?,
            OutputFormat::Json => write_json(&mut out, &record, &args.fields)?,
        }
    }
    out.flush()?;
    Ok(())
}

fn field_text(record: &LogRecord, name: &str) -> String {
    if name == "timestamp" {
        return format_timestamp(record.timestamp());
    }
    record.field(name).unwrap_or("").to_owned()
}

fn format_timestamp(ts: f64) -> String {
    if ts.fract() == 0.0 {
        (ts as i64).to_string()
    } else {
        ts.to_string()
    }
}

fn write_tsv(out: &mut impl Write, record: &LogRecord, fields: &[String]) -> io::Result<()> {
    if fields.is_empty() {
        return writeln!(out, "{record}");
    }
    let cols: Vec<String> = fields.iter().map(|f| field_text(record, f)).collect();
    writeln!(out, "{}", cols.join("\t"))
}

fn write_json(out: &mut impl Write, record: &LogRecord, fields: &[String]) -> io::Result<()> {
    if fields.is_empty() {
        let line = serde_json::to_string(record).map_err(io::Error::other)?;
        return writeln!(out, "{line}");
    }
    let mut object = serde_json::Map::new();
    for name in fields {
        if name == "timestamp" {
            object.insert(name.clone(), record.timestamp().into());
        } else if let Ok(value) = record.field(name) {
            object.insert(name.clone(), value.into());
        }
    }
    writeln!(out, "{}", serde_json::Value::Object(object))
}
