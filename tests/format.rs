//! Encode/decode round-trip properties exercised through real files.

use hydralog::{FieldSpec, Format, Reader, ReaderOptions, Writer, WriterOptions};

fn scratch() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("log");
    (dir, path)
}

fn open(path: &std::path::Path) -> Reader {
    Reader::open(path, ReaderOptions::default()).unwrap()
}

#[test]
fn round_trip_preserves_fields_and_levels() -> Result<(), hydralog::Error> {
    let (_dir, path) = scratch();
    let mut w = Writer::create(
        &path,
        WriterOptions {
            fields: vec![
                FieldSpec::with_default("level", "I"),
                FieldSpec::new("facility"),
                FieldSpec::new("message"),
            ],
            ..WriterOptions::default()
        },
    )?;
    w.record_at_ticks(
        0,
        &[
            ("level", "WARNING"),
            ("facility", "cron"),
            ("message", "job started"),
        ],
    )?;
    w.record_at_ticks(5, &[("level", "INFO"), ("message", "job done")])?;
    drop(w);

    let mut r = open(&path);
    let a = r.next()?.unwrap();
    assert_eq!(a.level(), Some("WARNING"));
    assert_eq!(a.facility(), Some("cron"));
    assert_eq!(a.message(), Some("job started"));
    let b = r.next()?.unwrap();
    // INFO was suppressed to the default on disk and came back whole.
    assert_eq!(b.level(), Some("INFO"));
    assert!(!b.has_field("facility"));
    assert_eq!(b.timestamp() - a.timestamp(), 5.0);
    assert!(r.next()?.is_none());
    Ok(())
}

#[test]
fn default_valued_fields_cost_no_bytes() -> Result<(), hydralog::Error> {
    let (_dir, path) = scratch();
    let mut w = Writer::create(
        &path,
        WriterOptions {
            fields: vec![
                FieldSpec::with_default("level", "I"),
                FieldSpec::with_default("facility", "daemon"),
                FieldSpec::new("message"),
            ],
            ..WriterOptions::default()
        },
    )?;
    w.record_at_ticks(0, &[("level", "INFO"), ("facility", "daemon"), ("message", "hi")])?;
    drop(w);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.ends_with("\n\t\t\thi\n"), "suppressed: {text:?}");
    let mut r = open(&path);
    let rec = r.next()?.unwrap();
    assert_eq!(rec.level(), Some("INFO"));
    assert_eq!(rec.facility(), Some("daemon"));
    Ok(())
}

#[test]
fn multiline_message_round_trips_bit_exact() -> Result<(), hydralog::Error> {
    let (_dir, path) = scratch();
    let message = "first line\nsecond line\n\nfourth after a blank";
    let mut w = Writer::create(&path, WriterOptions::default())?;
    w.info(message)?;
    w.error("next record")?;
    drop(w);

    let mut r = open(&path);
    assert_eq!(r.next()?.unwrap().message(), Some(message));
    assert_eq!(r.next()?.unwrap().message(), Some("next record"));
    Ok(())
}

#[test]
fn multiline_user_field_gets_its_column_indent() -> Result<(), hydralog::Error> {
    let (_dir, path) = scratch();
    let mut w = Writer::create(
        &path,
        WriterOptions {
            fields: vec![
                FieldSpec::with_default("level", "I"),
                FieldSpec::new("message"),
                FieldSpec::new("detail"),
            ],
            ..WriterOptions::default()
        },
    )?;
    w.record_at_ticks(0, &[("message", "head"), ("detail", "a\nb")])?;
    drop(w);

    let text = std::fs::read_to_string(&path).unwrap();
    // `detail` is the fourth column (index 3): three TABs of indent.
    assert!(text.contains("\n\t\t\tb\n"), "got {text:?}");
    let mut r = open(&path);
    let rec = r.next()?.unwrap();
    assert_eq!(rec.field("detail")?, "a\nb");
    assert_eq!(rec.message(), Some("head"));
    Ok(())
}

#[test]
fn tsv0_round_trip() -> Result<(), hydralog::Error> {
    let (_dir, path) = scratch();
    let mut w = Writer::create(
        &path,
        WriterOptions {
            format: Format::Tsv0,
            timestamp_scale: 16,
            ..WriterOptions::default()
        },
    )?;
    w.record_at_ticks(0, &[("level", "ERROR"), ("message", "boom")])?;
    w.record_at_ticks(255, &[("message", "later")])?;
    drop(w);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("#!hydralog-dump --format=tsv0\n"));
    assert!(text.contains("\nff\t"), "hex delta: {text:?}");
    assert!(text.contains("#: timestamp_step_hex\t"));

    let mut r = open(&path);
    let a = r.next()?.unwrap();
    assert_eq!(a.level(), Some("ERROR"));
    let b = r.next()?.unwrap();
    // The fractional epoch costs an ulp or two at 1e9 seconds.
    assert!((b.timestamp() - a.timestamp() - 255.0 / 16.0).abs() < 1e-5);
    Ok(())
}

#[test]
fn writer_output_is_monotonic_under_live_clock() -> Result<(), hydralog::Error> {
    let (_dir, path) = scratch();
    let mut w = Writer::create(
        &path,
        WriterOptions {
            timestamp_scale: 1024,
            ..WriterOptions::default()
        },
    )?;
    for i in 0..50 {
        w.info(&format!("tick {i}"))?;
    }
    drop(w);

    let mut r = open(&path);
    let mut prev = f64::NEG_INFINITY;
    let mut count = 0;
    while let Some(rec) = r.next()? {
        assert!(rec.timestamp() >= prev);
        prev = rec.timestamp();
        count += 1;
    }
    assert_eq!(count, 50);
    Ok(())
}

#[test]
fn encoding_attribute_survives_round_trip() -> Result<(), hydralog::Error> {
    let (_dir, path) = scratch();
    let mut fields = vec![FieldSpec::with_default("level", "I")];
    let mut message = FieldSpec::new("message");
    message.encoding = Some("UTF-8".to_owned());
    fields.push(message);
    let w = Writer::create(
        &path,
        WriterOptions {
            fields,
            ..WriterOptions::default()
        },
    )?;
    drop(w);

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("message:UTF-8"));
    let r = open(&path);
    assert_eq!(r.header().fields[2].encoding.as_deref(), Some("UTF-8"));
    Ok(())
}

#[test]
fn metadata_survives_template_rotation() -> Result<(), hydralog::Error> {
    let (_dir, path) = scratch();
    let mut metadata = indexmap::IndexMap::new();
    metadata.insert("host".to_owned(), "alpha".to_owned());
    let w = Writer::create(
        &path,
        WriterOptions {
            metadata,
            timestamp_scale: 8,
            ..WriterOptions::default()
        },
    )?;
    let rotated = path.with_extension("1");
    let w2 = Writer::create_from_template(&rotated, w.header())?;
    drop((w, w2));

    let r = open(&rotated);
    assert_eq!(r.header().metadata.get("host").map(String::as_str), Some("alpha"));
    assert_eq!(r.header().timestamp_scale, 8);
    Ok(())
}
