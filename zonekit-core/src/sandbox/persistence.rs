//! Tabular persistence for baseline and delta rows.
//!
//! Files are CSV with a fixed header (the row struct's field order). A path
//! ending in `.gz` is transparently gzip-compressed. Writes create missing
//! parent directories and replace the file atomically via a temp file in
//! the same directory.
//!
//! These calls do blocking I/O and return errors to their caller; they are
//! not meant for the per-tick path.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::Instant;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::snapshot::{BaselineRow, DeltaRow};
use crate::error::{Result, ZoneError};

/// Column order of the baseline file.
pub const BASELINE_HEADER: &[&str] = &[
    "version",
    "snapshot_id",
    "player_key",
    "character_name",
    "platform_id",
    "zone_id",
    "captured_utc",
    "row_type",
    "component_type",
    "key",
    "existed",
    "payload",
    "payload_hash",
];

/// Column order of the delta file.
pub const DELTA_HEADER: &[&str] = &[
    "version",
    "snapshot_id",
    "player_key",
    "character_name",
    "platform_id",
    "zone_id",
    "captured_utc",
    "row_type",
    "operation",
    "key",
    "before",
    "after",
    "tech_guid",
    "tech_name",
    "entity_index",
    "entity_version",
    "prefab_guid",
    "prefab_name",
    "pos_x",
    "pos_y",
    "pos_z",
];

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

fn open_reader(path: &Path) -> Result<Box<dyn Read>> {
    let file = BufReader::new(File::open(path)?);
    if is_gzip(path) {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

fn read_rows<T: DeserializeOwned>(path: &Path, header: &[&str]) -> Result<Vec<T>> {
    let start = Instant::now();
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(open_reader(path)?);

    let found: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if found != header {
        return Err(ZoneError::MalformedRow {
            file: path.display().to_string(),
            line: 1,
            reason: format!("unexpected header: {}", found.join(",")),
        });
    }

    let mut rows = Vec::new();
    for record in reader.deserialize::<T>() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => {
                let line = e.position().map_or(0, csv::Position::line);
                return Err(ZoneError::MalformedRow {
                    file: path.display().to_string(),
                    line,
                    reason: e.to_string(),
                });
            }
        }
    }
    debug!(
        path = %path.display(),
        rows = rows.len(),
        elapsed_us = start.elapsed().as_micros(),
        "Read snapshot rows"
    );
    Ok(rows)
}

fn write_rows<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    let start = Instant::now();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = Path::new(&tmp_name);

    let file = BufWriter::new(File::create(tmp_path)?);
    if is_gzip(path) {
        let encoder = encode(GzEncoder::new(file, Compression::default()), header, rows)?;
        encoder.finish()?.flush()?;
    } else {
        encode(file, header, rows)?.flush()?;
    }
    fs::rename(tmp_path, path)?;

    debug!(
        path = %path.display(),
        rows = rows.len(),
        elapsed_us = start.elapsed().as_micros(),
        "Wrote snapshot rows"
    );
    Ok(())
}

/// Encode the header and `rows` into `sink`, handing the sink back.
fn encode<W: Write, T: Serialize>(sink: W, header: &[&str], rows: &[T]) -> Result<W> {
    // Header written explicitly so an empty row set still yields a
    // readable file.
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(sink);
    writer.write_record(header)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.into_inner().map_err(|e| ZoneError::Io(e.into_error()))
}

/// Read every baseline row from `path`.
///
/// # Errors
/// I/O failures (including a missing file) and malformed rows.
pub fn read_baseline(path: &Path) -> Result<Vec<BaselineRow>> {
    read_rows(path, BASELINE_HEADER)
}

/// Write `rows` to `path`, replacing any existing file.
///
/// # Errors
/// I/O and encoding failures.
pub fn write_baseline(path: &Path, rows: &[BaselineRow]) -> Result<()> {
    write_rows(path, BASELINE_HEADER, rows)
}

/// Read every delta row from `path`.
///
/// # Errors
/// I/O failures (including a missing file) and malformed rows.
pub fn read_delta(path: &Path) -> Result<Vec<DeltaRow>> {
    read_rows(path, DELTA_HEADER)
}

/// Write `rows` to `path`, replacing any existing file.
///
/// # Errors
/// I/O and encoding failures.
pub fn write_delta(path: &Path, rows: &[DeltaRow]) -> Result<()> {
    write_rows(path, DELTA_HEADER, rows)
}

/// Write `rows`, or delete the file when there are none.
///
/// # Errors
/// I/O and encoding failures.
pub(crate) fn write_or_remove<T: Serialize>(path: &Path, header: &[&str], rows: &[T]) -> Result<()> {
    if rows.is_empty() {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    } else {
        write_rows(path, header, rows)
    }
}
