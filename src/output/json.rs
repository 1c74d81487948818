//! JSON output writer.
//!
//! Writes are atomic: the document goes to a temporary file in the target
//! directory, is synced, then renamed over the destination.

use crate::aggregator::Row;
use crate::utils::config::ROW_INDENT;
use crate::utils::error::OutputError;
use log::{debug, info};
use serde::Serialize;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Write rows to a JSON file as an array of objects
///
/// **Public** - main entry point for run output
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path cannot be created or is invalid
pub fn write_rows(rows: &[Row], output_path: impl AsRef<Path>) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();

    info!("Writing {} rows to: {}", rows.len(), output_path.display());

    write_json_atomic(&rows, output_path, Some(ROW_INDENT))?;

    info!(
        "Rows written successfully ({} bytes)",
        calculate_file_size(output_path)
    );

    Ok(())
}

/// Serialize `value` to `output_path` atomically
///
/// With `indent` set, output is pretty printed with that many spaces per
/// level; otherwise it is compact.
pub fn write_json_atomic<T: Serialize + ?Sized>(
    value: &T,
    output_path: &Path,
    indent: Option<usize>,
) -> Result<(), OutputError> {
    validate_output_path(output_path)?;

    // Create parent directories if needed
    let parent = match output_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    if !parent.exists() {
        debug!("Creating parent directories: {}", parent.display());
        std::fs::create_dir_all(parent).map_err(|e| {
            OutputError::InvalidPath(format!(
                "Cannot create directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }

    let tmp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        match indent {
            Some(width) => {
                let spaces = vec![b' '; width];
                let mut ser =
                    Serializer::with_formatter(&mut writer, PrettyFormatter::with_indent(&spaces));
                value.serialize(&mut ser)?;
            }
            None => serde_json::to_writer(&mut writer, value)?,
        }
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;

    tmp.persist(output_path)
        .map_err(|e| OutputError::WriteFailed(e.error))?;

    Ok(())
}

/// Validate that output path is writable
///
/// **Private** - internal validation
fn validate_output_path(path: &Path) -> Result<(), OutputError> {
    if path.as_os_str().is_empty() {
        return Err(OutputError::InvalidPath("Path is empty".to_string()));
    }

    // Check if we're trying to overwrite a directory
    if path.is_dir() {
        return Err(OutputError::InvalidPath(format!(
            "Path is a directory: {}",
            path.display()
        )));
    }

    Ok(())
}

/// Calculate file size in bytes
///
/// **Private** - internal utility
fn calculate_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Read rows back from a JSON file
///
/// **Public** - useful for validation and testing
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (reusing WriteFailed for I/O)
/// * `OutputError::SerializationFailed` - JSON parse error, or not an array of objects
pub fn read_rows(input_path: impl AsRef<Path>) -> Result<Vec<Row>, OutputError> {
    let input_path = input_path.as_ref();

    debug!("Reading rows from: {}", input_path.display());

    let file = File::open(input_path).map_err(OutputError::WriteFailed)?;

    let rows: Vec<Row> = serde_json::from_reader(BufReader::new(file))
        .map_err(OutputError::SerializationFailed)?;

    debug!("Loaded {} rows", rows.len());

    Ok(rows)
}
