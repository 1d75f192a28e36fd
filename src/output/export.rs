//! JSON and CSV writers for accumulated records

use crate::extract::Record;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur while writing export files
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON export failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),
}

/// Result type for export operations
pub type ExportResult<T> = Result<T, ExportError>;

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }

    /// Writes `records` to `path` in this format, replacing any existing file
    pub fn write(&self, records: &[Record], path: &Path) -> ExportResult<()> {
        match self {
            ExportFormat::Json => write_json(records, path),
            ExportFormat::Csv => write_csv(records, path),
        }
    }
}

/// Writes a pretty-printed JSON array
fn write_json(records: &[Record], path: &Path) -> ExportResult<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Writes one row per record
///
/// The header is `url`, `scraped_at`, then the union of every record's
/// field names in sorted order. Missing fields and `null` are empty cells;
/// lists and objects are written as JSON.
fn write_csv(records: &[Record], path: &Path) -> ExportResult<()> {
    let columns: BTreeSet<&str> = records
        .iter()
        .flat_map(|record| record.fields.keys().map(String::as_str))
        .collect();

    let mut writer = csv::Writer::from_path(path)?;

    let mut header = vec!["url", "scraped_at"];
    header.extend(columns.iter().copied());
    writer.write_record(&header)?;

    for record in records {
        let mut row = vec![record.url.clone(), record.scraped_at.to_rfc3339()];
        row.extend(
            columns
                .iter()
                .map(|column| record.fields.get(*column).map(cell).unwrap_or_default()),
        );
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(items) if items.is_empty() => String::new(),
        other => other.to_string(),
    }
}
