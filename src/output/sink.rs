//! Deduplicating record sink

use super::export::{ExportFormat, ExportResult};
use crate::extract::Record;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Destination for extracted records
pub trait RecordSink: Send {
    /// Returns true if an equal record was already accumulated
    fn is_duplicate(&self, record: &Record) -> bool;

    /// Stores a record
    ///
    /// The orchestrator asks [`RecordSink::is_duplicate`] first and only
    /// hands over records that passed. Returns false if the sink dropped
    /// the record anyway.
    fn accumulate(&mut self, record: Record) -> bool;

    /// Writes everything accumulated so far in each format
    ///
    /// Flushing twice writes the same files with the same content.
    fn flush(&mut self, formats: &[ExportFormat]) -> ExportResult<Vec<PathBuf>>;

    /// Number of records held
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Computes a record's fingerprint
///
/// SHA-256 over the field map serialized as JSON. The map is ordered by key,
/// so the fingerprint ignores the order rules were declared in, and it
/// ignores the source URL and timestamp.
pub fn fingerprint(record: &Record) -> String {
    let canonical = serde_json::to_string(&record.fields).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

/// File-backed sink that drops records with a fingerprint it has already seen
#[derive(Debug)]
pub struct DedupSink {
    directory: PathBuf,
    file_stem: String,
    deduplicate: bool,
    seen: HashSet<String>,
    records: Vec<Record>,
}

impl DedupSink {
    /// Creates a sink writing `<directory>/<file_stem>.<ext>`
    pub fn new(directory: impl Into<PathBuf>, file_stem: impl Into<String>, deduplicate: bool) -> Self {
        Self {
            directory: directory.into(),
            file_stem: file_stem.into(),
            deduplicate,
            seen: HashSet::new(),
            records: Vec::new(),
        }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn path_for(&self, format: ExportFormat) -> PathBuf {
        self.directory
            .join(format!("{}.{}", self.file_stem, format.extension()))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }
}

impl RecordSink for DedupSink {
    fn is_duplicate(&self, record: &Record) -> bool {
        self.deduplicate && self.seen.contains(&fingerprint(record))
    }

    fn accumulate(&mut self, record: Record) -> bool {
        if self.deduplicate && !self.seen.insert(fingerprint(&record)) {
            tracing::debug!(url = %record.url, "Dropped duplicate record");
            return false;
        }
        self.records.push(record);
        true
    }

    fn flush(&mut self, formats: &[ExportFormat]) -> ExportResult<Vec<PathBuf>> {
        fs::create_dir_all(&self.directory)?;

        let mut written = Vec::with_capacity(formats.len());
        for format in formats {
            let path = self.path_for(*format);
            format.write(&self.records, &path)?;
            tracing::info!(
                path = %path.display(),
                records = self.records.len(),
                "Exported records"
            );
            written.push(path);
        }
        Ok(written)
    }

    fn len(&self) -> usize {
        self.records.len()
    }
}
