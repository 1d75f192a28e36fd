//! Output module
//!
//! This module handles:
//! - Deduplicating and accumulating extracted records
//! - Exporting them as JSON and CSV
//! - Recording run statistics and printing the run summary

mod export;
mod sink;
pub mod stats;

pub use export::{ExportError, ExportFormat, ExportResult};
pub use sink::{fingerprint, DedupSink, RecordSink};
pub use stats::{print_statistics, RunStats, StatsSnapshot};
