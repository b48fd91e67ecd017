//! Read-back of the emotion log for reporting and export.

use crate::types::LogRecord;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Rows shown by default in a report.
pub const DEFAULT_REPORT_ROWS: usize = 20;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("no emotion log at {0}")]
    NotFound(PathBuf),
    #[error("log io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed log row: {0}")]
    Csv(#[from] csv::Error),
}

/// The most recent rows of the log plus the total row count.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub total_rows: usize,
    pub recent: Vec<LogRecord>,
}

/// Read every data row of the log, in file order.
pub fn read_records(path: &Path) -> Result<Vec<LogRecord>, ReportError> {
    if !path.exists() {
        return Err(ReportError::NotFound(path.to_path_buf()));
    }
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<Result<Vec<LogRecord>, _>>()?;
    Ok(records)
}

/// Load the log and keep its last `limit` rows (oldest first).
pub fn load_report(path: &Path, limit: usize) -> Result<Report, ReportError> {
    let mut records = read_records(path)?;
    let total_rows = records.len();
    let recent = records.split_off(total_rows.saturating_sub(limit));
    Ok(Report { total_rows, recent })
}

/// Copy the log file byte-for-byte into `out`. Returns the number of bytes.
pub fn export(path: &Path, out: &mut impl Write) -> Result<u64, ReportError> {
    if !path.exists() {
        return Err(ReportError::NotFound(path.to_path_buf()));
    }
    let mut file = std::fs::File::open(path)?;
    let copied = std::io::copy(&mut file, out)?;
    out.flush()?;
    Ok(copied)
}
