//! Append-only emotion log.
//!
//! [`EmotionLog`] is the single seam the logger writes through. The CSV
//! implementation is the persisted history; the in-memory one backs tests.

use crate::types::LogRecord;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Column names, in on-disk order.
pub const LOG_HEADER: [&str; 3] = ["timestamp", "source", "emotion"];

#[derive(Error, Debug)]
pub enum LogError {
    #[error("log io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv: {0}")]
    Csv(#[from] csv::Error),
}

/// Sink for emotion records. Implementations only ever add rows.
pub trait EmotionLog: Send + Sync {
    fn append(&self, record: &LogRecord) -> Result<(), LogError>;
}

impl<L: EmotionLog + ?Sized> EmotionLog for Arc<L> {
    fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        (**self).append(record)
    }
}

/// CSV file log with a fixed `timestamp,source,emotion` header.
///
/// Each row is encoded on its own and then written to the append-mode file
/// in one `write_all` under a mutex. Rows from concurrent callers never
/// interleave, and a failed append leaves nothing buffered behind.
pub struct CsvEmotionLog<W = File> {
    path: PathBuf,
    sink: Mutex<W>,
}

impl CsvEmotionLog {
    /// Open the log for appending, creating it with a header row if absent.
    ///
    /// An existing file is never rewritten, even if it is empty.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source: std::io::Error| LogError::Io {
            path: path.clone(),
            source,
        };

        if !path.exists() {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(io_err)?;
            }
            let mut header = csv::Writer::from_path(&path)?;
            header.write_record(LOG_HEADER)?;
            header.flush().map_err(io_err)?;
            tracing::info!(path = %path.display(), "created emotion log");
        }

        let file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(io_err)?;

        Ok(Self {
            path,
            sink: Mutex::new(file),
        })
    }
}

impl<W> CsvEmotionLog<W> {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Encode one record as a complete CSV line.
fn encode_row(record: &LogRecord) -> Result<Vec<u8>, LogError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(record)?;
    writer
        .into_inner()
        .map_err(|e| LogError::Csv(e.into_error().into()))
}

impl<W: Write + Send> EmotionLog for CsvEmotionLog<W> {
    fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        let row = encode_row(record)?;

        let mut sink = self.sink.lock();
        sink.write_all(&row)
            .and_then(|()| sink.flush())
            .map_err(|source| LogError::Io {
                path: self.path.clone(),
                source,
            })?;

        tracing::debug!(
            source = %record.source,
            emotion = %record.emotion,
            "appended emotion record"
        );
        Ok(())
    }
}

/// In-memory log, mainly for tests.
#[derive(Default)]
pub struct MemoryEmotionLog {
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryEmotionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EmotionLog for MemoryEmotionLog {
    fn append(&self, record: &LogRecord) -> Result<(), LogError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}
