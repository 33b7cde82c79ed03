use std::fs::File;
use std::io::Write;
use std::path::Path;

use super::sink::SnapshotSink;
use crate::error::SnapshotError;
use crate::indexer::types::BalanceSnapshot;

pub const HEADER: [&str; 3] = ["Block", "Address", "Balance"];

/// Writes rows as `Block,Address,Balance` CSV.
pub struct CsvSink<W: Write> {
    writer: csv::Writer<W>,
    destination: String,
}

impl CsvSink<File> {
    /// Create (or truncate) `path` and write the header row.
    pub fn create(path: &Path) -> Result<Self, SnapshotError> {
        let writer = csv::Writer::from_path(path).map_err(|e| {
            SnapshotError::Sink(format!("Failed to create '{}': {}", path.display(), e))
        })?;
        Self::with_writer(writer, path.display().to_string())
    }
}

impl<W: Write> CsvSink<W> {
    pub fn from_writer(inner: W, destination: impl Into<String>) -> Result<Self, SnapshotError> {
        Self::with_writer(csv::Writer::from_writer(inner), destination.into())
    }

    fn with_writer(mut writer: csv::Writer<W>, destination: String) -> Result<Self, SnapshotError> {
        writer.write_record(HEADER)?;
        writer.flush()?;
        Ok(Self {
            writer,
            destination,
        })
    }

    pub fn into_inner(self) -> Result<W, SnapshotError> {
        self.writer
            .into_inner()
            .map_err(|e| SnapshotError::Sink(e.to_string()))
    }
}

impl<W: Write + Send> SnapshotSink for CsvSink<W> {
    fn write_rows(&mut self, rows: &[BalanceSnapshot]) -> Result<(), SnapshotError> {
        for row in rows {
            self.writer.write_record([
                row.block_number.to_string(),
                row.address.to_string(),
                row.display_value(),
            ])?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SnapshotError> {
        self.writer.flush()?;
        Ok(())
    }

    fn destination(&self) -> String {
        self.destination.clone()
    }
}
