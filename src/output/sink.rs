use crate::error::SnapshotError;
use crate::indexer::types::BalanceSnapshot;

/// Append-only destination for snapshot rows.
///
/// The pipeline hands over all rows of one block in a single `write_rows` call and never
/// calls it from two tasks at once.
pub trait SnapshotSink: Send {
    fn write_rows(&mut self, rows: &[BalanceSnapshot]) -> Result<(), SnapshotError>;

    fn flush(&mut self) -> Result<(), SnapshotError>;

    /// Human-readable description of where rows go.
    fn destination(&self) -> String;
}

/// Keeps every row in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<BalanceSnapshot>,
    pub flushes: usize,
}

impl SnapshotSink for MemorySink {
    fn write_rows(&mut self, rows: &[BalanceSnapshot]) -> Result<(), SnapshotError> {
        self.rows.extend_from_slice(rows);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SnapshotError> {
        self.flushes += 1;
        Ok(())
    }

    fn destination(&self) -> String {
        "memory".to_string()
    }
}
