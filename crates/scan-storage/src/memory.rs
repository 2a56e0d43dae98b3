//! In-memory sink.

use async_trait::async_trait;
use scan_core::{MeasurementRecord, MeasurementSink, ScanError, ScanResult};

/// Sink that keeps every record in memory.
///
/// [`fail_after`](Self::fail_after) makes it reject saves once a number of
/// records has been stored, for exercising storage failures.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<MeasurementRecord>,
    fail_after: Option<usize>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject saves once `count` records are stored.
    pub fn fail_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Stored records in save order.
    pub fn records(&self) -> &[MeasurementRecord] {
        &self.records
    }

    /// Take the stored records.
    pub fn into_records(self) -> Vec<MeasurementRecord> {
        self.records
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when nothing was stored.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl MeasurementSink for MemorySink {
    async fn save(&mut self, record: MeasurementRecord) -> ScanResult<()> {
        if self.fail_after.is_some_and(|limit| self.records.len() >= limit) {
            return Err(ScanError::Storage(format!(
                "memory sink full after {} records",
                self.records.len()
            )));
        }
        self.records.push(record);
        Ok(())
    }
}
