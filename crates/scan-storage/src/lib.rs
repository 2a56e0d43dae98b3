//! Record persistence for vna-scan.
//!
//! Sinks implement [`MeasurementSink`](scan_core::MeasurementSink) and take
//! ownership of one record per call:
//!
//! - [`CsvArchiveSink`]: one CSV file per acquisition in an output directory
//! - [`MemorySink`]: keeps records in memory (tests, dry runs)

mod csv_archive;
mod memory;

pub use csv_archive::{CsvArchiveConfig, CsvArchiveSink};
pub use memory::MemorySink;
