//! CSV archive: one file per acquisition.
//!
//! Each file starts with `#`-prefixed metadata lines followed by a CSV table:
//!
//! ```text
//! # position: 12
//! # position_index: 12
//! # kind: scan
//! # sequence: 14
//! # timestamp: 2026-03-02T14:03:11.204+00:00
//! frequency_hz,real,imag
//! 2300000000,0.41,-0.12
//! ...
//! ```

use async_trait::async_trait;
use scan_core::{MeasurementRecord, MeasurementSink, ScanError, ScanResult};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Where and how records are archived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvArchiveConfig {
    /// Output directory, created on first use
    pub directory: PathBuf,
    /// File name prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "vna_scan".to_string()
}

impl Default for CsvArchiveConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
            prefix: default_prefix(),
        }
    }
}

/// Sink writing every record to its own CSV file.
///
/// File names are `{prefix}_{YYYYmmdd_HHMMSS}_p{index}_a{sequence}.csv`, so
/// the duplicate acquisition at the first position never overwrites the
/// regular one.
#[derive(Debug)]
pub struct CsvArchiveSink {
    config: CsvArchiveConfig,
    written: Vec<PathBuf>,
}

impl CsvArchiveSink {
    /// Create the sink, creating the output directory if needed.
    pub fn new(config: CsvArchiveConfig) -> ScanResult<Self> {
        if !config.directory.exists() {
            std::fs::create_dir_all(&config.directory).map_err(|e| {
                ScanError::Storage(format!(
                    "Failed to create output directory '{}': {}",
                    config.directory.display(),
                    e
                ))
            })?;
        }
        tracing::info!(
            directory = %config.directory.display(),
            "CSV archive will write to '{}'",
            config.directory.display()
        );
        Ok(Self {
            config,
            written: Vec::new(),
        })
    }

    /// Output directory.
    pub fn directory(&self) -> &Path {
        &self.config.directory
    }

    /// Files written so far, in order.
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// File name for `record`.
    pub fn file_name(&self, record: &MeasurementRecord) -> String {
        format!(
            "{}_{}_p{:04}_a{:04}.csv",
            self.config.prefix,
            record.timestamp.format("%Y%m%d_%H%M%S"),
            record.position_index,
            record.sequence
        )
    }

    /// Write `record` to `path` through a temporary sibling file.
    ///
    /// The final name only appears once the whole table is on disk; a failed
    /// write leaves nothing behind.
    fn write_record(path: &Path, record: &MeasurementRecord) -> ScanResult<()> {
        let staging = path.with_extension("csv.tmp");
        let written = File::create(&staging)
            .map_err(|e| ScanError::Storage(format!("Failed to create CSV file: {}", e)))
            .and_then(|file| write_table(BufWriter::new(file), record))
            .and_then(|()| {
                std::fs::rename(&staging, path).map_err(|e| {
                    ScanError::Storage(format!(
                        "Failed to move CSV file into '{}': {}",
                        path.display(),
                        e
                    ))
                })
            });
        if written.is_err() && staging.exists() {
            if let Err(e) = std::fs::remove_file(&staging) {
                tracing::warn!(path = %staging.display(), error = %e, "Failed to remove partial CSV file");
            }
        }
        written
    }
}

/// Metadata lines followed by the `frequency_hz,real,imag` table.
fn write_table<W: Write>(mut out: W, record: &MeasurementRecord) -> ScanResult<()> {
    if record.frequencies.len() != record.response.len() {
        return Err(ScanError::Storage(format!(
            "record {} has {} frequencies but {} samples",
            record.sequence,
            record.frequencies.len(),
            record.response.len()
        )));
    }

    let header = format!(
        "# position: {}\n# position_index: {}\n# kind: {}\n# sequence: {}\n# timestamp: {}\n",
        record.position,
        record.position_index,
        record.kind,
        record.sequence,
        record.timestamp.to_rfc3339()
    );
    out.write_all(header.as_bytes())
        .map_err(|e| ScanError::Storage(e.to_string()))?;

    let mut writer = csv::Writer::from_writer(out);
    writer
        .write_record(["frequency_hz", "real", "imag"])
        .map_err(|e| ScanError::Storage(e.to_string()))?;
    for (f, z) in record.frequencies.iter().zip(&record.response) {
        writer
            .write_record(&[f.to_string(), z.re.to_string(), z.im.to_string()])
            .map_err(|e| ScanError::Storage(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| ScanError::Storage(e.to_string()))?
        .flush()
        .map_err(|e| ScanError::Storage(e.to_string()))
}

#[async_trait]
impl MeasurementSink for CsvArchiveSink {
    async fn save(&mut self, record: MeasurementRecord) -> ScanResult<()> {
        let path = self.config.directory.join(self.file_name(&record));
        let (position, kind) = (record.position, record.kind);

        // File I/O stays off the async worker threads.
        let target = path.clone();
        tokio::task::spawn_blocking(move || Self::write_record(&target, &record))
            .await
            .map_err(|e| ScanError::Storage(format!("CSV write task failed: {}", e)))??;

        tracing::debug!(
            path = %path.display(),
            position,
            kind = %kind,
            "Record archived"
        );
        self.written.push(path);
        Ok(())
    }
}
