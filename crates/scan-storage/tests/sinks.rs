//! Sink behaviour with realistic records.

use chrono::{TimeZone, Utc};
use num_complex::Complex64;
use scan_core::{MeasurementRecord, MeasurementSink, RecordKind, ScanError};
use scan_storage::{CsvArchiveConfig, CsvArchiveSink, MemorySink};
use std::sync::Arc;
use tempfile::tempdir;

fn record(sequence: u32, position_index: usize, kind: RecordKind) -> MeasurementRecord {
    MeasurementRecord {
        sequence,
        position_index,
        position: position_index as f64 * 2.0,
        kind,
        timestamp: Utc.with_ymd_and_hms(2026, 3, 2, 14, 3, 11).unwrap(),
        frequencies: Arc::from(vec![1.0e9, 1.5e9, 2.0e9]),
        response: vec![
            Complex64::new(0.5, -0.25),
            Complex64::new(0.125, 0.0),
            Complex64::new(-1.0, 2.0),
        ],
    }
}

#[tokio::test]
async fn csv_archive_writes_metadata_and_table() {
    let dir = tempdir().unwrap();
    let mut sink = CsvArchiveSink::new(CsvArchiveConfig {
        directory: dir.path().join("run"),
        prefix: "s21".to_string(),
    })
    .unwrap();

    sink.save(record(3, 1, RecordKind::Scan)).await.unwrap();

    let written = sink.written().to_vec();
    assert_eq!(written.len(), 1);
    assert_eq!(
        written[0].file_name().unwrap().to_str().unwrap(),
        "s21_20260302_140311_p0001_a0003.csv"
    );

    let contents = std::fs::read_to_string(&written[0]).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines[0], "# position: 2");
    assert_eq!(lines[2], "# kind: scan");
    assert_eq!(lines[3], "# sequence: 3");
    assert_eq!(lines[5], "frequency_hz,real,imag");
    assert_eq!(lines[6], "1000000000,0.5,-0.25");
    assert_eq!(lines[8], "2000000000,-1,2");
    assert_eq!(lines.len(), 9);
}

#[tokio::test]
async fn duplicate_pair_lands_in_distinct_files() {
    let dir = tempdir().unwrap();
    let mut sink = CsvArchiveSink::new(CsvArchiveConfig {
        directory: dir.path().to_path_buf(),
        prefix: "vna_scan".to_string(),
    })
    .unwrap();

    sink.save(record(1, 0, RecordKind::Scan)).await.unwrap();
    sink.save(record(2, 0, RecordKind::Duplicate)).await.unwrap();

    let files = std::fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(files, 2);
}

#[tokio::test]
async fn mismatched_record_is_rejected() {
    let dir = tempdir().unwrap();
    let mut sink = CsvArchiveSink::new(CsvArchiveConfig {
        directory: dir.path().to_path_buf(),
        prefix: "bad".to_string(),
    })
    .unwrap();

    let mut bad = record(1, 0, RecordKind::Scan);
    bad.response.pop();

    let err = sink.save(bad).await.unwrap_err();
    assert!(matches!(err, ScanError::Storage(_)));
    assert!(sink.written().is_empty());
    // neither a truncated table nor its staging file remains
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn memory_sink_keeps_order_and_can_fail() {
    let mut sink = MemorySink::new().fail_after(2);

    sink.save(record(1, 0, RecordKind::Scan)).await.unwrap();
    sink.save(record(2, 0, RecordKind::Duplicate)).await.unwrap();
    let err = sink.save(record(3, 1, RecordKind::Scan)).await.unwrap_err();

    assert!(matches!(err, ScanError::Storage(_)));
    let kinds: Vec<RecordKind> = sink.records().iter().map(|r| r.kind).collect();
    assert_eq!(kinds, vec![RecordKind::Scan, RecordKind::Duplicate]);
}
