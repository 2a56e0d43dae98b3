//! Scan orchestration for vna-scan.
//!
//! [`ScanController`] drives one positional sweep scan: it configures the
//! analyser once, then walks the [`ScanPlan`](scan_core::ScanPlan) moving the
//! actuator, waiting for it to settle and acquiring one record per position.
//! Free-run mode is restored on every exit path.

pub mod controller;

pub use controller::{MotionStatus, ScanConfig, ScanController, ScanState, ScanSummary};
