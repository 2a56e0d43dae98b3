//! `scan-core`
//!
//! Core types and traits shared by every vna-scan crate.
//!
//! The scan couples three collaborators, each expressed as a small async
//! capability trait so the orchestration code never depends on a concrete
//! driver:
//!
//! - [`BusTransport`]: raw line-oriented I/O to the measuring instrument
//! - [`PositionActuator`]: absolute positioning device
//! - [`MeasurementSink`]: persistence of one [`MeasurementRecord`] per call
//!
//! ## Key Types
//!
//! - [`SweepConfiguration`]: frequency window and point count of one sweep
//! - [`ScanPlan`]: ordered, non-empty list of actuator positions
//! - [`MeasurementRecord`]: one acquisition (position + complex response)
//! - [`ScanError`]: error taxonomy for the whole workspace

pub mod capabilities;
pub mod data;
pub mod error;

pub use capabilities::{BusTransport, MeasurementSink, PositionActuator};
pub use data::{MeasurementRecord, RecordKind, ScanPlan, SweepConfiguration, MAX_PLAN_POSITIONS};
pub use error::{ScanError, ScanResult};

pub use num_complex::Complex64;
