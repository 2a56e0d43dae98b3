//! Capability traits for the scan collaborators.
//!
//! Each trait covers one concern so drivers, simulators and test doubles can
//! be swapped freely:
//!
//! - [`BusTransport`]: line-oriented instrument I/O (TCP socket, simulator)
//! - [`PositionActuator`]: absolute positioning (stepper stage, simulator)
//! - [`MeasurementSink`]: record persistence (CSV archive, memory)
//!
//! # Design
//!
//! All traits are async (`#[async_trait]`) and report failures as
//! [`ScanError`](crate::ScanError). Timeouts are NOT the transport's concern:
//! the instrument session bounds every read with its own timeout.

use crate::data::MeasurementRecord;
use crate::error::ScanResult;
use async_trait::async_trait;

/// Capability: raw instrument bus I/O.
///
/// # Contract
/// - `write` sends the bytes as given; the caller appends the terminator
/// - `read_line` resolves with one reply line (terminator may be included)
///   and may wait indefinitely; callers impose the timeout
/// - `clear` discards pending I/O on both directions (device clear)
/// - `close` releases the resource; further I/O is an error
#[async_trait]
pub trait BusTransport: Send {
    /// Send raw bytes to the instrument.
    async fn write(&mut self, data: &[u8]) -> ScanResult<()>;

    /// Read one reply line.
    async fn read_line(&mut self) -> ScanResult<String>;

    /// Clear the I/O buffers of the connection.
    async fn clear(&mut self) -> ScanResult<()>;

    /// Close the underlying resource.
    async fn close(&mut self) -> ScanResult<()>;

    /// Resource identifier for diagnostics.
    fn resource(&self) -> &str;
}

/// Capability: absolute positioning.
///
/// # Contract
/// - Positions are in device-native units
/// - `set_absolute_target` starts motion and returns without waiting
/// - `is_moving` reports whether the last motion is still in progress
/// - `position` may be approximate while moving
#[async_trait]
pub trait PositionActuator: Send + Sync {
    /// Start a move to an absolute position.
    async fn set_absolute_target(&self, position: f64) -> ScanResult<()>;

    /// Whether the device is still moving.
    async fn is_moving(&self) -> ScanResult<bool>;

    /// Current position.
    async fn position(&self) -> ScanResult<f64>;

    /// Release the device. Default does nothing.
    async fn close(&self) -> ScanResult<()> {
        Ok(())
    }
}

/// Capability: record persistence.
#[async_trait]
pub trait MeasurementSink: Send {
    /// Persist one record. Ownership moves into the sink.
    async fn save(&mut self, record: MeasurementRecord) -> ScanResult<()>;
}
