//! Error types for vna-scan.
//!
//! `ScanError` is the single error type that crosses crate boundaries. The
//! variants map one-to-one onto the failure classes a scan can hit:
//!
//! - **`Connection`**: the bus resource could not be opened or closed.
//! - **`ProtocolTimeout`**: no reply within the session timeout, including the
//!   `*OPC?` completion barrier.
//! - **`Instrument`**: the instrument's error queue was non-empty after an
//!   operation. Carries every queued entry in arrival order.
//! - **`Decode`**: a reply could not be parsed (malformed `SDAT` payload, wrong
//!   point count, non-numeric status byte).
//! - **`Actuator`**: fault reported by the positioning device, propagated as is.
//! - **`MotionTimeout`**: the actuator kept reporting "moving" past the
//!   configured poll bound.
//! - **`Storage`**: a record could not be persisted.
//!
//! None of these are retried automatically. Every variant renders a message
//! that names the underlying instrument or protocol condition.

use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using [`ScanError`].
pub type ScanResult<T> = std::result::Result<T, ScanError>;

/// Primary error type for the scan workspace.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Opening or closing the bus resource failed.
    #[error("Connection error on '{resource}': {message}")]
    Connection {
        /// Resource identifier the session was opened with
        resource: String,
        /// Underlying transport message
        message: String,
    },

    /// No response arrived within the session timeout.
    ///
    /// Also raised when the `*OPC?` barrier is not satisfied in time. This is
    /// fatal to the current scan step.
    #[error("Timeout after {}ms waiting for response to '{command}'", timeout.as_millis())]
    ProtocolTimeout {
        /// Command whose reply never arrived
        command: String,
        /// Session timeout in effect
        timeout: Duration,
    },

    /// The instrument reported one or more errors in its error queue.
    #[error("Instrument error(s) occurred:\n{}", .0.join("\n"))]
    Instrument(Vec<String>),

    /// A reply could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Fault reported by the position actuator.
    #[error("Actuator fault: {0}")]
    Actuator(String),

    /// The actuator did not settle within the configured bound.
    #[error(
        "Actuator still moving towards {target} after {}ms",
        waited.as_millis()
    )]
    MotionTimeout {
        /// Target position that was requested
        target: f64,
        /// Time spent polling before giving up
        waited: Duration,
    },

    /// A measurement record could not be persisted.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Semantically invalid configuration or plan.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O failure on the bus or filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    /// Build a connection error for `resource`.
    pub fn connection(resource: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Entries carried by an [`ScanError::Instrument`] error.
    pub fn instrument_errors(&self) -> Option<&[String]> {
        match self {
            Self::Instrument(errors) => Some(errors),
            _ => None,
        }
    }

    /// True for the timeout classes (protocol and motion).
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::ProtocolTimeout { .. } | Self::MotionTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instrument_error_joins_entries_in_order() {
        let err = ScanError::Instrument(vec![
            "-113,\"Undefined header\"".to_string(),
            "-222,\"Data out of range\"".to_string(),
        ]);
        let message = err.to_string();
        let first = message.find("Undefined header").unwrap();
        let second = message.find("Data out of range").unwrap();
        assert!(first < second);
        assert_eq!(err.instrument_errors().map(<[String]>::len), Some(2));
    }

    #[test]
    fn timeout_message_names_command() {
        let err = ScanError::ProtocolTimeout {
            command: "*OPC?".to_string(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(
            err.to_string(),
            "Timeout after 1500ms waiting for response to '*OPC?'"
        );
        assert!(err.is_timeout());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err: ScanError = io.into();
        assert!(matches!(err, ScanError::Io(_)));
        assert!(!err.is_timeout());
    }
}
