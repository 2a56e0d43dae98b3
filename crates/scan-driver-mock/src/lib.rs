//! Mock hardware for vna-scan.
//!
//! Simulated devices for running scans without a positioning stage attached.
//! Timing uses `tokio::time`, so tests can pause and advance the clock.
//!
//! - [`MockActuator`]: linear actuator with distance-based travel time,
//!   fault injection and a "never settles" mode

mod mock_actuator;

pub use mock_actuator::{MockActuator, MockActuatorConfig};
