//! Vector network analyser driver for vna-scan.
//!
//! - [`InstrumentSession`]: synchronised SCPI session (framing, completion
//!   barrier, error queue, adaptive timeout, payload decoding)
//! - [`TcpTransport`]: raw SCPI socket transport
//! - `VisaTransport`: VISA library transport (feature `instrument_visa`)
//! - [`SimulatedVna`]: in-process instrument model for tests and dry runs
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = TcpTransport::connect("TCPIP0::192.168.0.10::5025::SOCKET").await?;
//! let mut vna = InstrumentSession::open(Box::new(transport), SessionConfig::new(resource)).await?;
//!
//! vna.set_sweep_window(&sweep).await?;
//! vna.compute_adaptive_timeout(Duration::from_secs(1)).await?;
//! let s21 = vna.trigger_sweep_and_fetch().await?;
//! vna.close().await?;
//! ```

pub mod decode;
pub mod scpi;
pub mod session;
pub mod simulated;
pub mod tcp;
#[cfg(feature = "instrument_visa")]
pub mod visa;

pub use decode::decode_sdat;
pub use session::{InstrumentSession, SessionConfig, DEFAULT_TIMEOUT};
pub use simulated::{SimulatedVna, SimulatedVnaHandle};
pub use tcp::TcpTransport;
#[cfg(feature = "instrument_visa")]
pub use visa::VisaTransport;
