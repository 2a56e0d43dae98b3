//! Instrument session
//!
//! [`InstrumentSession`] owns one instrument connection and layers the
//! measurement protocol on top of a raw [`BusTransport`]:
//!
//! - command framing (write terminator, trimmed replies, debug echo)
//! - the `*OPC?` completion barrier
//! - error-queue draining through the status byte
//! - the adaptive read timeout derived from the sweep duration
//! - decoding of the scattering payload
//!
//! # Lifecycle
//!
//! ```text
//! open() ──▶ set_sweep_window() ──▶ compute_adaptive_timeout() ──▶ trigger_sweep_and_fetch()*
//!                                                                         │
//! close() ◀───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every reply is bounded by the session timeout. Before a sweep window is
//! configured the timeout is the conservative value given at open; afterwards
//! it tracks the instrument's reported sweep duration plus a margin.

use crate::decode::{decode_sdat, parse_seconds, parse_status_byte};
use crate::scpi;
use num_complex::Complex64;
use scan_core::{BusTransport, ScanError, ScanResult, SweepConfiguration};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Timeout used until the sweep duration is known.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Parameters for opening a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Resource identifier, e.g. `TCPIP0::192.168.0.10::5025::SOCKET`
    pub resource: String,
    /// Appended to every command
    #[serde(default = "default_terminator")]
    pub write_terminator: String,
    /// Reply timeout before adaptive recomputation
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub initial_timeout: Duration,
    /// Echo all bus traffic at info level
    #[serde(default)]
    pub debug: bool,
}

fn default_terminator() -> String {
    "\n".to_string()
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

impl SessionConfig {
    /// Config with default terminator and timeout for `resource`.
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            write_terminator: default_terminator(),
            initial_timeout: DEFAULT_TIMEOUT,
            debug: false,
        }
    }

    /// Enable or disable the bus traffic echo.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Override the initial reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.initial_timeout = timeout;
        self
    }

    /// Override the write terminator.
    pub fn with_terminator(mut self, terminator: impl Into<String>) -> Self {
        self.write_terminator = terminator.into();
        self
    }
}

/// Synchronised command/response session with one instrument.
pub struct InstrumentSession {
    transport: Box<dyn BusTransport>,
    resource: String,
    write_terminator: String,
    timeout: Duration,
    debug: bool,
    identity: Option<String>,
    byte_order: Option<String>,
    sweep: Option<SweepConfiguration>,
    last_command: String,
    closed: bool,
}

impl InstrumentSession {
    /// Open a session over an already connected transport.
    ///
    /// Clears the instrument's I/O buffers and status, then queries the
    /// identification string (logged) and the byte order (kept as a hint).
    pub async fn open(transport: Box<dyn BusTransport>, config: SessionConfig) -> ScanResult<Self> {
        let mut session = Self {
            transport,
            resource: config.resource,
            write_terminator: config.write_terminator,
            timeout: config.initial_timeout,
            debug: config.debug,
            identity: None,
            byte_order: None,
            sweep: None,
            last_command: String::new(),
            closed: false,
        };

        session.clear_status().await?;
        let identity = session.identify().await?;
        info!(resource = %session.resource, idn = %identity, "Connected to instrument");

        let byte_order = session.query(scpi::BYTE_ORDER_QUERY).await?;
        debug!(resource = %session.resource, byte_order = %byte_order, "Instrument byte order");
        session.byte_order = Some(byte_order);

        Ok(session)
    }

    /// Send one command line. No implicit synchronisation.
    pub async fn write(&mut self, command: &str) -> ScanResult<()> {
        self.ensure_open()?;
        if self.debug {
            info!(resource = %self.resource, "> {}", command);
        } else {
            debug!(resource = %self.resource, "> {}", command);
        }

        let mut line = String::with_capacity(command.len() + self.write_terminator.len());
        line.push_str(command);
        line.push_str(&self.write_terminator);

        let limit = self.timeout;
        match timeout(limit, self.transport.write(line.as_bytes())).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(ScanError::ProtocolTimeout {
                    command: command.to_string(),
                    timeout: limit,
                })
            }
        }
        self.last_command = command.to_string();
        Ok(())
    }

    /// Read one reply line, trimmed of its terminator.
    pub async fn read(&mut self) -> ScanResult<String> {
        self.ensure_open()?;
        let limit = self.timeout;
        let outcome = timeout(limit, self.transport.read_line()).await;
        let line = match outcome {
            Ok(result) => result?,
            Err(_) => {
                // A late reply must not answer the next query.
                if let Err(e) = self.transport.clear().await {
                    warn!(resource = %self.resource, error = %e, "Device clear after timeout failed");
                }
                return Err(ScanError::ProtocolTimeout {
                    command: self.last_command.clone(),
                    timeout: limit,
                })
            }
        };

        let reply = line.trim_end().to_string();
        if self.debug {
            info!(resource = %self.resource, "< {}", reply);
        } else {
            debug!(resource = %self.resource, "< {}", reply);
        }
        Ok(reply)
    }

    /// Write a command and read its reply.
    pub async fn query(&mut self, command: &str) -> ScanResult<String> {
        self.write(command).await?;
        self.read().await
    }

    /// Block until every previously issued command has finished executing.
    ///
    /// Not retried: a timeout here is fatal to the current step.
    pub async fn check_completion(&mut self) -> ScanResult<()> {
        let reply = self.query(scpi::OPC_QUERY).await?;
        if reply.trim_start_matches('+') != "1" {
            warn!(resource = %self.resource, reply = %reply, "Unexpected *OPC? reply");
        }
        Ok(())
    }

    /// Clear the I/O buffers and status registers.
    pub async fn clear_status(&mut self) -> ScanResult<()> {
        self.ensure_open()?;
        self.transport.clear().await?;
        self.write(scpi::CLS).await?;
        self.check_completion().await
    }

    /// Query and cache the identification string.
    pub async fn identify(&mut self) -> ScanResult<String> {
        let identity = self.query(scpi::IDN).await?;
        self.identity = Some(identity.clone());
        Ok(identity)
    }

    /// Reset the instrument to its default state.
    pub async fn reset(&mut self) -> ScanResult<()> {
        self.write(scpi::RST).await?;
        self.sweep = None;
        self.check_completion().await
    }

    /// Drain the instrument error queue.
    ///
    /// Reads the status byte first; when the error bit is clear no further I/O
    /// happens and the result is empty. Otherwise `SYST:ERR?` is repeated until
    /// the "no error" sentinel shows up. Entries are returned verbatim in
    /// arrival order. A queue that never empties is cut off after
    /// [`scpi::MAX_ERROR_QUEUE_ENTRIES`] entries with an overflow marker.
    pub async fn drain_error_queue(&mut self) -> ScanResult<Vec<String>> {
        let reply = self.query(scpi::STB).await?;
        let status = parse_status_byte(&reply)?;
        if status & scpi::ERROR_QUEUE_BIT == 0 {
            return Ok(Vec::new());
        }

        let mut errors = Vec::new();
        loop {
            let response = self.query(scpi::SYST_ERR).await?;
            if response.to_lowercase().contains(scpi::NO_ERROR_SENTINEL) {
                break;
            }
            errors.push(response);
            if errors.len() > scpi::MAX_ERROR_QUEUE_ENTRIES {
                warn!(resource = %self.resource, "Error queue did not clear, giving up");
                errors.push(scpi::ERROR_QUEUE_OVERFLOW.to_string());
                break;
            }
        }
        Ok(errors)
    }

    /// Drain the error queue and fail if it held anything.
    pub async fn raise_if_errors(&mut self) -> ScanResult<()> {
        let errors = self.drain_error_queue().await?;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(ScanError::Instrument(errors))
        }
    }

    /// Configure the sweep window.
    ///
    /// Issues start, stop, bandwidth and point count in that order, then waits
    /// for completion and checks the error queue.
    pub async fn set_sweep_window(&mut self, config: &SweepConfiguration) -> ScanResult<()> {
        config.validate()?;
        self.write(&scpi::with_value(scpi::FREQ_START, config.start_hz))
            .await?;
        self.write(&scpi::with_value(scpi::FREQ_STOP, config.stop_hz))
            .await?;
        self.write(&scpi::with_value(scpi::BANDWIDTH, config.if_bandwidth_hz))
            .await?;
        self.write(&scpi::with_value(scpi::SWEEP_POINTS, config.points))
            .await?;
        self.check_completion().await?;
        self.raise_if_errors().await?;

        self.sweep = Some(*config);
        info!(
            resource = %self.resource,
            start_hz = config.start_hz,
            stop_hz = config.stop_hz,
            if_bw_hz = config.if_bandwidth_hz,
            points = config.points,
            "Sweep window configured"
        );
        Ok(())
    }

    /// Let the instrument pick the fastest sweep time for the window.
    pub async fn enable_auto_sweep_time(&mut self) -> ScanResult<()> {
        self.write(scpi::SWEEP_TIME_AUTO).await
    }

    /// Set the reply timeout to the sweep duration plus `margin`.
    ///
    /// Each trigger-and-wait blocks for a full sweep, so reads must outlast it.
    pub async fn compute_adaptive_timeout(&mut self, margin: Duration) -> ScanResult<Duration> {
        let reply = self.query(scpi::SWEEP_TIME_QUERY).await?;
        let seconds = parse_seconds(&reply)?;
        self.timeout = Duration::try_from_secs_f64(seconds)
            .ok()
            .and_then(|sweep| sweep.checked_add(margin))
            .ok_or_else(|| {
                ScanError::Decode(format!("sweep time {} s does not fit a timeout", seconds))
            })?;
        info!(
            resource = %self.resource,
            sweep_s = seconds,
            timeout_ms = self.timeout.as_millis() as u64,
            "Adaptive timeout set"
        );
        Ok(self.timeout)
    }

    /// Switch free-run mode (continuous sweep and display refresh).
    ///
    /// Both switches are always attempted; the first failure is returned.
    pub async fn set_free_run(&mut self, enabled: bool) -> ScanResult<()> {
        let continuous = self
            .write(&scpi::switch(scpi::CONTINUOUS_ALL, enabled))
            .await;
        let display = self
            .write(&scpi::switch(scpi::DISPLAY_UPDATE, enabled))
            .await;
        continuous.and(display)
    }

    /// Trigger one sweep, wait for it and fetch the complex response.
    ///
    /// # Errors
    /// - [`ScanError::ProtocolTimeout`] on barrier or read timeout
    /// - [`ScanError::Decode`] on a malformed payload or a length that does
    ///   not match the configured point count
    /// - [`ScanError::Instrument`] if the instrument queued errors
    pub async fn trigger_sweep_and_fetch(&mut self) -> ScanResult<Vec<Complex64>> {
        self.write(scpi::INIT_IMMEDIATE_WAIT).await?;
        self.check_completion().await?;

        let payload = self.query(scpi::FETCH_SDATA).await?;
        let samples = decode_sdat(&payload)?;

        if let Some(sweep) = &self.sweep {
            if samples.len() != sweep.points as usize {
                return Err(ScanError::Decode(format!(
                    "expected {} points, got {}",
                    sweep.points,
                    samples.len()
                )));
            }
        }

        self.raise_if_errors().await?;
        debug!(resource = %self.resource, points = samples.len(), "Fetched complex values");
        Ok(samples)
    }

    /// Clear status and close the resource.
    ///
    /// Calling this on a closed session only logs.
    pub async fn close(&mut self) -> ScanResult<()> {
        if self.closed {
            warn!(resource = %self.resource, "Session already closed");
            return Ok(());
        }

        info!(
            resource = %self.resource,
            idn = self.identity.as_deref().unwrap_or("unknown"),
            "Disconnecting from instrument"
        );
        if let Err(e) = self.clear_status().await {
            warn!(resource = %self.resource, error = %e, "Failed to clear status before close");
        }

        self.closed = true;
        self.transport
            .close()
            .await
            .map_err(|e| ScanError::connection(&self.resource, e.to_string()))
    }

    /// Current reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Override the reply timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Toggle the bus traffic echo.
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Resource identifier.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Cached `*IDN?` reply.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Byte order reported at open (`SWAP` or `NORM`).
    pub fn byte_order(&self) -> Option<&str> {
        self.byte_order.as_deref()
    }

    /// Active sweep window, once configured.
    pub fn sweep(&self) -> Option<&SweepConfiguration> {
        self.sweep.as_ref()
    }

    /// Whether `close` has run.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn ensure_open(&self) -> ScanResult<()> {
        if self.closed {
            Err(ScanError::connection(&self.resource, "session is closed"))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for InstrumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentSession")
            .field("resource", &self.resource)
            .field("timeout", &self.timeout)
            .field("debug", &self.debug)
            .field("identity", &self.identity)
            .field("sweep", &self.sweep)
            .field("closed", &self.closed)
            .finish()
    }
}
