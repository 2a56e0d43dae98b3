//! Simulated network analyser for testing without hardware.
//!
//! [`SimulatedVna`] is a [`BusTransport`] that answers the scan's SCPI
//! vocabulary from an in-process instrument model: sweep settings, a real
//! error queue with the status byte bit, free-run flags and deterministic
//! sweep data. A cloneable [`SimulatedVnaHandle`] stays with the caller after
//! the transport moves into a session, for inspecting the command log and
//! injecting faults.
//!
//! Queries without a pending reply never resolve, so a missing answer shows
//! up as a session timeout exactly like a silent instrument.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{BusTransport, ScanError, ScanResult};
use std::collections::VecDeque;
use std::f64::consts::PI;
use std::sync::Arc;

/// Identification string reported by the simulator
pub const SIMULATED_IDN: &str = "Rohde-Schwarz,ZNB8-4Port,1311601044100000,3.12 (simulated)";

const NO_ERROR: &str = "0,\"No error\"";
const UNDEFINED_HEADER: &str = "-113,\"Undefined header\"";
const ILLEGAL_PARAMETER: &str = "-224,\"Illegal parameter value\"";
const DATA_OUT_OF_RANGE: &str = "-222,\"Data out of range\"";

#[derive(Debug)]
struct SimState {
    resource: String,
    start_hz: f64,
    stop_hz: f64,
    if_bandwidth_hz: f64,
    points: u32,
    sweep_time_override: Option<f64>,
    continuous: bool,
    display_update: bool,
    error_queue: VecDeque<String>,
    replies: VecDeque<String>,
    commands: Vec<String>,
    sweeps: u32,
    fetches: u32,
    device_clears: u32,
    closed: bool,
    faults: Faults,
}

#[derive(Debug, Default)]
struct Faults {
    fail_fetch_at: Option<u32>,
    stuck_error: Option<String>,
    rejected: Vec<String>,
    silenced: Vec<String>,
    payload_points: Option<usize>,
    raw_payload: Option<String>,
}

impl SimState {
    fn new(resource: String) -> Self {
        Self {
            resource,
            start_hz: 100.0e3,
            stop_hz: 8.5e9,
            if_bandwidth_hz: 10.0e3,
            points: 201,
            sweep_time_override: None,
            continuous: true,
            display_update: true,
            error_queue: VecDeque::new(),
            replies: VecDeque::new(),
            commands: Vec::new(),
            sweeps: 0,
            fetches: 0,
            device_clears: 0,
            closed: false,
            faults: Faults::default(),
        }
    }

    fn reset(&mut self) {
        self.start_hz = 100.0e3;
        self.stop_hz = 8.5e9;
        self.if_bandwidth_hz = 10.0e3;
        self.points = 201;
        self.continuous = true;
        self.display_update = true;
    }

    fn sweep_time(&self) -> f64 {
        self.sweep_time_override
            .unwrap_or(f64::from(self.points) / self.if_bandwidth_hz)
    }

    fn status_byte(&self) -> u16 {
        if self.error_queue.is_empty() && self.faults.stuck_error.is_none() {
            0
        } else {
            4
        }
    }

    fn reply(&mut self, header: &str, response: String) {
        if self.faults.silenced.iter().any(|s| header.contains(s.as_str())) {
            tracing::debug!("Simulated VNA withholding reply to {}", header);
            return;
        }
        self.replies.push_back(response);
    }

    fn parse_arg<T: std::str::FromStr>(&mut self, arg: Option<&str>) -> Option<T> {
        let parsed = arg.and_then(|a| a.trim().parse::<T>().ok());
        if parsed.is_none() {
            self.error_queue.push_back(ILLEGAL_PARAMETER.to_string());
        }
        parsed
    }

    fn parse_switch(&mut self, arg: Option<&str>) -> Option<bool> {
        match arg.map(|a| a.trim().to_ascii_uppercase()).as_deref() {
            Some("ON") | Some("1") => Some(true),
            Some("OFF") | Some("0") => Some(false),
            _ => {
                self.error_queue.push_back(ILLEGAL_PARAMETER.to_string());
                None
            }
        }
    }

    /// Execute one program message unit.
    fn execute(&mut self, unit: &str) {
        let unit = unit.trim();
        if unit.is_empty() {
            return;
        }
        let (header, arg) = match unit.split_once(char::is_whitespace) {
            Some((h, a)) => (h.to_ascii_uppercase(), Some(a)),
            None => (unit.to_ascii_uppercase(), None),
        };

        match header.as_str() {
            "*IDN?" => self.reply(&header, SIMULATED_IDN.to_string()),
            "*CLS" => self.error_queue.clear(),
            "*OPC?" => self.reply(&header, "1".to_string()),
            "*WAI" => {}
            "*RST" => self.reset(),
            "*STB?" => {
                let stb = self.status_byte();
                self.reply(&header, stb.to_string());
            }
            "SYST:ERR?" => {
                let response = match &self.faults.stuck_error {
                    Some(stuck) => stuck.clone(),
                    None => self
                        .error_queue
                        .pop_front()
                        .unwrap_or_else(|| NO_ERROR.to_string()),
                };
                self.reply(&header, response);
            }
            "FORM:BORD?" => self.reply(&header, "SWAP".to_string()),
            "SENS1:FREQ:STAR" => {
                if let Some(v) = self.parse_arg::<f64>(arg) {
                    self.start_hz = v;
                }
            }
            "SENS1:FREQ:STOP" => {
                if let Some(v) = self.parse_arg::<f64>(arg) {
                    self.stop_hz = v;
                }
            }
            "SENS1:BWID" => {
                if let Some(v) = self.parse_arg::<f64>(arg) {
                    self.if_bandwidth_hz = v;
                }
            }
            "SENS1:SWE:POIN" => {
                if let Some(v) = self.parse_arg::<u32>(arg) {
                    self.points = v;
                }
            }
            "SENS1:SWE:TIME:AUTO" => {}
            "SENS1:SWE:TIME?" => {
                let seconds = self.sweep_time();
                self.reply(&header, format!("{:e}", seconds));
            }
            "INIT1:IMM" => self.sweeps += 1,
            "INIT:CONT:ALL" => {
                if let Some(on) = self.parse_switch(arg) {
                    self.continuous = on;
                }
            }
            "SYST:DISP:UPD" => {
                if let Some(on) = self.parse_switch(arg) {
                    self.display_update = on;
                }
            }
            "CALC:DATA?" => {
                self.fetches += 1;
                if self.faults.fail_fetch_at == Some(self.fetches) {
                    self.error_queue.push_back(DATA_OUT_OF_RANGE.to_string());
                }
                let payload = match &self.faults.raw_payload {
                    Some(raw) => raw.clone(),
                    None => self.sweep_payload(),
                };
                self.reply(&header, payload);
            }
            _ => {
                tracing::warn!("Simulated VNA received unknown command: {}", unit);
                self.error_queue.push_back(UNDEFINED_HEADER.to_string());
            }
        }
    }

    /// Deterministic transmission-like response: a decaying, rotating phasor.
    fn sweep_payload(&self) -> String {
        let n = self
            .faults
            .payload_points
            .unwrap_or(self.points as usize);
        let mut values = Vec::with_capacity(n * 2);
        for i in 0..n {
            let x = i as f64 / n.max(1) as f64;
            let magnitude = 0.5 + 0.4 * (2.0 * PI * x).cos() * (-x).exp();
            let phase = -6.0 * PI * x + 0.1 * f64::from(self.sweeps);
            values.push(format!("{:.9e}", magnitude * phase.cos()));
            values.push(format!("{:.9e}", magnitude * phase.sin()));
        }
        values.join(",")
    }
}

/// In-process network analyser model.
pub struct SimulatedVna {
    resource: String,
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedVna {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedVna {
    /// Create a simulator with instrument defaults.
    pub fn new() -> Self {
        Self::with_resource("SIM::VNA::INSTR")
    }

    /// Create a simulator that reports `resource` in diagnostics.
    pub fn with_resource(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self {
            state: Arc::new(Mutex::new(SimState::new(resource.clone()))),
            resource,
        }
    }

    /// Fix the reported sweep duration instead of deriving it from the window.
    pub fn with_sweep_time(self, seconds: f64) -> Self {
        self.state.lock().sweep_time_override = Some(seconds);
        self
    }

    /// Handle for inspection and fault injection.
    pub fn handle(&self) -> SimulatedVnaHandle {
        SimulatedVnaHandle {
            state: self.state.clone(),
        }
    }
}

#[async_trait]
impl BusTransport for SimulatedVna {
    async fn write(&mut self, data: &[u8]) -> ScanResult<()> {
        let text = String::from_utf8_lossy(data);
        let line = text.trim_end_matches(|c| c == '\r' || c == '\n').to_string();

        let mut state = self.state.lock();
        if state.closed {
            return Err(ScanError::connection(&state.resource, "simulated resource is closed"));
        }
        state.commands.push(line.clone());

        if state.faults.rejected.iter().any(|r| line.contains(r.as_str())) {
            return Err(ScanError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                format!("simulated write failure for '{}'", line),
            )));
        }

        for unit in line.split(';') {
            state.execute(unit);
        }
        Ok(())
    }

    async fn read_line(&mut self) -> ScanResult<String> {
        let reply = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ScanError::connection(&state.resource, "simulated resource is closed"));
            }
            state.replies.pop_front()
        };
        match reply {
            Some(reply) => Ok(format!("{}\n", reply)),
            None => std::future::pending().await,
        }
    }

    async fn clear(&mut self) -> ScanResult<()> {
        let mut state = self.state.lock();
        state.replies.clear();
        state.device_clears += 1;
        Ok(())
    }

    async fn close(&mut self) -> ScanResult<()> {
        self.state.lock().closed = true;
        Ok(())
    }

    fn resource(&self) -> &str {
        &self.resource
    }
}

/// Shared view of a [`SimulatedVna`].
#[derive(Clone)]
pub struct SimulatedVnaHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedVnaHandle {
    /// Every command line received, in order.
    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    /// Number of received lines equal to `command`.
    pub fn count(&self, command: &str) -> usize {
        self.state
            .lock()
            .commands
            .iter()
            .filter(|c| c.as_str() == command)
            .count()
    }

    /// Queue an instrument error as if a command had failed.
    pub fn inject_error(&self, message: impl Into<String>) {
        self.state.lock().error_queue.push_back(message.into());
    }

    /// Queue a "data out of range" error with the `n`-th fetch (1-based).
    pub fn fail_fetch_at(&self, n: u32) {
        self.state.lock().faults.fail_fetch_at = Some(n);
    }

    /// Make `SYST:ERR?` answer `message` forever.
    pub fn stick_error_queue(&self, message: impl Into<String>) {
        self.state.lock().faults.stuck_error = Some(message.into());
    }

    /// Fail writes of any line containing `pattern`.
    pub fn reject_writes(&self, pattern: impl Into<String>) {
        self.state.lock().faults.rejected.push(pattern.into());
    }

    /// Never answer queries whose header contains `pattern`.
    pub fn silence(&self, pattern: impl Into<String>) {
        self.state.lock().faults.silenced.push(pattern.into());
    }

    /// Return `points` samples from fetches regardless of configuration.
    pub fn set_payload_points(&self, points: usize) {
        self.state.lock().faults.payload_points = Some(points);
    }

    /// Return `payload` verbatim from fetches.
    pub fn set_raw_payload(&self, payload: impl Into<String>) {
        self.state.lock().faults.raw_payload = Some(payload.into());
    }

    /// Configured point count.
    pub fn points(&self) -> u32 {
        self.state.lock().points
    }

    /// Configured (start, stop, bandwidth).
    pub fn window(&self) -> (f64, f64, f64) {
        let state = self.state.lock();
        (state.start_hz, state.stop_hz, state.if_bandwidth_hz)
    }

    /// Whether continuous sweep is on.
    pub fn continuous(&self) -> bool {
        self.state.lock().continuous
    }

    /// Whether the display refreshes.
    pub fn display_update(&self) -> bool {
        self.state.lock().display_update
    }

    /// Sweeps triggered so far.
    pub fn sweeps(&self) -> u32 {
        self.state.lock().sweeps
    }

    /// Device clears received.
    pub fn device_clears(&self) -> u32 {
        self.state.lock().device_clears
    }

    /// Entries currently in the error queue.
    pub fn pending_errors(&self) -> usize {
        self.state.lock().error_queue.len()
    }

    /// Whether the transport was closed.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
