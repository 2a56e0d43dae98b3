//! Scan configuration using Figment
//!
//! Settings are loaded from:
//! 1. a TOML file (base configuration)
//! 2. environment variables prefixed with `VNA_SCAN_`, nested keys separated
//!    by a double underscore
//!
//! # Example
//! ```no_run
//! use vna_scan::config::ScanSettings;
//!
//! let settings = ScanSettings::load_from("config/scan.toml")?;
//! settings.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! `VNA_SCAN_INSTRUMENT__RESOURCE=TCPIP0::10.0.0.2::5025::SOCKET` overrides
//! `instrument.resource`.

use crate::logging::LogFormat;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use scan_core::{ScanError, ScanPlan, ScanResult, SweepConfiguration};
use scan_driver_mock::MockActuatorConfig;
use scan_driver_vna::{SessionConfig, DEFAULT_TIMEOUT};
use scan_experiment::ScanConfig;
use scan_storage::CsvArchiveConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "VNA_SCAN_";

/// Top-level scan configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSettings {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationSettings,
    /// Analyser connection
    pub instrument: InstrumentSettings,
    /// Sweep window
    pub sweep: SweepConfiguration,
    /// Positions and timing
    pub scan: ScanSection,
    /// Position actuator
    #[serde(default)]
    pub actuator: ActuatorSettings,
    /// Record archive
    #[serde(default)]
    pub storage: StorageSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationSettings {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// How the analyser is reached.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentDriver {
    /// Raw SCPI socket
    #[default]
    Tcp,
    /// System VISA library (HiSLIP, VXI-11); needs the `instrument_visa` feature
    Visa,
    /// In-process simulator
    Simulated,
}

/// Analyser connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentSettings {
    /// Transport driver
    #[serde(default)]
    pub driver: InstrumentDriver,
    /// Resource identifier
    pub resource: String,
    /// Appended to every command
    #[serde(default = "default_terminator")]
    pub write_terminator: String,
    /// Reply timeout until the sweep time is known
    #[serde(default = "default_initial_timeout", with = "humantime_serde")]
    pub initial_timeout: Duration,
    /// Echo bus traffic at info level
    #[serde(default)]
    pub debug: bool,
}

impl InstrumentSettings {
    /// Session parameters for these settings.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig::new(self.resource.clone())
            .with_terminator(self.write_terminator.clone())
            .with_timeout(self.initial_timeout)
            .with_debug(self.debug)
    }
}

/// Scan positions and controller timing
///
/// Positions are either listed explicitly or given as an inclusive
/// `start`/`stop`/`step` range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSection {
    /// Explicit positions in visiting order
    #[serde(default)]
    pub positions: Option<Vec<f64>>,
    /// First position of a range
    #[serde(default)]
    pub start: Option<f64>,
    /// Last position of a range (inclusive)
    #[serde(default)]
    pub stop: Option<f64>,
    /// Range increment
    #[serde(default)]
    pub step: Option<f64>,
    /// Controller timing and policy
    #[serde(flatten)]
    pub timing: ScanConfig,
}

impl ScanSection {
    /// Build the position plan.
    pub fn plan(&self) -> ScanResult<ScanPlan> {
        match (&self.positions, self.start, self.stop, self.step) {
            (Some(positions), None, None, None) => ScanPlan::new(positions.clone()),
            (None, Some(start), Some(stop), Some(step)) => ScanPlan::linear(start, stop, step),
            (Some(_), _, _, _) => Err(ScanError::Configuration(
                "scan.positions cannot be combined with start/stop/step".into(),
            )),
            _ => Err(ScanError::Configuration(
                "scan needs either positions or start, stop and step".into(),
            )),
        }
    }
}

/// Which actuator drives the positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorDriver {
    /// Simulated stage
    #[default]
    Mock,
}

/// Position actuator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorSettings {
    /// Actuator driver
    #[serde(default)]
    pub driver: ActuatorDriver,
    /// Initial position in device units
    #[serde(default)]
    pub initial_position: f64,
    /// Travel speed in units/sec
    #[serde(default = "default_speed")]
    pub speed: f64,
}

impl Default for ActuatorSettings {
    fn default() -> Self {
        Self {
            driver: ActuatorDriver::default(),
            initial_position: 0.0,
            speed: default_speed(),
        }
    }
}

impl ActuatorSettings {
    /// Mock actuator parameters for these settings.
    pub fn mock_config(&self) -> MockActuatorConfig {
        MockActuatorConfig {
            initial_position: self.initial_position,
            speed_units_per_sec: self.speed,
        }
    }
}

/// Record archive settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Output directory for record files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// File name prefix
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            prefix: default_prefix(),
        }
    }
}

impl StorageSettings {
    /// CSV archive parameters for these settings.
    pub fn archive_config(&self) -> CsvArchiveConfig {
        CsvArchiveConfig {
            directory: self.output_dir.clone(),
            prefix: self.prefix.clone(),
        }
    }
}

// Default value functions
fn default_name() -> String {
    "vna-scan".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_terminator() -> String {
    "\n".to_string()
}

fn default_initial_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_speed() -> f64 {
    MockActuatorConfig::default().speed_units_per_sec
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_prefix() -> String {
    CsvArchiveConfig::default().prefix
}

impl ScanSettings {
    /// Load settings from a TOML file and `VNA_SCAN_` environment variables.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    /// Provider chain used by [`load_from`](Self::load_from).
    pub fn figment<P: AsRef<Path>>(path: P) -> Figment {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate settings after loading
    pub fn validate(&self) -> ScanResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(ScanError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.instrument.resource.trim().is_empty() {
            return Err(ScanError::Configuration(
                "instrument.resource must not be empty".into(),
            ));
        }
        if self.instrument.initial_timeout.is_zero() {
            return Err(ScanError::Configuration(
                "instrument.initial_timeout must be greater than zero".into(),
            ));
        }

        self.sweep.validate()?;
        self.scan.plan()?;
        self.scan.timing.validate()?;

        if !self.actuator.speed.is_finite() {
            return Err(ScanError::Configuration(format!(
                "actuator.speed must be finite, got {}",
                self.actuator.speed
            )));
        }

        if self.storage.prefix.is_empty() {
            return Err(ScanError::Configuration(
                "storage.prefix must not be empty".into(),
            ));
        }

        Ok(())
    }
}
