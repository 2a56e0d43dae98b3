//! # vna_scan
//!
//! Positional sweep scans: a position actuator steps through a list of
//! positions and a SCPI vector network analyser records one complex
//! frequency response at each of them.
//!
//! ## Crates
//!
//! - `scan-core`: data model, error taxonomy and capability traits
//! - `scan-driver-vna`: instrument session, TCP transport and simulator
//! - `scan-driver-mock`: simulated actuator
//! - `scan-storage`: CSV archive and in-memory sinks
//! - `scan-experiment`: the scan controller
//!
//! This crate adds configuration loading ([`config`]), logging setup
//! ([`logging`]) and the glue that runs a scan from settings ([`runner`]).

pub mod config;
pub mod logging;
pub mod runner;

pub use config::ScanSettings;
pub use runner::{identify, reset, run_scan, Identification};
