//! CLI entry point for vna-scan
//!
//! # Usage
//!
//! Run a scan:
//! ```bash
//! vna-scan run --config config/scan.toml
//! vna-scan run --config config/scan.toml --simulate
//! ```
//!
//! Validate a configuration and print the plan:
//! ```bash
//! vna-scan check --config config/scan.toml
//! ```
//!
//! Talk to the analyser directly:
//! ```bash
//! vna-scan identify --resource TCPIP0::192.168.0.10::5025::SOCKET
//! vna-scan reset --resource 192.168.0.10
//! vna-scan identify --driver visa --resource TCPIP::169.254.86.175::hislip0::INSTR
//! ```

// Global allocator (Microsoft Rust Guidelines: M-MIMALLOC-APPS)
#[cfg(not(test))]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{info, warn, Level};
use vna_scan::config::{InstrumentDriver, InstrumentSettings, ScanSettings};
use vna_scan::logging::{self, LogFormat, LoggingConfig};
use vna_scan::runner;

#[derive(Parser)]
#[command(name = "vna-scan")]
#[command(about = "Positional sweep scans with a SCPI network analyser", long_about = None)]
struct Cli {
    /// Override the log format from the configuration
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a complete scan
    Run {
        /// Scan configuration file (TOML)
        #[arg(long)]
        config: PathBuf,

        /// Use the simulated analyser instead of the configured one
        #[arg(long)]
        simulate: bool,
    },

    /// Validate a configuration and print the plan
    Check {
        /// Scan configuration file (TOML)
        #[arg(long)]
        config: PathBuf,
    },

    /// Query identification and error queue
    Identify {
        /// Instrument resource, e.g. TCPIP0::192.168.0.10::5025::SOCKET
        #[arg(long)]
        resource: String,

        /// Transport driver
        #[arg(long, value_enum, default_value_t = InstrumentDriver::Tcp)]
        driver: InstrumentDriver,

        /// Echo bus traffic
        #[arg(long)]
        debug: bool,
    },

    /// Reset the instrument to defaults
    Reset {
        /// Instrument resource
        #[arg(long)]
        resource: String,

        /// Transport driver
        #[arg(long, value_enum, default_value_t = InstrumentDriver::Tcp)]
        driver: InstrumentDriver,
    },
}

fn load_settings(path: &Path) -> Result<ScanSettings> {
    ScanSettings::load_from(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))
}

fn init_logging(config: LoggingConfig, format: Option<LogFormat>) -> Result<()> {
    let config = match format {
        Some(format) => config.with_format(format),
        None => config,
    };
    logging::init(&config).map_err(anyhow::Error::msg)
}

fn direct_settings(driver: InstrumentDriver, resource: String, debug: bool) -> InstrumentSettings {
    InstrumentSettings {
        driver,
        resource,
        write_terminator: "\n".to_string(),
        initial_timeout: scan_driver_vna::DEFAULT_TIMEOUT,
        debug,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, simulate } => {
            let mut settings = load_settings(&config)?;
            init_logging(
                LoggingConfig::from_settings(&settings).map_err(anyhow::Error::msg)?,
                cli.log_format,
            )?;
            if simulate {
                settings.instrument.driver = InstrumentDriver::Simulated;
            }

            info!(
                name = %settings.application.name,
                config = %config.display(),
                "Starting scan run"
            );
            let summary = runner::run_scan(&settings)
                .await
                .context("Scan failed")?;
            info!(
                records = summary.records,
                duration = ?summary.duration,
                state = %summary.state,
                "Scan complete"
            );
        }

        Commands::Check { config } => {
            let settings = load_settings(&config)?;
            init_logging(LoggingConfig::new(Level::WARN), cli.log_format)?;
            settings.validate().context("Invalid configuration")?;

            let plan = settings.scan.plan()?;
            let total = settings.scan.timing.total_acquisitions(&plan);
            println!("Configuration OK: {}", config.display());
            println!(
                "  instrument: {} ({:?})",
                settings.instrument.resource, settings.instrument.driver
            );
            println!(
                "  sweep:      {} Hz .. {} Hz, {} points, IF BW {} Hz",
                settings.sweep.start_hz,
                settings.sweep.stop_hz,
                settings.sweep.points,
                settings.sweep.if_bandwidth_hz
            );
            println!(
                "  plan:       {} positions ({} .. {}), {} acquisitions",
                plan.len(),
                plan.home(),
                plan.positions().last().copied().unwrap_or_default(),
                total
            );
            println!("  output:     {}", settings.storage.output_dir.display());
        }

        Commands::Identify {
            resource,
            driver,
            debug,
        } => {
            init_logging(LoggingConfig::default(), cli.log_format)?;
            let id = runner::identify(&direct_settings(driver, resource, debug))
                .await
                .context("Identification failed")?;
            println!("{}", id.identity);
            if let Some(order) = &id.byte_order {
                println!("byte order: {}", order);
            }
            for error in &id.errors {
                warn!(error = %error, "Instrument error queue entry");
            }
        }

        Commands::Reset { resource, driver } => {
            init_logging(LoggingConfig::default(), cli.log_format)?;
            runner::reset(&direct_settings(driver, resource, false))
                .await
                .context("Reset failed")?;
            println!("Instrument reset");
        }
    }

    Ok(())
}
