//! Scan runner: wires settings, drivers and the controller together.
//!
//! One call to [`run_scan`] owns the instrument session, the actuator and the
//! sink for the whole scan. The session and actuator are closed whatever the
//! scan outcome.

use crate::config::{ActuatorDriver, InstrumentDriver, InstrumentSettings, ScanSettings};
use scan_core::{BusTransport, PositionActuator, ScanError, ScanResult};
use scan_driver_mock::MockActuator;
use scan_driver_vna::{InstrumentSession, SimulatedVna, TcpTransport};
use scan_experiment::{ScanController, ScanSummary};
use scan_storage::CsvArchiveSink;
use tracing::{info, warn};

/// Connect the transport named by `settings` and open a session on it.
pub async fn open_session(settings: &InstrumentSettings) -> ScanResult<InstrumentSession> {
    let transport: Box<dyn BusTransport> = match settings.driver {
        InstrumentDriver::Tcp => Box::new(TcpTransport::connect(&settings.resource).await?),
        InstrumentDriver::Visa => open_visa(&settings.resource).await?,
        InstrumentDriver::Simulated => {
            info!(resource = %settings.resource, "Using simulated analyser");
            Box::new(SimulatedVna::with_resource(settings.resource.clone()))
        }
    };
    InstrumentSession::open(transport, settings.session_config()).await
}

#[cfg(feature = "instrument_visa")]
async fn open_visa(resource: &str) -> ScanResult<Box<dyn BusTransport>> {
    Ok(Box::new(scan_driver_vna::VisaTransport::open(resource).await?))
}

#[cfg(not(feature = "instrument_visa"))]
async fn open_visa(resource: &str) -> ScanResult<Box<dyn BusTransport>> {
    Err(ScanError::connection(
        resource,
        "VISA support not enabled. Rebuild with --features instrument_visa",
    ))
}

/// Build the configured actuator.
pub fn build_actuator(settings: &ScanSettings) -> Box<dyn PositionActuator> {
    match settings.actuator.driver {
        ActuatorDriver::Mock => Box::new(MockActuator::with_config(settings.actuator.mock_config())),
    }
}

/// Run one complete scan described by `settings`.
///
/// Settings are validated first. The instrument session is closed on every
/// exit path; a close failure after a scan failure is logged only.
pub async fn run_scan(settings: &ScanSettings) -> ScanResult<ScanSummary> {
    settings.validate()?;
    let plan = settings.scan.plan()?;
    let mut controller = ScanController::new(settings.scan.timing.clone())?;
    let mut sink = CsvArchiveSink::new(settings.storage.archive_config())?;
    let actuator = build_actuator(settings);

    let mut session = match open_session(&settings.instrument).await {
        Ok(session) => session,
        Err(e) => {
            if let Err(close_error) = actuator.close().await {
                warn!(error = %close_error, "Failed to close actuator");
            }
            return Err(e);
        }
    };
    let outcome = controller
        .run(&plan, &settings.sweep, &mut session, actuator.as_ref(), &mut sink)
        .await;

    let closed = session.close().await;
    if let Err(e) = actuator.close().await {
        warn!(error = %e, "Failed to close actuator");
    }

    match (outcome, closed) {
        (Ok(summary), Ok(())) => {
            info!(
                records = summary.records,
                directory = %sink.directory().display(),
                "Scan data written"
            );
            Ok(summary)
        }
        (Ok(_), Err(close_error)) => Err(close_error),
        (Err(scan_error), closed) => {
            if let Err(close_error) = closed {
                warn!(error = %close_error, "Failed to close instrument session");
            }
            Err(scan_error)
        }
    }
}

/// Instrument identity and pending errors reported by [`identify`].
#[derive(Debug, Clone, PartialEq)]
pub struct Identification {
    /// `*IDN?` reply
    pub identity: String,
    /// Byte order hint from `FORM:BORD?`
    pub byte_order: Option<String>,
    /// Entries drained from the error queue
    pub errors: Vec<String>,
}

/// Open the instrument, read its identity and error queue, close it.
pub async fn identify(settings: &InstrumentSettings) -> ScanResult<Identification> {
    let mut session = open_session(settings).await?;
    let result = async {
        let identity = session.identify().await?;
        let errors = session.drain_error_queue().await?;
        Ok::<_, ScanError>(Identification {
            identity,
            byte_order: session.byte_order().map(str::to_string),
            errors,
        })
    }
    .await;
    close_after(&mut session, result).await
}

/// Reset the instrument to its defaults and restore free-run mode.
pub async fn reset(settings: &InstrumentSettings) -> ScanResult<()> {
    let mut session = open_session(settings).await?;
    let result = async {
        session.reset().await?;
        session.set_free_run(true).await?;
        session.raise_if_errors().await
    }
    .await;
    close_after(&mut session, result).await
}

async fn close_after<T>(session: &mut InstrumentSession, result: ScanResult<T>) -> ScanResult<T> {
    match session.close().await {
        Ok(()) => result,
        Err(close_error) if result.is_ok() => Err(close_error),
        Err(close_error) => {
            warn!(error = %close_error, "Failed to close instrument session");
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn simulated() -> InstrumentSettings {
        InstrumentSettings {
            driver: InstrumentDriver::Simulated,
            resource: "SIM::ZNB8::INSTR".to_string(),
            write_terminator: "\n".to_string(),
            initial_timeout: Duration::from_millis(1500),
            debug: false,
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn simulated_driver_is_announced() {
        let session = open_session(&simulated()).await.unwrap();
        assert_eq!(session.resource(), "SIM::ZNB8::INSTR");
        assert!(logs_contain("Using simulated analyser"));
    }

    #[cfg(not(feature = "instrument_visa"))]
    #[tokio::test]
    async fn visa_driver_needs_the_feature() {
        let settings = InstrumentSettings {
            driver: InstrumentDriver::Visa,
            resource: "TCPIP::169.254.86.175::hislip0::INSTR".to_string(),
            ..simulated()
        };

        let err = open_session(&settings).await.unwrap_err();

        assert!(matches!(err, ScanError::Connection { .. }));
        assert!(err.to_string().contains("instrument_visa"));
    }

    #[tokio::test]
    async fn already_closed_session_passes_result_through() {
        let mut session = open_session(&simulated()).await.unwrap();
        session.close().await.unwrap();
        // a second close is a no-op, so the result passes through
        let failed: ScanResult<()> = Err(ScanError::Configuration("boom".into()));
        let err = close_after(&mut session, failed).await.unwrap_err();
        assert!(matches!(err, ScanError::Configuration(_)));
    }
}
