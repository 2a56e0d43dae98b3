//! ScanController - sequential move/settle/acquire/save loop
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  run()  ┌─────────────┐
//! │ Idle │────────▶│ Configuring │
//! └──────┘         └──────┬──────┘
//!                         ▼
//!        ┌──────▶ Moving ──▶ Settling ──▶ Acquiring ──▶ Saving ──┐
//!        │                                                        │
//!        └──────────────── next position ◀────────────────────────┤
//!                                                                 ▼
//!                                  Homing ──▶ Settling ──▶ Acquiring ──▶ Saving ──▶ Done
//!
//!  any state ──(error)──▶ Failed
//! ```
//!
//! The first position is acquired twice in a row (duplicate pair for a
//! noise-floor estimate) and revisited once after the plan (homing). Both are
//! configurable. Whatever happens, the analyser is put back into free-run
//! mode before `run` returns; a failure of that cleanup is logged and never
//! replaces the error that aborted the scan.
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut controller = ScanController::new(ScanConfig::default())?;
//! let summary = controller
//!     .run(&plan, &sweep, &mut session, &actuator, &mut sink)
//!     .await?;
//! println!("{} records in {:?}", summary.records, summary.duration);
//! ```

use chrono::Utc;
use scan_core::{
    MeasurementRecord, MeasurementSink, PositionActuator, RecordKind, ScanError, ScanPlan,
    ScanResult, SweepConfiguration,
};
use scan_driver_vna::InstrumentSession;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, error, info, warn};

/// Timing and policy knobs of a scan.
///
/// Built once and never mutated by the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Pause after the actuator reports stopped, for residual vibration
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
    /// Interval between "is moving" polls
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Upper bound on waiting for the actuator. `None` waits forever.
    #[serde(with = "humantime_serde")]
    pub motion_timeout: Option<Duration>,
    /// Acquire the first position twice
    pub duplicate_first_position: bool,
    /// Revisit the first position after the plan
    pub home_after_scan: bool,
    /// Added to the reported sweep time to form the reply timeout
    #[serde(with = "humantime_serde")]
    pub timeout_margin: Duration,
    /// Wait between configuring the analyser and the first move
    #[serde(with = "humantime_serde")]
    pub start_delay: Duration,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            poll_interval: Duration::from_millis(10),
            motion_timeout: None,
            duplicate_first_position: true,
            home_after_scan: true,
            timeout_margin: Duration::from_millis(1000),
            start_delay: Duration::ZERO,
        }
    }
}

impl ScanConfig {
    /// Reject settings the loop cannot run with.
    pub fn validate(&self) -> ScanResult<()> {
        if self.poll_interval.is_zero() {
            return Err(ScanError::Configuration(
                "poll_interval must be greater than zero".into(),
            ));
        }
        if self.motion_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ScanError::Configuration(
                "motion_timeout must be greater than zero when set".into(),
            ));
        }
        Ok(())
    }

    /// Acquisitions a successful run of `plan` produces.
    pub fn total_acquisitions(&self, plan: &ScanPlan) -> usize {
        plan.len()
            + usize::from(self.duplicate_first_position)
            + usize::from(self.home_after_scan)
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    /// Not started
    Idle,
    /// Sending the sweep window and acquisition mode
    Configuring,
    /// Actuator travelling to a planned position
    Moving,
    /// Waiting for the actuator to stop and for the settle delay
    Settling,
    /// Sweep triggered, waiting for data
    Acquiring,
    /// Handing the record to the sink
    Saving,
    /// Returning to the first position
    Homing,
    /// Finished successfully
    Done,
    /// Aborted by an error
    Failed,
}

impl std::fmt::Display for ScanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanState::Idle => write!(f, "idle"),
            ScanState::Configuring => write!(f, "configuring"),
            ScanState::Moving => write!(f, "moving"),
            ScanState::Settling => write!(f, "settling"),
            ScanState::Acquiring => write!(f, "acquiring"),
            ScanState::Saving => write!(f, "saving"),
            ScanState::Homing => write!(f, "homing"),
            ScanState::Done => write!(f, "done"),
            ScanState::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one motion poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionStatus {
    /// Actuator still reports moving, bound not reached
    StillMoving,
    /// Actuator reports stopped
    Settled,
    /// Actuator still moving after `motion_timeout`
    TimedOut,
}

/// Result of a completed scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSummary {
    /// Records handed to the sink
    pub records: u32,
    /// Wall time from configuration to cleanup
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    /// Final controller state
    pub state: ScanState,
}

/// Drives a positional sweep scan.
#[derive(Debug)]
pub struct ScanController {
    config: ScanConfig,
    state: ScanState,
    records_saved: u32,
}

/// Run-scoped acquisition context.
struct Acquisition {
    frequencies: Arc<[f64]>,
    total: usize,
}

impl ScanController {
    /// Create a controller.
    ///
    /// # Errors
    /// [`ScanError::Configuration`] if `config` does not validate.
    pub fn new(config: ScanConfig) -> ScanResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            state: ScanState::Idle,
            records_saved: 0,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Records persisted by the last (or current) run, including failed runs.
    pub fn records_saved(&self) -> u32 {
        self.records_saved
    }

    fn set_state(&mut self, state: ScanState) {
        debug!(from = %self.state, to = %state, "Scan state transition");
        self.state = state;
    }

    /// Execute one scan.
    ///
    /// Records already handed to `sink` stay persisted when the scan aborts.
    /// Free-run mode is restored exactly once on every exit path.
    ///
    /// # Errors
    /// The first error raised by the session, the actuator or the sink;
    /// [`ScanError::MotionTimeout`] when `motion_timeout` is exceeded.
    pub async fn run(
        &mut self,
        plan: &ScanPlan,
        sweep: &SweepConfiguration,
        session: &mut InstrumentSession,
        actuator: &dyn PositionActuator,
        sink: &mut dyn MeasurementSink,
    ) -> ScanResult<ScanSummary> {
        let started = Instant::now();
        self.records_saved = 0;

        info!(
            resource = %session.resource(),
            positions = plan.len(),
            points = sweep.points,
            "Starting scan"
        );

        let outcome = self.execute(plan, sweep, session, actuator, sink).await;

        // Cleanup: back to free-run whatever happened above
        if let Err(e) = session.set_free_run(true).await {
            warn!(error = %e, "Failed to restore free-run mode");
        }

        let duration = started.elapsed();
        match outcome {
            Ok(()) => {
                self.set_state(ScanState::Done);
                info!(
                    records = self.records_saved,
                    duration_ms = duration.as_millis() as u64,
                    exit_status = "success",
                    "Scan finished"
                );
                Ok(ScanSummary {
                    records: self.records_saved,
                    duration,
                    state: self.state,
                })
            }
            Err(e) => {
                let failed_in = self.state;
                self.set_state(ScanState::Failed);
                error!(
                    records = self.records_saved,
                    state = %failed_in,
                    exit_status = "fail",
                    error = %e,
                    "Scan aborted"
                );
                Err(e)
            }
        }
    }

    async fn execute(
        &mut self,
        plan: &ScanPlan,
        sweep: &SweepConfiguration,
        session: &mut InstrumentSession,
        actuator: &dyn PositionActuator,
        sink: &mut dyn MeasurementSink,
    ) -> ScanResult<()> {
        self.set_state(ScanState::Configuring);
        self.configure(session, sweep).await?;
        self.countdown().await;

        let acquisition = Acquisition {
            frequencies: Arc::from(sweep.frequencies()),
            total: self.config.total_acquisitions(plan),
        };

        for (index, &target) in plan.positions().iter().enumerate() {
            self.set_state(ScanState::Moving);
            self.move_and_settle(actuator, target).await?;
            self.acquire_and_save(&acquisition, session, actuator, sink, index, RecordKind::Scan)
                .await?;

            if index == 0 && self.config.duplicate_first_position {
                self.acquire_and_save(
                    &acquisition,
                    session,
                    actuator,
                    sink,
                    index,
                    RecordKind::Duplicate,
                )
                .await?;
            }
        }

        if self.config.home_after_scan {
            self.set_state(ScanState::Homing);
            info!(position = plan.home(), "Returning to first position");
            self.move_and_settle(actuator, plan.home()).await?;
            self.acquire_and_save(&acquisition, session, actuator, sink, 0, RecordKind::Home)
                .await?;
        }

        Ok(())
    }

    /// Sweep window, fastest sweep time, adaptive timeout, single-sweep mode.
    async fn configure(
        &self,
        session: &mut InstrumentSession,
        sweep: &SweepConfiguration,
    ) -> ScanResult<()> {
        session.set_sweep_window(sweep).await?;
        session.enable_auto_sweep_time().await?;
        session
            .compute_adaptive_timeout(self.config.timeout_margin)
            .await?;
        session.set_free_run(false).await?;
        session.check_completion().await?;
        session.raise_if_errors().await
    }

    async fn countdown(&self) {
        let mut remaining = self.config.start_delay;
        while !remaining.is_zero() {
            info!("Scan starts in {}s", remaining.as_secs_f64().ceil() as u64);
            let step = remaining.min(Duration::from_secs(1));
            sleep(step).await;
            remaining -= step;
        }
    }

    async fn move_and_settle(&mut self, actuator: &dyn PositionActuator, target: f64) -> ScanResult<()> {
        actuator.set_absolute_target(target).await?;
        self.set_state(ScanState::Settling);
        self.wait_for_motion(actuator, target).await?;
        sleep(self.config.settle_delay).await;
        Ok(())
    }

    /// Poll the actuator until it stops or `motion_timeout` runs out.
    pub async fn wait_for_motion(
        &self,
        actuator: &dyn PositionActuator,
        target: f64,
    ) -> ScanResult<()> {
        let started = Instant::now();
        loop {
            match self.poll_motion(actuator, started).await? {
                MotionStatus::Settled => return Ok(()),
                MotionStatus::StillMoving => sleep(self.config.poll_interval).await,
                MotionStatus::TimedOut => {
                    return Err(ScanError::MotionTimeout {
                        target,
                        waited: started.elapsed(),
                    })
                }
            }
        }
    }

    /// One poll of the actuator's moving flag against the bound.
    pub async fn poll_motion(
        &self,
        actuator: &dyn PositionActuator,
        started: Instant,
    ) -> ScanResult<MotionStatus> {
        if !actuator.is_moving().await? {
            return Ok(MotionStatus::Settled);
        }
        match self.config.motion_timeout {
            Some(limit) if started.elapsed() >= limit => Ok(MotionStatus::TimedOut),
            _ => Ok(MotionStatus::StillMoving),
        }
    }

    async fn acquire_and_save(
        &mut self,
        acquisition: &Acquisition,
        session: &mut InstrumentSession,
        actuator: &dyn PositionActuator,
        sink: &mut dyn MeasurementSink,
        position_index: usize,
        kind: RecordKind,
    ) -> ScanResult<()> {
        self.set_state(ScanState::Acquiring);
        let position = actuator.position().await?;
        let response = session.trigger_sweep_and_fetch().await?;

        let sequence = self.records_saved + 1;
        let record = MeasurementRecord {
            sequence,
            position_index,
            position,
            kind,
            timestamp: Utc::now(),
            frequencies: acquisition.frequencies.clone(),
            response,
        };

        self.set_state(ScanState::Saving);
        sink.save(record).await?;
        self.records_saved = sequence;

        info!(
            acquisition = sequence,
            total = acquisition.total,
            position,
            kind = %kind,
            "acquisition {}/{}",
            sequence,
            acquisition.total
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scan_driver_mock::MockActuator;
    use scan_driver_vna::{SessionConfig, SimulatedVna};
    use scan_storage::MemorySink;
    use tracing_test::traced_test;

    fn fast_config() -> ScanConfig {
        ScanConfig {
            settle_delay: Duration::from_millis(1),
            poll_interval: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_keep_source_timing() {
        let config = ScanConfig::default();
        assert_eq!(config.settle_delay, Duration::from_millis(500));
        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.motion_timeout, None);
        assert!(config.duplicate_first_position);
        assert!(config.home_after_scan);
    }

    #[test]
    fn config_parses_humantime_values() {
        let config: ScanConfig = toml::from_str(
            r#"
            settle_delay = "250ms"
            motion_timeout = "30s"
            duplicate_first_position = false
            "#,
        )
        .unwrap();
        assert_eq!(config.settle_delay, Duration::from_millis(250));
        assert_eq!(config.motion_timeout, Some(Duration::from_secs(30)));
        assert!(!config.duplicate_first_position);
        assert_eq!(config.poll_interval, Duration::from_millis(10));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let config = ScanConfig {
            poll_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            ScanController::new(config),
            Err(ScanError::Configuration(_))
        ));
    }

    #[test]
    fn total_counts_duplicate_and_home() {
        let plan = ScanPlan::new(vec![0.0, 1.0, 2.0]).unwrap();
        assert_eq!(ScanConfig::default().total_acquisitions(&plan), 5);
        let bare = ScanConfig {
            duplicate_first_position: false,
            home_after_scan: false,
            ..Default::default()
        };
        assert_eq!(bare.total_acquisitions(&plan), 3);
    }

    #[tokio::test]
    async fn poll_reports_settled_when_stopped() {
        let controller = ScanController::new(fast_config()).unwrap();
        let actuator = MockActuator::instant();
        actuator.set_absolute_target(4.0).await.unwrap();

        let status = controller
            .poll_motion(&actuator, Instant::now())
            .await
            .unwrap();
        assert_eq!(status, MotionStatus::Settled);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_reports_timed_out_past_the_bound() {
        let controller = ScanController::new(ScanConfig {
            motion_timeout: Some(Duration::from_millis(100)),
            ..fast_config()
        })
        .unwrap();
        let actuator = MockActuator::instant();
        actuator.set_stuck(true);
        let started = Instant::now();

        assert_eq!(
            controller.poll_motion(&actuator, started).await.unwrap(),
            MotionStatus::StillMoving
        );
        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(
            controller.poll_motion(&actuator, started).await.unwrap(),
            MotionStatus::TimedOut
        );
    }

    #[tokio::test]
    #[traced_test]
    async fn logs_progress_per_acquisition() {
        let vna = SimulatedVna::new().with_sweep_time(0.01);
        let mut session = InstrumentSession::open(Box::new(vna), SessionConfig::new("SIM"))
            .await
            .unwrap();
        let plan = ScanPlan::new(vec![0.0, 1.0]).unwrap();
        let sweep = SweepConfiguration::new(1.0e9, 2.0e9, 1.0e3, 5).unwrap();
        let actuator = MockActuator::instant();
        let mut sink = MemorySink::new();

        let mut controller = ScanController::new(fast_config()).unwrap();
        controller
            .run(&plan, &sweep, &mut session, &actuator, &mut sink)
            .await
            .unwrap();

        assert!(logs_contain("acquisition 1/4"));
        assert!(logs_contain("acquisition 4/4"));
        assert!(logs_contain("Scan finished"));
    }
}
