//! Mock position actuator.

use async_trait::async_trait;
use parking_lot::Mutex;
use scan_core::{PositionActuator, ScanError, ScanResult};
use serde::Deserialize;
use tokio::time::{Duration, Instant};

/// Configuration for [`MockActuator`]
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MockActuatorConfig {
    /// Initial position in device units (default: 0.0)
    #[serde(default)]
    pub initial_position: f64,

    /// Travel speed in units/sec (default: 200.0). Zero or negative moves
    /// complete instantly.
    #[serde(default = "default_speed")]
    pub speed_units_per_sec: f64,
}

fn default_speed() -> f64 {
    200.0
}

impl Default for MockActuatorConfig {
    fn default() -> Self {
        Self {
            initial_position: 0.0,
            speed_units_per_sec: default_speed(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Motion {
    from: f64,
    to: f64,
    started: Instant,
    duration: Duration,
}

impl Motion {
    fn progress(&self, now: Instant) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        let elapsed = now.saturating_duration_since(self.started);
        (elapsed.as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }
}

#[derive(Debug, Default)]
struct ActuatorState {
    position: f64,
    motion: Option<Motion>,
    stuck: bool,
    fault_targets: Vec<f64>,
    moves: Vec<f64>,
    polls: usize,
    closed: bool,
}

/// Simulated absolute-positioning actuator.
///
/// A move takes `|distance| / speed` seconds. While it is in progress
/// `is_moving` reports true and `position` interpolates linearly between the
/// start and the target.
///
/// # Fault injection
///
/// - [`fail_on_target`](Self::fail_on_target): reject moves to a position
/// - [`set_stuck`](Self::set_stuck): report "moving" forever
///
/// # Example
///
/// ```rust,ignore
/// let actuator = MockActuator::new();
/// actuator.set_absolute_target(10.0).await?;
/// while actuator.is_moving().await? {
///     tokio::time::sleep(Duration::from_millis(10)).await;
/// }
/// assert_eq!(actuator.position().await?, 10.0);
/// ```
#[derive(Debug)]
pub struct MockActuator {
    speed_units_per_sec: f64,
    state: Mutex<ActuatorState>,
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl MockActuator {
    /// Actuator at position 0 with default speed.
    pub fn new() -> Self {
        Self::with_config(MockActuatorConfig::default())
    }

    /// Actuator with explicit configuration.
    pub fn with_config(config: MockActuatorConfig) -> Self {
        Self {
            speed_units_per_sec: config.speed_units_per_sec,
            state: Mutex::new(ActuatorState {
                position: config.initial_position,
                ..Default::default()
            }),
        }
    }

    /// Actuator whose moves complete immediately.
    pub fn instant() -> Self {
        Self::with_config(MockActuatorConfig {
            speed_units_per_sec: 0.0,
            ..Default::default()
        })
    }

    /// Report "moving" forever once set.
    pub fn set_stuck(&self, stuck: bool) {
        self.state.lock().stuck = stuck;
    }

    /// Reject every move to `target` with an actuator fault.
    pub fn fail_on_target(&self, target: f64) {
        self.state.lock().fault_targets.push(target);
    }

    /// Accepted move targets, in order.
    pub fn moves(&self) -> Vec<f64> {
        self.state.lock().moves.clone()
    }

    /// Number of `is_moving` polls served.
    pub fn polls(&self) -> usize {
        self.state.lock().polls
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn travel_time(&self, distance: f64) -> Duration {
        if self.speed_units_per_sec > 0.0 && self.speed_units_per_sec.is_finite() {
            Duration::from_secs_f64(distance.abs() / self.speed_units_per_sec)
        } else {
            Duration::ZERO
        }
    }
}

impl ActuatorState {
    fn ensure_open(&self) -> ScanResult<()> {
        if self.closed {
            Err(ScanError::Actuator("mock actuator is closed".into()))
        } else {
            Ok(())
        }
    }

    /// Advance the model to `now`, landing on the target when travel ends.
    fn update(&mut self, now: Instant) {
        if let Some(motion) = self.motion {
            let progress = motion.progress(now);
            self.position = motion.from + (motion.to - motion.from) * progress;
            if progress >= 1.0 {
                self.position = motion.to;
                self.motion = None;
            }
        }
    }
}

#[async_trait]
impl PositionActuator for MockActuator {
    async fn set_absolute_target(&self, position: f64) -> ScanResult<()> {
        let mut state = self.state.lock();
        state.ensure_open()?;

        if state.fault_targets.iter().any(|t| (t - position).abs() < 1e-9) {
            return Err(ScanError::Actuator(format!(
                "injected fault moving to {}",
                position
            )));
        }

        let now = Instant::now();
        state.update(now);
        let from = state.position;
        state.motion = Some(Motion {
            from,
            to: position,
            started: now,
            duration: self.travel_time(position - from),
        });
        state.moves.push(position);

        tracing::debug!(from, to = position, "Mock actuator moving");
        Ok(())
    }

    async fn is_moving(&self) -> ScanResult<bool> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.polls += 1;
        if state.stuck {
            return Ok(true);
        }
        state.update(Instant::now());
        Ok(state.motion.is_some())
    }

    async fn position(&self) -> ScanResult<f64> {
        let mut state = self.state.lock();
        state.ensure_open()?;
        state.update(Instant::now());
        Ok(state.position)
    }

    async fn close(&self) -> ScanResult<()> {
        let mut state = self.state.lock();
        if !state.closed {
            tracing::info!(position = state.position, "Mock actuator closed");
            state.closed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn move_takes_distance_over_speed() {
        let actuator = MockActuator::with_config(MockActuatorConfig {
            initial_position: 0.0,
            speed_units_per_sec: 100.0,
        });

        actuator.set_absolute_target(50.0).await.unwrap();
        assert!(actuator.is_moving().await.unwrap());

        tokio::time::advance(Duration::from_millis(250)).await;
        let midway = actuator.position().await.unwrap();
        assert!((midway - 25.0).abs() < 1e-6);
        assert!(actuator.is_moving().await.unwrap());

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(!actuator.is_moving().await.unwrap());
        assert_eq!(actuator.position().await.unwrap(), 50.0);
    }

    #[tokio::test]
    async fn instant_actuator_settles_immediately() {
        let actuator = MockActuator::instant();
        actuator.set_absolute_target(-3.5).await.unwrap();
        assert!(!actuator.is_moving().await.unwrap());
        assert_eq!(actuator.position().await.unwrap(), -3.5);
        assert_eq!(actuator.moves(), vec![-3.5]);
    }

    #[tokio::test]
    async fn stuck_actuator_never_settles() {
        let actuator = MockActuator::instant();
        actuator.set_stuck(true);
        actuator.set_absolute_target(1.0).await.unwrap();
        for _ in 0..5 {
            assert!(actuator.is_moving().await.unwrap());
        }
        assert_eq!(actuator.polls(), 5);
    }

    #[tokio::test]
    async fn injected_fault_rejects_move() {
        let actuator = MockActuator::instant();
        actuator.fail_on_target(2.0);

        actuator.set_absolute_target(1.0).await.unwrap();
        let err = actuator.set_absolute_target(2.0).await.unwrap_err();

        assert!(matches!(err, ScanError::Actuator(msg) if msg.contains("2")));
        assert_eq!(actuator.moves(), vec![1.0]);
    }

    #[tokio::test]
    async fn closed_actuator_rejects_moves() {
        let actuator = MockActuator::new();
        actuator.close().await.unwrap();
        actuator.close().await.unwrap();
        assert!(actuator.is_closed());
        assert!(actuator.set_absolute_target(1.0).await.is_err());
    }

    #[test]
    fn config_defaults_from_toml() {
        let config: MockActuatorConfig = toml::from_str("initial_position = 5.0").unwrap();
        assert_eq!(config.initial_position, 5.0);
        assert_eq!(config.speed_units_per_sec, 200.0);
    }
}
