//! Data model of a positional sweep scan.

use crate::error::{ScanError, ScanResult};
use chrono::{DateTime, Utc};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Frequency window and resolution of one instrument sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepConfiguration {
    /// Start frequency in Hz
    pub start_hz: f64,
    /// Stop frequency in Hz
    pub stop_hz: f64,
    /// IF bandwidth in Hz
    pub if_bandwidth_hz: f64,
    /// Number of frequency points per sweep
    pub points: u32,
}

impl SweepConfiguration {
    /// Create and validate a sweep configuration.
    pub fn new(start_hz: f64, stop_hz: f64, if_bandwidth_hz: f64, points: u32) -> ScanResult<Self> {
        let config = Self {
            start_hz,
            stop_hz,
            if_bandwidth_hz,
            points,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the window is usable by the instrument.
    pub fn validate(&self) -> ScanResult<()> {
        if !self.start_hz.is_finite() || !self.stop_hz.is_finite() {
            return Err(ScanError::Configuration(
                "sweep frequencies must be finite".into(),
            ));
        }
        if self.start_hz >= self.stop_hz {
            return Err(ScanError::Configuration(format!(
                "start frequency {} Hz must be below stop frequency {} Hz",
                self.start_hz, self.stop_hz
            )));
        }
        if !(self.if_bandwidth_hz.is_finite() && self.if_bandwidth_hz > 0.0) {
            return Err(ScanError::Configuration(format!(
                "IF bandwidth must be positive, got {}",
                self.if_bandwidth_hz
            )));
        }
        if self.points == 0 {
            return Err(ScanError::Configuration(
                "sweep point count must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Linearly spaced frequency vector matching the sweep points.
    pub fn frequencies(&self) -> Vec<f64> {
        let n = self.points as usize;
        if n == 1 {
            return vec![self.start_hz];
        }
        let span = self.stop_hz - self.start_hz;
        let last = (n - 1) as f64;
        (0..n)
            .map(|i| self.start_hz + span * (i as f64) / last)
            .collect()
    }
}

/// Upper bound on the positions of a generated plan.
pub const MAX_PLAN_POSITIONS: usize = 1_000_000;

/// Ordered list of actuator positions visited by a scan.
///
/// Never empty: the first position doubles as the home position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanPlan {
    positions: Vec<f64>,
}

impl ScanPlan {
    /// Build a plan from caller-supplied positions.
    pub fn new(positions: Vec<f64>) -> ScanResult<Self> {
        if positions.is_empty() {
            return Err(ScanError::Configuration(
                "scan plan must contain at least one position".into(),
            ));
        }
        if let Some(bad) = positions.iter().find(|p| !p.is_finite()) {
            return Err(ScanError::Configuration(format!(
                "scan position {} is not finite",
                bad
            )));
        }
        Ok(Self { positions })
    }

    /// Evenly stepped plan from `start` to `stop` inclusive.
    ///
    /// `step` may be negative for descending scans but must point from
    /// `start` towards `stop`.
    pub fn linear(start: f64, stop: f64, step: f64) -> ScanResult<Self> {
        if !(step.is_finite() && step != 0.0) {
            return Err(ScanError::Configuration(format!(
                "scan step must be non-zero and finite, got {}",
                step
            )));
        }
        let span = stop - start;
        if !span.is_finite() {
            return Err(ScanError::Configuration(format!(
                "scan range {} to {} is not finite",
                start, stop
            )));
        }
        if span != 0.0 && span.signum() != step.signum() {
            return Err(ScanError::Configuration(format!(
                "scan step {} does not lead from {} to {}",
                step, start, stop
            )));
        }
        // Tolerance keeps `stop` when it is reached up to rounding.
        let steps = (span / step + 1e-9).floor();
        if steps >= MAX_PLAN_POSITIONS as f64 {
            return Err(ScanError::Configuration(format!(
                "scan from {} to {} in steps of {} exceeds {} positions",
                start, stop, step, MAX_PLAN_POSITIONS
            )));
        }
        let count = steps as usize + 1;
        let positions = (0..count).map(|i| start + step * i as f64).collect();
        Self::new(positions)
    }

    /// Positions in visiting order.
    pub fn positions(&self) -> &[f64] {
        &self.positions
    }

    /// First position, revisited by the homing step.
    pub fn home(&self) -> f64 {
        self.positions[0]
    }

    /// Number of planned positions.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Why a record was acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Regular acquisition at a planned position
    Scan,
    /// Second acquisition at the first position (noise-floor pair)
    Duplicate,
    /// Final acquisition after returning to the first position
    Home,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Scan => write!(f, "scan"),
            RecordKind::Duplicate => write!(f, "duplicate"),
            RecordKind::Home => write!(f, "home"),
        }
    }
}

/// One acquisition: where the actuator was and what the instrument returned.
///
/// Immutable once built; ownership moves into the sink on persist.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementRecord {
    /// 1-based acquisition counter within the run
    pub sequence: u32,
    /// Index of the position in the plan
    pub position_index: usize,
    /// Actuator-reported position at acquisition time
    pub position: f64,
    /// Acquisition kind
    pub kind: RecordKind,
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Frequency vector in Hz, shared across a run
    pub frequencies: Arc<[f64]>,
    /// Complex response, same length as `frequencies`
    pub response: Vec<Complex64>,
}

impl MeasurementRecord {
    /// Number of frequency points in the record.
    pub fn len(&self) -> usize {
        self.response.len()
    }

    /// True when the record holds no samples.
    pub fn is_empty(&self) -> bool {
        self.response.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequencies_span_window() {
        let sweep = SweepConfiguration::new(2.3e9, 6.0e9, 1.0e3, 7401).unwrap();
        let f = sweep.frequencies();
        assert_eq!(f.len(), 7401);
        assert_eq!(f[0], 2.3e9);
        assert!((f[7400] - 6.0e9).abs() < 1e-3);
        assert!((f[1] - f[0] - 0.5e6).abs() < 1e-3);
    }

    #[test]
    fn single_point_sweep_uses_start() {
        let sweep = SweepConfiguration::new(1.0e9, 2.0e9, 1.0e3, 1).unwrap();
        assert_eq!(sweep.frequencies(), vec![1.0e9]);
    }

    #[test]
    fn sweep_validation() {
        assert!(SweepConfiguration::new(2.0e9, 1.0e9, 1.0e3, 10).is_err());
        assert!(SweepConfiguration::new(1.0e9, 2.0e9, 0.0, 10).is_err());
        assert!(SweepConfiguration::new(1.0e9, 2.0e9, 1.0e3, 0).is_err());
        assert!(SweepConfiguration::new(f64::NAN, 2.0e9, 1.0e3, 10).is_err());
    }

    #[test]
    fn sweep_deserializes() {
        let sweep: SweepConfiguration = serde_json::from_str(
            r#"{"start_hz": 1e9, "stop_hz": 2e9, "if_bandwidth_hz": 1e3, "points": 201}"#,
        )
        .unwrap();
        assert_eq!(sweep.points, 201);
    }

    #[test]
    fn plan_rejects_empty() {
        assert!(matches!(
            ScanPlan::new(vec![]),
            Err(ScanError::Configuration(_))
        ));
        assert!(ScanPlan::new(vec![0.0, f64::INFINITY]).is_err());
    }

    #[test]
    fn linear_plan_includes_stop() {
        let plan = ScanPlan::linear(0.0, 800.0, 1.0).unwrap();
        assert_eq!(plan.len(), 801);
        assert_eq!(plan.home(), 0.0);
        assert_eq!(plan.positions()[800], 800.0);

        let plan = ScanPlan::linear(0.0, 1.0, 0.1).unwrap();
        assert_eq!(plan.len(), 11);
    }

    #[test]
    fn linear_plan_descending() {
        let plan = ScanPlan::linear(10.0, 0.0, -2.5).unwrap();
        assert_eq!(plan.positions(), &[10.0, 7.5, 5.0, 2.5, 0.0]);
        assert!(ScanPlan::linear(0.0, 10.0, -1.0).is_err());
        assert!(ScanPlan::linear(0.0, 10.0, 0.0).is_err());
    }

    #[test]
    fn linear_plan_rejects_unbounded_ranges() {
        for (start, stop) in [
            (0.0, f64::INFINITY),
            (f64::NEG_INFINITY, 0.0),
            (f64::NAN, 1.0),
            (-f64::MAX, f64::MAX),
        ] {
            assert!(
                matches!(
                    ScanPlan::linear(start, stop, 1.0),
                    Err(ScanError::Configuration(_))
                ),
                "{} .. {} accepted",
                start,
                stop
            );
        }
    }

    #[test]
    fn linear_plan_caps_position_count() {
        let err = ScanPlan::linear(0.0, 1.0e12, 1.0).unwrap_err();
        assert!(matches!(err, ScanError::Configuration(msg) if msg.contains("exceeds")));

        let plan = ScanPlan::linear(0.0, (MAX_PLAN_POSITIONS - 1) as f64, 1.0).unwrap();
        assert_eq!(plan.len(), MAX_PLAN_POSITIONS);
    }

    #[test]
    fn linear_plan_single_point() {
        let plan = ScanPlan::linear(3.0, 3.0, 1.0).unwrap();
        assert_eq!(plan.positions(), &[3.0]);
    }
}
