//! Compass heading estimation
//!
//! Accelerometer and magnetometer samples give a magnetic azimuth; the
//! declination held by the arbiter turns it into a true heading. While the
//! device moves fast enough to have a GPS bearing, that bearing replaces the
//! compass entirely.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::arbiter::AcceptedState;
use crate::orientation::OrientationSolver;
use crate::types::{DisplayRotation, SensorKind, SensorSample, Vec3};

/// Sentinel for "no heading available".
pub const NO_HEADING: f64 = -1.0;

const TWO_PI: f64 = 2.0 * PI;

/// `(angle + correction)` wrapped into `[0, 2π)`.
pub fn correct_angle(angle: f64, correction: f64) -> f64 {
    let mut angle = (angle + correction) % TWO_PI;
    if angle < 0.0 {
        angle += TWO_PI;
    }
    // -ε + 2π can round up to exactly 2π
    if angle >= TWO_PI {
        0.0
    } else {
        angle
    }
}

/// GPS bearing (degrees clockwise from north) as a heading in radians.
pub fn bearing_to_heading(bearing_deg: f64) -> f64 {
    correct_angle(0.0, bearing_deg.to_radians())
}

/// One compass emission. Angles are radians; `true_heading` and
/// `declination_offset` are `NO_HEADING` until a declination is known.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompassReading {
    pub time_nanos: i64,
    pub magnetic_heading: f64,
    pub true_heading: f64,
    pub declination_offset: f64,
}

impl CompassReading {
    /// Applies the GPS driving override and declination to a magnetic heading.
    pub fn from_magnetic(time_nanos: i64, magnetic_heading: f64, state: &AcceptedState) -> Self {
        if let Some(driving) = state.driving_heading() {
            return Self {
                time_nanos,
                magnetic_heading: driving,
                true_heading: driving,
                declination_offset: 0.0,
            };
        }

        match state.declination_degrees() {
            Some(declination_deg) => {
                // positive offset: magnetic north is rotated east of true north
                let offset = declination_deg.to_radians();
                Self {
                    time_nanos,
                    magnetic_heading,
                    true_heading: correct_angle(magnetic_heading, offset),
                    declination_offset: offset,
                }
            }
            None => Self {
                time_nanos,
                magnetic_heading,
                true_heading: NO_HEADING,
                declination_offset: NO_HEADING,
            },
        }
    }
}

/// Exponential smoothing of raw sensor vectors (factor 1.0 keeps the raw sample).
struct VectorLowPass {
    factor: f64,
    last: Option<Vec3>,
}

impl VectorLowPass {
    fn new(factor: f64) -> Self {
        Self { factor, last: None }
    }

    fn update(&mut self, input: Vec3) {
        self.last = Some(match self.last {
            Some(prev) => prev * (1.0 - self.factor) + input * self.factor,
            None => input,
        });
    }

    fn value(&self) -> Option<Vec3> {
        self.last
    }
}

pub struct HeadingEstimator {
    solver: Box<dyn OrientationSolver>,
    gravity: VectorLowPass,
    geomagnetic: VectorLowPass,
}

impl HeadingEstimator {
    pub fn new(solver: Box<dyn OrientationSolver>, smoothing: f64) -> Self {
        Self {
            solver,
            gravity: VectorLowPass::new(smoothing),
            geomagnetic: VectorLowPass::new(smoothing),
        }
    }

    pub fn on_accelerometer(
        &mut self,
        sample: &SensorSample,
        state: &AcceptedState,
    ) -> Option<CompassReading> {
        self.gravity.update(sample.vector());
        self.emit(sample.timestamp_nanos, state)
    }

    pub fn on_magnetometer(
        &mut self,
        sample: &SensorSample,
        state: &AcceptedState,
    ) -> Option<CompassReading> {
        self.geomagnetic.update(sample.vector());
        self.emit(sample.timestamp_nanos, state)
    }

    pub fn on_sample(
        &mut self,
        sample: &SensorSample,
        state: &AcceptedState,
    ) -> Option<CompassReading> {
        match sample.kind {
            SensorKind::Accelerometer => self.on_accelerometer(sample, state),
            SensorKind::Magnetometer => self.on_magnetometer(sample, state),
        }
    }

    /// Raw azimuth from the latest sample pair, `None` until both kinds have
    /// arrived or while their geometry is degenerate.
    pub fn magnetic_azimuth(&self) -> Option<f64> {
        let gravity = self.gravity.value()?;
        let geomagnetic = self.geomagnetic.value()?;
        self.solver.azimuth(&gravity, &geomagnetic)
    }

    fn emit(&self, time_nanos: i64, state: &AcceptedState) -> Option<CompassReading> {
        let magnetic = correct_angle(self.magnetic_azimuth()?, 0.0);
        Some(CompassReading::from_magnetic(time_nanos, magnetic, state))
    }
}

/// Rotates compass angles into display coordinates.
///
/// Skipped entirely while the heading comes from GPS bearing, which does not
/// depend on how the device is held. Negative entries are sentinels and stay as is.
pub fn correct_compass_angles(state: &AcceptedState, rotation: DisplayRotation, angles: &mut [f64]) {
    if state.driving_heading().is_some() {
        return;
    }

    let correction = rotation.correction_radians();
    for angle in angles.iter_mut().filter(|a| **a >= 0.0) {
        *angle = correct_angle(*angle, correction);
    }
}
