//! Best-fix arbitration
//!
//! A held fix's accuracy is treated as decaying with time at a plausible
//! travel speed, so a somewhat less accurate but much fresher candidate can
//! replace it. The arbiter also owns the state the heading estimator depends
//! on: the GPS driving heading and the declination reference.

use geo::{HaversineDistance, Point};
use log::{debug, info};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::declination::DeclinationModel;
use crate::heading::{bearing_to_heading, NO_HEADING};
use crate::types::Fix;

/// Where and what declination was last computed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeclinationReference {
    pub point: Point<f64>,
    pub declination_deg: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AcceptedState {
    last_fix: Option<Fix>,
    accepted_at_ms: i64,
    driving_heading: f64,
    declination: Option<DeclinationReference>,
}

impl Default for AcceptedState {
    fn default() -> Self {
        Self {
            last_fix: None,
            accepted_at_ms: 0,
            driving_heading: NO_HEADING,
            declination: None,
        }
    }
}

impl AcceptedState {
    pub fn last_fix(&self) -> Option<&Fix> {
        self.last_fix.as_ref()
    }

    /// Wall-clock time (ms) of the last acceptance.
    pub fn accepted_at_ms(&self) -> i64 {
        self.accepted_at_ms
    }

    /// Heading from GPS bearing in radians, or `NO_HEADING` (-1.0).
    pub fn driving_heading_raw(&self) -> f64 {
        self.driving_heading
    }

    pub fn driving_heading(&self) -> Option<f64> {
        (self.driving_heading >= 0.0).then_some(self.driving_heading)
    }

    pub fn declination_reference(&self) -> Option<&DeclinationReference> {
        self.declination.as_ref()
    }

    pub fn declination_degrees(&self) -> Option<f64> {
        self.declination.map(|d| d.declination_deg)
    }
}

pub struct FixArbiter {
    default_speed_mps: f64,
    min_driving_speed_mps: f64,
    declination_recompute_distance_m: f64,
    fix_expiration_ms: i64,
    clock: Box<dyn Clock>,
    declination_model: Box<dyn DeclinationModel>,
    state: AcceptedState,
}

impl FixArbiter {
    pub fn new(
        config: &EngineConfig,
        clock: Box<dyn Clock>,
        declination_model: Box<dyn DeclinationModel>,
    ) -> Self {
        Self {
            default_speed_mps: config.default_speed_mps,
            min_driving_speed_mps: config.min_driving_speed_mps,
            declination_recompute_distance_m: config.declination_recompute_distance_m,
            fix_expiration_ms: config.fix_expiration_ms,
            clock,
            declination_model,
            state: AcceptedState::default(),
        }
    }

    pub fn state(&self) -> &AcceptedState {
        &self.state
    }

    pub fn last_fix(&self) -> Option<&Fix> {
        self.state.last_fix.as_ref()
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Returns true when `candidate` became the held fix.
    pub fn consider_fix(&mut self, candidate: Fix) -> bool {
        if !candidate.is_valid() {
            debug!(
                "Dropping {} fix with accuracy {}",
                candidate.provider(),
                candidate.accuracy()
            );
            return false;
        }

        if !self.is_better(&candidate) {
            debug!(
                "Rejected {} fix (accuracy {:.1} m)",
                candidate.provider(),
                candidate.accuracy()
            );
            return false;
        }

        self.accept(candidate);
        true
    }

    /// Accuracy-decay comparison against the held fix.
    pub fn is_better(&self, candidate: &Fix) -> bool {
        let Some(held) = self.state.last_fix.as_ref() else {
            return true;
        };

        let speed = self
            .default_speed_mps
            .max((candidate.speed() + held.speed()) / 2.0);
        candidate.accuracy() < held.accuracy() + speed * self.time_diff_secs(candidate, held)
    }

    /// Seconds between `candidate` and `held`.
    ///
    /// Monotonic capture times are used when both fixes have one. Otherwise
    /// provider wall clocks are only comparable within one provider; across
    /// providers the local clock since the last acceptance stands in, since
    /// device clocks can be misconfigured.
    pub fn time_diff_secs(&self, candidate: &Fix, held: &Fix) -> f64 {
        match (candidate.elapsed_realtime_nanos(), held.elapsed_realtime_nanos()) {
            (Some(now), Some(then)) => (now as i128 - then as i128) as f64 * 1.0e-9,
            _ if same_provider(candidate.provider(), held.provider()) => {
                (candidate.time_ms() - held.time_ms()) as f64 * 1.0e-3
            }
            _ => (self.clock.now_wall_ms() - self.state.accepted_at_ms) as f64 * 1.0e-3,
        }
    }

    fn accept(&mut self, fix: Fix) {
        self.state.driving_heading = self.driving_heading_for(&fix);
        self.hold(fix);
    }

    /// Holds a last-known fix picked by `bootstrap`.
    ///
    /// Its speed and bearing are from before activation, so the driving
    /// heading stays unavailable until a live fix arrives. Declination is
    /// still derived from it.
    pub fn seed(&mut self, fix: Fix) {
        self.state.driving_heading = NO_HEADING;
        self.hold(fix);
    }

    fn hold(&mut self, fix: Fix) {
        if self.needs_declination(&fix) {
            let declination_deg = self.declination_model.declination_degrees(
                fix.latitude(),
                fix.longitude(),
                fix.altitude(),
                fix.time_ms(),
            );
            debug!(
                "Declination {:.2}° computed at ({:.5}, {:.5})",
                declination_deg,
                fix.latitude(),
                fix.longitude()
            );
            self.state.declination = Some(DeclinationReference {
                point: fix.point(),
                declination_deg,
            });
        }

        debug!(
            "Accepted {} fix ({:.5}, {:.5}) ±{:.1} m",
            fix.provider(),
            fix.latitude(),
            fix.longitude(),
            fix.accuracy()
        );
        self.state.last_fix = Some(fix);
        self.state.accepted_at_ms = self.clock.now_wall_ms();
    }

    fn driving_heading_for(&self, fix: &Fix) -> f64 {
        match fix.bearing() {
            Some(bearing) if fix.speed() >= self.min_driving_speed_mps => bearing_to_heading(bearing),
            _ => NO_HEADING,
        }
    }

    fn needs_declination(&self, fix: &Fix) -> bool {
        match self.state.declination.as_ref() {
            None => true,
            Some(reference) => {
                fix.point().haversine_distance(&reference.point) > self.declination_recompute_distance_m
            }
        }
    }

    /// Age check for a fix reported by a provider (last-known or live).
    pub fn is_expired(&self, fix: &Fix) -> bool {
        self.is_expired_since(fix, fix.received_at_ms())
    }

    /// Age check for the held fix; its wall-clock reference is the acceptance time.
    pub fn held_fix_expired(&self) -> bool {
        match self.state.last_fix.as_ref() {
            Some(fix) => self.is_expired_since(fix, self.state.accepted_at_ms),
            None => true,
        }
    }

    fn is_expired_since(&self, fix: &Fix, wall_reference_ms: i64) -> bool {
        let age_ms = match (fix.elapsed_realtime_nanos(), self.clock.elapsed_realtime_nanos()) {
            (Some(captured), Some(now)) => (now as i128 - captured as i128) / 1_000_000,
            _ => (self.clock.now_wall_ms() - wall_reference_ms) as i128,
        };
        age_ms > self.fix_expiration_ms as i128
    }

    /// Picks the most accurate non-expired fix among last-known candidates.
    /// Ties keep the first one seen.
    pub fn bootstrap(&self, candidates: impl IntoIterator<Item = Fix>) -> Option<Fix> {
        let mut best: Option<Fix> = None;
        for fix in candidates {
            if !fix.is_valid() || self.is_expired(&fix) {
                debug!("Skipping stale last-known {} fix", fix.provider());
                continue;
            }
            if best.as_ref().map_or(true, |b| b.accuracy() > fix.accuracy()) {
                best = Some(fix);
            }
        }
        best
    }

    /// Clears heading state; the held fix survives so it can be redisplayed.
    pub fn reset(&mut self) {
        info!("Resetting declination and driving heading");
        self.state.declination = None;
        self.state.driving_heading = NO_HEADING;
    }

    pub fn forget_fix(&mut self) {
        self.state.last_fix = None;
    }
}

fn same_provider(a: &str, b: &str) -> bool {
    !a.is_empty() && a == b
}
