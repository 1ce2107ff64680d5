//! Engine tunables, loaded from JSON with every field optional.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};

/// Nominal sensor delivery rate requested from the sensor source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorRate {
    Fastest,
    Game,
    Ui,
    #[default]
    Normal,
}

impl SensorRate {
    pub fn period(self) -> Duration {
        match self {
            SensorRate::Fastest => Duration::ZERO,
            SensorRate::Game => Duration::from_millis(20),
            SensorRate::Ui => Duration::from_micros(66_667),
            SensorRate::Normal => Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // ── Fix arbitration ──
    /// Floor for the travel speed used to age the held fix's accuracy.
    pub default_speed_mps: f64,
    /// Fixes older than this are never bootstrapped or re-announced.
    pub fix_expiration_ms: i64,

    // ── Heading ──
    /// GPS bearing replaces the compass at or above this speed.
    pub min_driving_speed_mps: f64,
    /// Declination is recomputed once the accepted fix moves this far from the reference.
    pub declination_recompute_distance_m: f64,
    /// Low-pass factor applied to raw sensor vectors (1.0 = raw samples).
    pub compass_smoothing: f64,

    // ── Sources ──
    pub fix_update_interval_ms: u64,
    pub sensor_rate: SensorRate,
    /// Skip the network provider while offline (older platforms report stale
    /// cached positions with a fresh timestamp).
    pub legacy_network_filter: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_speed_mps: 5.0,
            fix_expiration_ms: 5 * 60 * 1000,
            min_driving_speed_mps: 1.0,
            declination_recompute_distance_m: 1000.0,
            compass_smoothing: 1.0,
            fix_update_interval_ms: 500,
            sensor_rate: SensorRate::Normal,
            legacy_network_filter: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| EngineError::io(path, e))?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if !(self.default_speed_mps.is_finite() && self.default_speed_mps > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "default_speed_mps must be positive, got {}",
                self.default_speed_mps
            )));
        }
        if self.fix_expiration_ms <= 0 {
            return Err(EngineError::InvalidConfig(format!(
                "fix_expiration_ms must be positive, got {}",
                self.fix_expiration_ms
            )));
        }
        if !(self.min_driving_speed_mps.is_finite() && self.min_driving_speed_mps >= 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "min_driving_speed_mps must be non-negative, got {}",
                self.min_driving_speed_mps
            )));
        }
        if !(self.declination_recompute_distance_m.is_finite()
            && self.declination_recompute_distance_m >= 0.0)
        {
            return Err(EngineError::InvalidConfig(format!(
                "declination_recompute_distance_m must be non-negative, got {}",
                self.declination_recompute_distance_m
            )));
        }
        if !(self.compass_smoothing > 0.0 && self.compass_smoothing <= 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "compass_smoothing must be in (0, 1], got {}",
                self.compass_smoothing
            )));
        }
        Ok(())
    }

    pub fn fix_update_interval(&self) -> Duration {
        Duration::from_millis(self.fix_update_interval_ms)
    }
}
