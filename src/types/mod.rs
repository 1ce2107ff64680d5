pub mod linalg;

pub use linalg::*;

use geo::{HaversineDistance, Point};
use serde::{Deserialize, Deserializer, Serialize};

/// Satellite provider, the only one able to report GPS_OFF.
pub const GPS_PROVIDER: &str = "gps";
/// Cell/WiFi provider. Stale while the device is offline on legacy platforms.
pub const NETWORK_PROVIDER: &str = "network";
/// Piggy-back provider that never yields fixes of its own.
pub const PASSIVE_PROVIDER: &str = "passive";

/// A positioning fix as reported by a provider. Immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    provider: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    altitude: f64,
    accuracy: f64,
    #[serde(default, deserialize_with = "deserialize_speed")]
    speed: f64,
    #[serde(default)]
    bearing: Option<f64>,
    /// Wall-clock capture time reported by the provider (ms since epoch).
    time_ms: i64,
    /// Monotonic capture time (ns since boot), when the platform has one.
    #[serde(default)]
    elapsed_realtime_nanos: Option<u64>,
    /// Wall-clock time the host received the fix (ms since epoch).
    received_at_ms: i64,
}

/// Same rule as `Fix::with_speed`, for fixes read from logs.
fn deserialize_speed<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let speed = f64::deserialize(deserializer)?;
    Ok(clamp_speed(speed))
}

fn clamp_speed(speed: f64) -> f64 {
    if speed.is_finite() {
        speed.max(0.0)
    } else {
        0.0
    }
}

impl Fix {
    pub fn new(
        provider: &str,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        time_ms: i64,
        received_at_ms: i64,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            latitude,
            longitude,
            altitude: 0.0,
            accuracy,
            speed: 0.0,
            bearing: None,
            time_ms,
            elapsed_realtime_nanos: None,
            received_at_ms,
        }
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = altitude;
        self
    }

    /// Negative or non-finite speeds become zero.
    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = clamp_speed(speed);
        self
    }

    /// Bearing in degrees clockwise from true north.
    pub fn with_bearing(mut self, bearing_deg: f64) -> Self {
        self.bearing = Some(bearing_deg);
        self
    }

    pub fn with_elapsed_realtime_nanos(mut self, nanos: u64) -> Self {
        self.elapsed_realtime_nanos = Some(nanos);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn altitude(&self) -> f64 {
        self.altitude
    }

    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn bearing(&self) -> Option<f64> {
        self.bearing
    }

    pub fn time_ms(&self) -> i64 {
        self.time_ms
    }

    pub fn elapsed_realtime_nanos(&self) -> Option<u64> {
        self.elapsed_realtime_nanos
    }

    pub fn received_at_ms(&self) -> i64 {
        self.received_at_ms
    }

    /// A fix without a positive, finite accuracy carries no usable position.
    pub fn is_valid(&self) -> bool {
        self.accuracy.is_finite() && self.accuracy > 0.0
    }

    pub fn point(&self) -> Point<f64> {
        Point::new(self.longitude, self.latitude)
    }

    /// Great-circle distance in meters.
    pub fn distance_to(&self, other: &Fix) -> f64 {
        self.point().haversine_distance(&other.point())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Accelerometer,
    Magnetometer,
}

/// One raw 3-axis sample from the accelerometer or magnetometer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorSample {
    pub kind: SensorKind,
    pub values: [f64; SENSOR_AXES],
    pub timestamp_nanos: i64,
}

impl SensorSample {
    pub fn accelerometer(x: f64, y: f64, z: f64, timestamp_nanos: i64) -> Self {
        Self {
            kind: SensorKind::Accelerometer,
            values: [x, y, z],
            timestamp_nanos,
        }
    }

    pub fn magnetometer(x: f64, y: f64, z: f64, timestamp_nanos: i64) -> Self {
        Self {
            kind: SensorKind::Magnetometer,
            values: [x, y, z],
            timestamp_nanos,
        }
    }

    pub fn vector(&self) -> Vec3 {
        Vec3::new(self.values[0], self.values[1], self.values[2])
    }
}

/// Error codes delivered through `LocationObserver::on_location_error`.
/// Numeric values are shared with the map core and must not change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum LocationErrorCode {
    None = 0,
    NotSupported = 1,
    Denied = 2,
    GpsOff = 3,
}

impl LocationErrorCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

/// Display rotation relative to the device's natural orientation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisplayRotation {
    #[default]
    Rotation0,
    Rotation90,
    Rotation180,
    Rotation270,
}

impl DisplayRotation {
    pub fn from_degrees(degrees: u32) -> Option<Self> {
        match degrees {
            0 => Some(Self::Rotation0),
            90 => Some(Self::Rotation90),
            180 => Some(Self::Rotation180),
            270 => Some(Self::Rotation270),
            _ => None,
        }
    }

    /// Angle to add to a compass heading drawn on a display in this rotation.
    pub fn correction_radians(self) -> f64 {
        use std::f64::consts::PI;
        match self {
            Self::Rotation0 => 0.0,
            Self::Rotation90 => PI / 2.0,
            Self::Rotation180 => PI,
            Self::Rotation270 => 3.0 * PI / 2.0,
        }
    }
}

/// Everything the host can push into the engine through its event queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundEvent {
    Fix { fix: Fix },
    NetworkFix { fix: Option<Fix> },
    Sample { sample: SensorSample },
}
