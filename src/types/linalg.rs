//! Linear algebra aliases for the compass pipeline
//!
//! Raw sensor vectors and the device rotation matrix are fixed 3-dimensional,
//! so everything uses statically sized nalgebra types.

use nalgebra::{Matrix3, RowVector3, Vector3};

pub const SENSOR_AXES: usize = 3;

/// Raw accelerometer / magnetometer reading in device coordinates.
pub type Vec3 = Vector3<f64>;

/// Row of a rotation matrix.
pub type Row3 = RowVector3<f64>;

/// Device-to-world rotation matrix (rows: east, north, up).
pub type RotationMatrix = Matrix3<f64>;

/// Standard gravity in m/s².
pub const STANDARD_GRAVITY: f64 = 9.80665;
