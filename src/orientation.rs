//! Device orientation from an accelerometer/magnetometer pair.

use crate::types::{RotationMatrix, Row3, Vec3, STANDARD_GRAVITY};

/// Device attitude derived from a rotation matrix, all in radians.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Orientation {
    /// Rotation about -Z; 0 when the device's Y axis points to magnetic north.
    pub azimuth: f64,
    pub pitch: f64,
    pub roll: f64,
}

/// Turns an accelerometer/magnetometer pair into a device rotation.
pub trait OrientationSolver {
    /// `None` when the pair cannot define a frame (free fall, vectors parallel).
    fn rotation_matrix(&self, gravity: &Vec3, geomagnetic: &Vec3) -> Option<RotationMatrix>;

    fn azimuth(&self, gravity: &Vec3, geomagnetic: &Vec3) -> Option<f64> {
        self.rotation_matrix(gravity, geomagnetic)
            .map(|r| orientation(&r).azimuth)
    }
}

/// Cross-product construction of the east/north/up frame.
///
/// East = B × g, north = g × east. The matrix rows are the world axes
/// expressed in device coordinates.
#[derive(Clone, Copy, Debug)]
pub struct TiltCompensatedSolver {
    /// Below this fraction of 1 g the device is treated as free-falling.
    pub min_gravity_fraction: f64,
    /// Minimum |B × g| (µT·m/s²) before the east axis is trusted.
    pub min_east_norm: f64,
}

impl Default for TiltCompensatedSolver {
    fn default() -> Self {
        Self {
            min_gravity_fraction: 0.1,
            min_east_norm: 0.1,
        }
    }
}

impl OrientationSolver for TiltCompensatedSolver {
    fn rotation_matrix(&self, gravity: &Vec3, geomagnetic: &Vec3) -> Option<RotationMatrix> {
        let free_fall = self.min_gravity_fraction * STANDARD_GRAVITY;
        if gravity.norm_squared() < free_fall * free_fall {
            return None;
        }

        let east = geomagnetic.cross(gravity);
        let east_norm = east.norm();
        if !east_norm.is_finite() || east_norm < self.min_east_norm {
            return None;
        }

        let east = east / east_norm;
        let up = gravity.normalize();
        let north = up.cross(&east);

        Some(RotationMatrix::from_rows(&[
            Row3::new(east.x, east.y, east.z),
            Row3::new(north.x, north.y, north.z),
            Row3::new(up.x, up.y, up.z),
        ]))
    }
}

pub fn orientation(r: &RotationMatrix) -> Orientation {
    Orientation {
        azimuth: r[(0, 1)].atan2(r[(1, 1)]),
        pitch: (-r[(2, 1)]).clamp(-1.0, 1.0).asin(),
        roll: (-r[(2, 0)]).atan2(r[(2, 2)]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    /// Field seen by a flat device whose Y axis points `azimuth` east of magnetic north.
    fn field_for_azimuth(azimuth: f64) -> Vec3 {
        Vec3::new(-20.0 * azimuth.sin(), 20.0 * azimuth.cos(), -40.0)
    }

    fn flat_gravity() -> Vec3 {
        Vec3::new(0.0, 0.0, 9.81)
    }

    #[test]
    fn test_flat_device_pointing_north() {
        let solver = TiltCompensatedSolver::default();
        let azimuth = solver.azimuth(&flat_gravity(), &field_for_azimuth(0.0)).unwrap();
        assert_relative_eq!(azimuth, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_flat_device_pointing_east() {
        let solver = TiltCompensatedSolver::default();
        let azimuth = solver.azimuth(&flat_gravity(), &field_for_azimuth(PI / 2.0)).unwrap();
        assert_relative_eq!(azimuth, PI / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_flat_device_pointing_south_west() {
        let solver = TiltCompensatedSolver::default();
        let target = -3.0 * PI / 4.0;
        let azimuth = solver.azimuth(&flat_gravity(), &field_for_azimuth(target)).unwrap();
        assert_relative_eq!(azimuth, target, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_matrix_is_orthonormal() {
        let solver = TiltCompensatedSolver::default();
        let r = solver
            .rotation_matrix(&Vec3::new(1.0, 2.0, 9.5), &Vec3::new(5.0, 18.0, -35.0))
            .unwrap();
        let identity = r * r.transpose();
        assert_relative_eq!(identity, RotationMatrix::identity(), epsilon = 1e-9);
    }

    #[test]
    fn test_parallel_vectors_are_degenerate() {
        let solver = TiltCompensatedSolver::default();
        assert!(solver
            .rotation_matrix(&flat_gravity(), &Vec3::new(0.0, 0.0, 40.0))
            .is_none());
    }

    #[test]
    fn test_free_fall_is_degenerate() {
        let solver = TiltCompensatedSolver::default();
        assert!(solver
            .rotation_matrix(&Vec3::new(0.0, 0.0, 0.5), &field_for_azimuth(0.0))
            .is_none());
    }

    #[test]
    fn test_pitch_and_roll_of_flat_device() {
        let solver = TiltCompensatedSolver::default();
        let r = solver.rotation_matrix(&flat_gravity(), &field_for_azimuth(1.0)).unwrap();
        let o = orientation(&r);
        assert_relative_eq!(o.pitch, 0.0, epsilon = 1e-12);
        assert_relative_eq!(o.roll, 0.0, epsilon = 1e-12);
    }
}
