//! Magnetic declination models
//!
//! Declination is the angle between magnetic north and true north, positive
//! when magnetic north lies east of true north. The heading estimator adds it
//! to the compass azimuth to obtain a true heading.

pub trait DeclinationModel {
    /// Declination in degrees at the given position and wall-clock time (ms).
    fn declination_degrees(
        &self,
        latitude: f64,
        longitude: f64,
        altitude_m: f64,
        time_ms: i64,
    ) -> f64;
}

/// Constant declination, for tests and regions where it barely changes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedDeclination(pub f64);

impl DeclinationModel for FixedDeclination {
    fn declination_degrees(&self, _lat: f64, _lon: f64, _alt: f64, _time_ms: i64) -> f64 {
        self.0
    }
}

const EPOCH_2020_MS: i64 = 1_577_836_800_000;
const MS_PER_YEAR: f64 = 365.25 * 24.0 * 3600.0 * 1000.0;

/// Tilted-dipole approximation of the geomagnetic field (IGRF-13 degree 1).
///
/// Accurate to a few degrees away from magnetic anomalies, which is enough to
/// turn a phone compass into a usable true heading. Altitude does not change
/// the direction of a pure dipole field, so it is ignored.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DipoleDeclination {
    /// Gauss coefficients at epoch, nT.
    pub g10: f64,
    pub g11: f64,
    pub h11: f64,
    /// Secular variation, nT/year.
    pub g10_rate: f64,
    pub g11_rate: f64,
    pub h11_rate: f64,
    pub epoch_ms: i64,
}

impl Default for DipoleDeclination {
    fn default() -> Self {
        Self {
            g10: -29404.8,
            g11: -1450.9,
            h11: 4652.5,
            g10_rate: 5.7,
            g11_rate: 7.4,
            h11_rate: -25.9,
            epoch_ms: EPOCH_2020_MS,
        }
    }
}

impl DipoleDeclination {
    fn coefficients_at(&self, time_ms: i64) -> (f64, f64, f64) {
        let years = (time_ms - self.epoch_ms) as f64 / MS_PER_YEAR;
        (
            self.g10 + self.g10_rate * years,
            self.g11 + self.g11_rate * years,
            self.h11 + self.h11_rate * years,
        )
    }
}

impl DeclinationModel for DipoleDeclination {
    fn declination_degrees(
        &self,
        latitude: f64,
        longitude: f64,
        _altitude_m: f64,
        time_ms: i64,
    ) -> f64 {
        let (g10, g11, h11) = self.coefficients_at(time_ms);
        let colatitude = (90.0 - latitude).to_radians();
        let lon = longitude.to_radians();

        // North (X) and east (Y) components of -grad(V) at the reference radius
        let north = -g10 * colatitude.sin() + (g11 * lon.cos() + h11 * lon.sin()) * colatitude.cos();
        let east = g11 * lon.sin() - h11 * lon.cos();

        east.atan2(north).to_degrees()
    }
}
