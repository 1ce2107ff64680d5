use geo::{HaversineDestination, Point};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::{DisplayRotationSource, NetworkScanSource, PositionSource, ProviderStatus, SensorSource};
use crate::config::SensorRate;
use crate::types::{DisplayRotation, Fix, SensorKind, SensorSample, GPS_PROVIDER};

#[derive(Debug)]
struct PositionState {
    providers: Vec<ProviderStatus>,
    last_known: HashMap<String, Fix>,
    subscriptions: Vec<(String, Duration)>,
    online: bool,
}

/// In-memory provider table. Clones share state, so a test can keep one
/// handle while the engine owns another.
#[derive(Clone, Debug)]
pub struct SimulatedPositionSource {
    state: Arc<Mutex<PositionState>>,
}

impl Default for SimulatedPositionSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedPositionSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PositionState {
                providers: Vec::new(),
                last_known: HashMap::new(),
                subscriptions: Vec::new(),
                online: true,
            })),
        }
    }

    pub fn with_provider(self, name: &str, enabled: bool) -> Self {
        self.set_provider(name, enabled);
        self
    }

    pub fn set_provider(&self, name: &str, enabled: bool) {
        if let Ok(mut state) = self.state.lock() {
            match state.providers.iter_mut().find(|p| p.name == name) {
                Some(p) => p.enabled = enabled,
                None => state.providers.push(ProviderStatus::new(name, enabled)),
            }
        }
    }

    pub fn set_last_known(&self, fix: Fix) {
        if let Ok(mut state) = self.state.lock() {
            state.last_known.insert(fix.provider().to_string(), fix);
        }
    }

    pub fn set_online(&self, online: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.online = online;
        }
    }

    /// Providers currently streaming updates.
    pub fn subscriptions(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.subscriptions.iter().map(|(name, _)| name.clone()).collect())
            .unwrap_or_default()
    }
}

impl PositionSource for SimulatedPositionSource {
    fn providers(&self) -> Vec<ProviderStatus> {
        self.state
            .lock()
            .map(|s| s.providers.clone())
            .unwrap_or_default()
    }

    fn last_known_fix(&self, provider: &str) -> Option<Fix> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.last_known.get(provider).cloned())
    }

    fn request_updates(&mut self, provider: &str, min_interval: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.subscriptions.push((provider.to_string(), min_interval));
        }
    }

    fn remove_updates(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.subscriptions.clear();
        }
    }

    fn is_online(&self) -> bool {
        self.state.lock().map(|s| s.online).unwrap_or(false)
    }
}

#[derive(Clone, Debug)]
pub struct SimulatedSensors {
    available: Vec<SensorKind>,
    registered: Arc<Mutex<Vec<(SensorKind, SensorRate)>>>,
}

impl SimulatedSensors {
    pub fn new(available: &[SensorKind]) -> Self {
        Self {
            available: available.to_vec(),
            registered: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Accelerometer and magnetometer both present.
    pub fn full() -> Self {
        Self::new(&[SensorKind::Accelerometer, SensorKind::Magnetometer])
    }

    pub fn registered(&self) -> Vec<(SensorKind, SensorRate)> {
        self.registered.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl SensorSource for SimulatedSensors {
    fn register(&mut self, kind: SensorKind, rate: SensorRate) -> bool {
        if !self.available.contains(&kind) {
            return false;
        }
        if let Ok(mut registered) = self.registered.lock() {
            registered.push((kind, rate));
        }
        true
    }

    fn unregister_all(&mut self) {
        if let Ok(mut registered) = self.registered.lock() {
            registered.clear();
        }
    }
}

#[derive(Clone, Debug)]
pub struct SimulatedNetworkScanner {
    available: bool,
    scanning: Arc<Mutex<bool>>,
}

impl SimulatedNetworkScanner {
    pub fn new(available: bool) -> Self {
        Self {
            available,
            scanning: Arc::new(Mutex::new(false)),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.lock().map(|s| *s).unwrap_or(false)
    }
}

impl NetworkScanSource for SimulatedNetworkScanner {
    fn start_scan(&mut self) -> bool {
        if self.available {
            if let Ok(mut scanning) = self.scanning.lock() {
                *scanning = true;
            }
        }
        self.available
    }

    fn stop_scan(&mut self) {
        if let Ok(mut scanning) = self.scanning.lock() {
            *scanning = false;
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FixedRotation(pub DisplayRotation);

impl DisplayRotationSource for FixedRotation {
    fn rotation(&self) -> DisplayRotation {
        self.0
    }
}

/// Straight-line drive used by the demo binary: fixes along a constant
/// bearing, and a flat phone pointing the same way.
#[derive(Clone, Copy, Debug)]
pub struct SimulatedTrack {
    pub origin: Point<f64>,
    pub speed_mps: f64,
    pub bearing_deg: f64,
}

impl Default for SimulatedTrack {
    fn default() -> Self {
        // San Francisco, heading east
        Self {
            origin: Point::new(-122.4194, 37.7749),
            speed_mps: 8.0,
            bearing_deg: 90.0,
        }
    }
}

impl SimulatedTrack {
    pub fn fix_at(&self, provider: &str, elapsed: Duration, wall_ms: i64) -> Fix {
        let secs = elapsed.as_secs_f64();
        let position = self
            .origin
            .haversine_destination(self.bearing_deg, self.speed_mps * secs);
        let accuracy = if provider == GPS_PROVIDER {
            5.0 + (secs * 0.1).sin() * 2.0
        } else {
            35.0 + (secs * 0.05).cos() * 10.0
        };

        let mut fix = Fix::new(provider, position.y(), position.x(), accuracy, wall_ms, wall_ms)
            .with_altitude(15.0)
            .with_speed(self.speed_mps)
            .with_elapsed_realtime_nanos(elapsed.as_nanos() as u64);
        if self.speed_mps > 0.0 {
            fix = fix.with_bearing(self.bearing_deg);
        }
        fix
    }

    /// Gravity on a flat device with a little road vibration.
    pub fn accelerometer(&self, elapsed: Duration) -> SensorSample {
        let secs = elapsed.as_secs_f64();
        SensorSample::accelerometer(
            (secs * 7.0).sin() * 0.05,
            (secs * 5.0).cos() * 0.05,
            9.81,
            elapsed.as_nanos() as i64,
        )
    }

    /// Geomagnetic field for a flat device pointing along the track.
    pub fn magnetometer(&self, elapsed: Duration) -> SensorSample {
        let azimuth = self.bearing_deg.to_radians() + (elapsed.as_secs_f64() * 0.3).sin() * 0.05;
        SensorSample::magnetometer(
            -20.0 * azimuth.sin(),
            20.0 * azimuth.cos(),
            -40.0,
            elapsed.as_nanos() as i64,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NETWORK_PROVIDER;
    use approx::assert_relative_eq;

    #[test]
    fn test_position_source_shares_state() {
        let source = SimulatedPositionSource::new().with_provider(GPS_PROVIDER, true);
        let mut engine_side = source.clone();
        engine_side.request_updates(GPS_PROVIDER, Duration::from_millis(500));
        assert_eq!(source.subscriptions(), vec![GPS_PROVIDER.to_string()]);

        source.set_provider(GPS_PROVIDER, false);
        assert!(!engine_side.providers()[0].enabled);

        engine_side.remove_updates();
        assert!(source.subscriptions().is_empty());
    }

    #[test]
    fn test_sensors_only_register_available_kinds() {
        let mut sensors = SimulatedSensors::new(&[SensorKind::Accelerometer]);
        assert!(sensors.register(SensorKind::Accelerometer, SensorRate::Ui));
        assert!(!sensors.register(SensorKind::Magnetometer, SensorRate::Ui));
        assert_eq!(sensors.registered().len(), 1);
    }

    #[test]
    fn test_unavailable_scanner() {
        let mut scanner = SimulatedNetworkScanner::new(false);
        assert!(!scanner.start_scan());
        assert!(!scanner.is_scanning());
    }

    #[test]
    fn test_track_moves_along_bearing() {
        let track = SimulatedTrack::default();
        let start = track.fix_at(GPS_PROVIDER, Duration::ZERO, 0);
        let later = track.fix_at(GPS_PROVIDER, Duration::from_secs(10), 10_000);

        assert_relative_eq!(start.distance_to(&later), 80.0, epsilon = 0.01);
        assert!(later.longitude() > start.longitude());
        assert!(track.fix_at(NETWORK_PROVIDER, Duration::ZERO, 0).accuracy() > start.accuracy());
    }
}
