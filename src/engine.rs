//! Engine context tying the arbiter, heading estimator and observers to the
//! platform sources.
//!
//! All methods take `&mut self`: the host serializes fix, sample and
//! attach/detach events (see the `location_engine` binary for a single-writer
//! queue). Nothing here blocks or spawns.

use log::{debug, info, warn};

use crate::arbiter::{AcceptedState, FixArbiter};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::declination::{DeclinationModel, DipoleDeclination};
use crate::error::EngineResult;
use crate::heading::{correct_compass_angles, CompassReading, HeadingEstimator};
use crate::observer::{ObserverHandle, ObserverSet};
use crate::orientation::{OrientationSolver, TiltCompensatedSolver};
use crate::sources::{DisplayRotationSource, NetworkScanSource, NoSensors, PositionSource, SensorSource};
use crate::types::{
    DisplayRotation, Fix, InboundEvent, LocationErrorCode, SensorKind, SensorSample, GPS_PROVIDER,
    NETWORK_PROVIDER, PASSIVE_PROVIDER,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    Inactive,
    Active,
}

pub struct LocationEngine {
    config: EngineConfig,
    state: EngineState,
    arbiter: FixArbiter,
    heading: HeadingEstimator,
    observers: ObserverSet,
    positions: Box<dyn PositionSource>,
    sensors: Box<dyn SensorSource>,
    network: Option<Box<dyn NetworkScanSource>>,
    display: Option<Box<dyn DisplayRotationSource>>,
    scanning: bool,
}

impl LocationEngine {
    /// Engine with the system clock, the dipole declination model and no sensors.
    pub fn new(config: EngineConfig, positions: Box<dyn PositionSource>) -> EngineResult<Self> {
        config.validate()?;
        let arbiter = FixArbiter::new(
            &config,
            Box::new(SystemClock::new()),
            Box::new(DipoleDeclination::default()),
        );
        let heading = HeadingEstimator::new(
            Box::new(TiltCompensatedSolver::default()),
            config.compass_smoothing,
        );

        Ok(Self {
            config,
            state: EngineState::Inactive,
            arbiter,
            heading,
            observers: ObserverSet::new(),
            positions,
            sensors: Box::new(NoSensors),
            network: None,
            display: None,
            scanning: false,
        })
    }

    /// Replaces the clock. Call before the first attach; the held state is rebuilt.
    pub fn with_clock(self, clock: Box<dyn Clock>) -> Self {
        self.with_time_and_declination(clock, Box::new(DipoleDeclination::default()))
    }

    /// Replaces both clock and declination model (they live in the arbiter together).
    pub fn with_time_and_declination(
        mut self,
        clock: Box<dyn Clock>,
        declination: Box<dyn DeclinationModel>,
    ) -> Self {
        self.arbiter = FixArbiter::new(&self.config, clock, declination);
        self
    }

    pub fn with_solver(mut self, solver: Box<dyn OrientationSolver>) -> Self {
        self.heading = HeadingEstimator::new(solver, self.config.compass_smoothing);
        self
    }

    pub fn with_sensors(mut self, sensors: Box<dyn SensorSource>) -> Self {
        self.sensors = sensors;
        self
    }

    pub fn with_network_scanner(mut self, scanner: Box<dyn NetworkScanSource>) -> Self {
        self.network = Some(scanner);
        self
    }

    pub fn with_display_rotation(mut self, display: Box<dyn DisplayRotationSource>) -> Self {
        self.display = Some(display);
        self
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn accepted_state(&self) -> &AcceptedState {
        self.arbiter.state()
    }

    /// The held fix, which survives deactivation.
    pub fn last_known(&self) -> Option<&Fix> {
        self.arbiter.last_fix()
    }

    /// Last fix the satellite provider itself remembers.
    pub fn last_gps_fix(&self) -> Option<Fix> {
        self.positions.last_known_fix(GPS_PROVIDER)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Registers `observer` and activates the engine if it was inactive.
    ///
    /// Activation failures are reported to this observer only. An observer
    /// that got `Denied` stays registered; attaching it again retries.
    pub fn attach(&mut self, observer: ObserverHandle) {
        self.observers.add(observer.clone());
        if self.state == EngineState::Active {
            return;
        }

        let (providers, gps_off) = self.filtered_providers();
        debug!("Enabled providers: {:?}", providers);

        self.scanning = match self.network.as_mut() {
            Some(scanner) => scanner.start_scan(),
            None => false,
        };

        if providers.is_empty() && !self.scanning {
            warn!("No location providers and no network scanner; access denied");
            ObserverSet::notify_error_to(&observer, LocationErrorCode::Denied);
        } else {
            self.activate(&providers);
        }

        if gps_off {
            warn!("GPS provider is disabled");
            ObserverSet::notify_error_to(&observer, LocationErrorCode::GpsOff);
        }
    }

    fn filtered_providers(&self) -> (Vec<String>, bool) {
        let online = self.positions.is_online();
        let mut gps_off = false;
        let mut accepted = Vec::new();

        for provider in self.positions.providers() {
            if provider.name == PASSIVE_PROVIDER {
                continue;
            }
            if !provider.enabled {
                if provider.name == GPS_PROVIDER {
                    gps_off = true;
                }
                continue;
            }
            if self.config.legacy_network_filter && provider.name == NETWORK_PROVIDER && !online {
                // Stale cached fixes stamped with the current time
                debug!("Skipping network provider while offline");
                continue;
            }
            accepted.push(provider.name);
        }

        (accepted, gps_off)
    }

    fn activate(&mut self, providers: &[String]) {
        self.state = EngineState::Active;
        info!("Location engine active ({} providers)", providers.len());

        let interval = self.config.fix_update_interval();
        for provider in providers {
            self.positions.request_updates(provider, interval);
        }
        for kind in [SensorKind::Accelerometer, SensorKind::Magnetometer] {
            if !self.sensors.register(kind, self.config.sensor_rate) {
                debug!("No {:?} sensor", kind);
            }
        }

        let candidates: Vec<Fix> = providers
            .iter()
            .filter_map(|p| self.positions.last_known_fix(p))
            .collect();
        let best = self.arbiter.bootstrap(candidates);

        match best {
            Some(fix) if self.arbiter.is_better(&fix) => {
                debug!("Bootstrapped from last-known {} fix", fix.provider());
                self.arbiter.seed(fix);
                if let Some(seeded) = self.arbiter.last_fix() {
                    self.observers.notify_location(seeded);
                }
            }
            _ if !self.arbiter.held_fix_expired() => {
                if let Some(held) = self.arbiter.last_fix() {
                    debug!("Re-announcing held {} fix", held.provider());
                    self.observers.notify_location(held);
                }
            }
            _ => self.arbiter.forget_fix(),
        }
    }

    /// Unregisters `observer`; the last one out deactivates the engine.
    pub fn detach(&mut self, observer: &ObserverHandle) {
        if !self.observers.remove(observer) {
            return;
        }
        if !self.observers.is_empty() {
            return;
        }

        if self.scanning {
            if let Some(scanner) = self.network.as_mut() {
                scanner.stop_scan();
            }
            self.scanning = false;
        }
        if self.state == EngineState::Active {
            self.positions.remove_updates();
            self.sensors.unregister_all();
        }
        self.arbiter.reset();
        self.state = EngineState::Inactive;
        info!("Location engine inactive");
    }

    /// Live fix from a subscribed provider. Returns true if it was accepted.
    pub fn on_fix(&mut self, fix: Fix) -> bool {
        if self.state != EngineState::Active {
            debug!("Ignoring {} fix while inactive", fix.provider());
            return false;
        }
        if !self.arbiter.consider_fix(fix) {
            return false;
        }
        if let Some(accepted) = self.arbiter.last_fix() {
            self.observers.notify_location(accepted);
        }
        true
    }

    /// Result of a WiFi scan; `None` when the scan produced no position.
    pub fn on_network_fix(&mut self, fix: Option<Fix>) -> bool {
        match fix {
            Some(fix) => self.on_fix(fix),
            None => false,
        }
    }

    pub fn on_sensor_sample(&mut self, sample: &SensorSample) -> Option<CompassReading> {
        if self.state != EngineState::Active {
            return None;
        }
        let reading = self.heading.on_sample(sample, self.arbiter.state())?;
        self.observers.notify_compass(&reading);
        Some(reading)
    }

    pub fn dispatch(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Fix { fix } => {
                self.on_fix(fix);
            }
            InboundEvent::NetworkFix { fix } => {
                self.on_network_fix(fix);
            }
            InboundEvent::Sample { sample } => {
                self.on_sensor_sample(&sample);
            }
        }
    }

    pub fn display_rotation(&self) -> DisplayRotation {
        self.display
            .as_ref()
            .map(|d| d.rotation())
            .unwrap_or_default()
    }

    /// Rotates compass angles for the current display orientation.
    pub fn correct_compass_angles(&self, angles: &mut [f64]) {
        correct_compass_angles(self.arbiter.state(), self.display_rotation(), angles);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::declination::FixedDeclination;
    use crate::heading::NO_HEADING;
    use crate::observer::{EngineEvent, RecordingObserver};
    use crate::sources::simulated::{
        FixedRotation, SimulatedNetworkScanner, SimulatedPositionSource, SimulatedSensors,
    };
    use approx::assert_relative_eq;
    use std::f64::consts::PI;
    use std::sync::Arc;
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;

    struct Harness {
        engine: LocationEngine,
        positions: SimulatedPositionSource,
        sensors: SimulatedSensors,
        clock: ManualClock,
    }

    fn harness_with(positions: SimulatedPositionSource, config: EngineConfig) -> Harness {
        let clock = ManualClock::wall_only(T0);
        let sensors = SimulatedSensors::full();
        let engine = LocationEngine::new(config, Box::new(positions.clone()))
            .unwrap()
            .with_time_and_declination(Box::new(clock.clone()), Box::new(FixedDeclination(10.0)))
            .with_sensors(Box::new(sensors.clone()))
            .with_display_rotation(Box::new(FixedRotation(DisplayRotation::Rotation90)));
        Harness {
            engine,
            positions,
            sensors,
            clock,
        }
    }

    fn harness() -> Harness {
        let positions = SimulatedPositionSource::new()
            .with_provider(GPS_PROVIDER, true)
            .with_provider(NETWORK_PROVIDER, true)
            .with_provider(PASSIVE_PROVIDER, true);
        harness_with(positions, EngineConfig::default())
    }

    fn gps_fix(accuracy: f64, time_ms: i64) -> Fix {
        Fix::new(GPS_PROVIDER, 48.8566, 2.3522, accuracy, time_ms, time_ms)
    }

    fn recorder() -> (Arc<RecordingObserver>, ObserverHandle) {
        let rec = Arc::new(RecordingObserver::new());
        let handle: ObserverHandle = rec.clone();
        (rec, handle)
    }

    fn feed_pair(engine: &mut LocationEngine, azimuth: f64) -> Option<CompassReading> {
        engine.on_sensor_sample(&SensorSample::accelerometer(0.0, 0.0, 9.81, 1));
        engine.on_sensor_sample(&SensorSample::magnetometer(
            -20.0 * azimuth.sin(),
            20.0 * azimuth.cos(),
            -40.0,
            2,
        ))
    }

    #[test]
    fn test_attach_activates_and_skips_passive() {
        let mut h = harness();
        let (_rec, obs) = recorder();
        h.engine.attach(obs);

        assert_eq!(h.engine.state(), EngineState::Active);
        assert_eq!(
            h.positions.subscriptions(),
            vec![GPS_PROVIDER.to_string(), NETWORK_PROVIDER.to_string()]
        );
        assert_eq!(h.sensors.registered().len(), 2);
    }

    #[test]
    fn test_no_providers_denied() {
        let positions = SimulatedPositionSource::new().with_provider(PASSIVE_PROVIDER, true);
        let mut h = harness_with(positions, EngineConfig::default());
        let (rec, obs) = recorder();
        h.engine.attach(obs);

        assert_eq!(h.engine.state(), EngineState::Inactive);
        assert_eq!(rec.errors(), vec![LocationErrorCode::Denied.code()]);
        assert!(h.sensors.registered().is_empty());
        // Still registered
        assert_eq!(h.engine.observer_count(), 1);
    }

    #[test]
    fn test_network_scanner_alone_activates() {
        let positions = SimulatedPositionSource::new();
        let scanner = SimulatedNetworkScanner::new(true);
        let mut h = harness_with(positions, EngineConfig::default());
        h.engine = h.engine.with_network_scanner(Box::new(scanner.clone()));
        let (rec, obs) = recorder();
        h.engine.attach(obs.clone());

        assert_eq!(h.engine.state(), EngineState::Active);
        assert!(scanner.is_scanning());
        assert!(rec.errors().is_empty());

        assert!(!h.engine.on_network_fix(None));
        assert!(h.engine.on_network_fix(Some(Fix::new(NETWORK_PROVIDER, 1.0, 2.0, 40.0, T0, T0))));
        assert_eq!(rec.locations().len(), 1);

        h.engine.detach(&obs);
        assert!(!scanner.is_scanning());
    }

    #[test]
    fn test_gps_off_reported_alongside_activation() {
        let positions = SimulatedPositionSource::new()
            .with_provider(GPS_PROVIDER, false)
            .with_provider(NETWORK_PROVIDER, true);
        let mut h = harness_with(positions, EngineConfig::default());
        let (rec, obs) = recorder();
        h.engine.attach(obs);

        assert_eq!(h.engine.state(), EngineState::Active);
        assert_eq!(rec.errors(), vec![LocationErrorCode::GpsOff.code()]);
        assert_eq!(h.positions.subscriptions(), vec![NETWORK_PROVIDER.to_string()]);
    }

    #[test]
    fn test_gps_off_and_denied_together() {
        let positions = SimulatedPositionSource::new().with_provider(GPS_PROVIDER, false);
        let mut h = harness_with(positions, EngineConfig::default());
        let (rec, obs) = recorder();
        h.engine.attach(obs);

        assert_eq!(
            rec.errors(),
            vec![LocationErrorCode::Denied.code(), LocationErrorCode::GpsOff.code()]
        );
    }

    #[test]
    fn test_legacy_network_filter_offline() {
        let positions = SimulatedPositionSource::new()
            .with_provider(GPS_PROVIDER, true)
            .with_provider(NETWORK_PROVIDER, true);
        positions.set_online(false);
        let config = EngineConfig {
            legacy_network_filter: true,
            ..EngineConfig::default()
        };
        let mut h = harness_with(positions, config);
        let (_rec, obs) = recorder();
        h.engine.attach(obs);

        assert_eq!(h.positions.subscriptions(), vec![GPS_PROVIDER.to_string()]);
    }

    #[test]
    fn test_bootstrap_picks_most_accurate_fresh_fix() {
        let mut h = harness();
        h.positions.set_last_known(gps_fix(20.0, T0 - 1_000));
        h.positions
            .set_last_known(Fix::new(NETWORK_PROVIDER, 48.85, 2.35, 8.0, T0 - 2_000, T0 - 2_000));
        let (rec, obs) = recorder();
        h.engine.attach(obs);

        let locations = rec.locations();
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].provider(), NETWORK_PROVIDER);
        assert_eq!(h.engine.last_known().unwrap().accuracy(), 8.0);
    }

    #[test]
    fn test_bootstrap_ignores_expired_fix() {
        let mut h = harness();
        h.positions.set_last_known(gps_fix(3.0, T0 - 400_000));
        let (rec, obs) = recorder();
        h.engine.attach(obs);

        assert!(rec.locations().is_empty());
        assert!(h.engine.last_known().is_none());
    }

    #[test]
    fn test_fix_updates_notify_all_observers() {
        let mut h = harness();
        let (a, obs_a) = recorder();
        let (b, obs_b) = recorder();
        h.engine.attach(obs_a);
        h.engine.attach(obs_b);

        assert!(h.engine.on_fix(gps_fix(5.0, T0)));
        assert!(!h.engine.on_fix(gps_fix(0.0, T0 + 1)));
        assert_eq!(a.locations().len(), 1);
        assert_eq!(b.locations().len(), 1);
    }

    #[test]
    fn test_duplicate_attach_and_unknown_detach_are_noops() {
        let mut h = harness();
        let (_a, obs_a) = recorder();
        let (_b, obs_b) = recorder();
        h.engine.attach(obs_a.clone());
        h.engine.attach(obs_a.clone());
        assert_eq!(h.engine.observer_count(), 1);

        h.engine.detach(&obs_b);
        assert_eq!(h.engine.state(), EngineState::Active);

        h.engine.detach(&obs_a);
        assert_eq!(h.engine.state(), EngineState::Inactive);
        assert!(h.positions.subscriptions().is_empty());
        assert!(h.sensors.registered().is_empty());
    }

    #[test]
    fn test_events_ignored_while_inactive() {
        let mut h = harness();
        assert!(!h.engine.on_fix(gps_fix(5.0, T0)));
        assert!(feed_pair(&mut h.engine, 0.3).is_none());
        assert!(h.engine.last_known().is_none());
    }

    #[test]
    fn test_compass_before_and_after_fix() {
        let mut h = harness();
        let (rec, obs) = recorder();
        h.engine.attach(obs);

        let before = feed_pair(&mut h.engine, 0.5).unwrap();
        assert_relative_eq!(before.magnetic_heading, 0.5, epsilon = 1e-9);
        assert_eq!(before.true_heading, NO_HEADING);

        h.engine.on_fix(gps_fix(5.0, T0));
        let after = feed_pair(&mut h.engine, 0.5).unwrap();
        assert_relative_eq!(after.true_heading, 0.5 + 10.0_f64.to_radians(), epsilon = 1e-9);

        // The very first accelerometer sample had no magnetometer partner yet
        assert_eq!(rec.compass_count(), 3);
    }

    #[test]
    fn test_driving_override_reaches_observers() {
        let mut h = harness();
        let (rec, obs) = recorder();
        h.engine.attach(obs);
        h.engine
            .on_fix(gps_fix(5.0, T0).with_speed(2.0).with_bearing(90.0));
        feed_pair(&mut h.engine, 2.5);

        let last = rec.events().into_iter().last().unwrap();
        match last {
            EngineEvent::Compass {
                magnetic_heading,
                true_heading,
                declination_offset,
                ..
            } => {
                assert_relative_eq!(magnetic_heading, PI / 2.0, epsilon = 1e-12);
                assert_relative_eq!(true_heading, PI / 2.0, epsilon = 1e-12);
                assert_eq!(declination_offset, 0.0);
            }
            other => panic!("unexpected event {:?}", other),
        }

        // No display correction while driving
        let mut angles = [PI / 2.0];
        h.engine.correct_compass_angles(&mut angles);
        assert_eq!(angles, [PI / 2.0]);
    }

    #[test]
    fn test_display_rotation_applied_without_driving() {
        let mut h = harness();
        let (_rec, obs) = recorder();
        h.engine.attach(obs);

        let mut angles = [0.25, NO_HEADING];
        h.engine.correct_compass_angles(&mut angles);
        assert_relative_eq!(angles[0], 0.25 + PI / 2.0, epsilon = 1e-12);
        assert_eq!(angles[1], NO_HEADING);
    }

    #[test]
    fn test_reattach_resets_heading_but_keeps_fix() {
        let mut h = harness();
        let (_a, obs_a) = recorder();
        h.engine.attach(obs_a.clone());
        h.engine
            .on_fix(gps_fix(5.0, T0).with_speed(3.0).with_bearing(45.0));
        assert!(h.engine.accepted_state().driving_heading().is_some());

        h.engine.detach(&obs_a);
        assert_eq!(h.engine.accepted_state().driving_heading_raw(), NO_HEADING);
        assert!(h.engine.accepted_state().declination_reference().is_none());
        assert!(h.engine.last_known().is_some());

        let (b, obs_b) = recorder();
        h.clock.advance(Duration::from_secs(30));
        h.engine.attach(obs_b);

        assert_eq!(h.engine.accepted_state().driving_heading_raw(), NO_HEADING);
        // Held fix is still fresh, so it is re-announced to the new observer
        assert_eq!(b.locations().len(), 1);
        assert_eq!(h.engine.last_known().unwrap().accuracy(), 5.0);
    }

    #[test]
    fn test_reattach_ignores_bearing_of_last_known_fix() {
        let mut h = harness();
        let (_a, obs_a) = recorder();
        h.engine.attach(obs_a.clone());
        h.engine.on_fix(gps_fix(5.0, T0));
        h.engine.detach(&obs_a);

        h.clock.advance(Duration::from_secs(60));
        h.positions
            .set_last_known(gps_fix(5.0, T0 + 1_000).with_speed(3.0).with_bearing(200.0));
        let (b, obs_b) = recorder();
        h.engine.attach(obs_b);

        // The last-known fix wins the bootstrap but its bearing is stale
        assert_eq!(b.locations().len(), 1);
        assert_eq!(h.engine.last_known().unwrap().bearing(), Some(200.0));
        assert_eq!(h.engine.accepted_state().driving_heading_raw(), NO_HEADING);

        let reading = feed_pair(&mut h.engine, 0.5).unwrap();
        assert_relative_eq!(reading.magnetic_heading, 0.5, epsilon = 1e-9);
        assert_relative_eq!(reading.declination_offset, 10.0_f64.to_radians(), epsilon = 1e-12);
    }

    #[test]
    fn test_last_gps_fix_from_provider() {
        let h = harness();
        assert!(h.engine.last_gps_fix().is_none());

        h.positions
            .set_last_known(Fix::new(NETWORK_PROVIDER, 48.85, 2.35, 30.0, T0, T0));
        assert!(h.engine.last_gps_fix().is_none());

        h.positions.set_last_known(gps_fix(7.0, T0));
        let fix = h.engine.last_gps_fix().unwrap();
        assert_eq!(fix.provider(), GPS_PROVIDER);
        assert_eq!(fix.accuracy(), 7.0);
    }

    #[test]
    fn test_reattach_forgets_expired_fix() {
        let mut h = harness();
        let (_a, obs_a) = recorder();
        h.engine.attach(obs_a.clone());
        h.engine.on_fix(gps_fix(5.0, T0));
        h.engine.detach(&obs_a);

        h.clock.advance(Duration::from_secs(301));
        let (b, obs_b) = recorder();
        h.engine.attach(obs_b);

        assert!(b.locations().is_empty());
        assert!(h.engine.last_known().is_none());
    }

    #[test]
    fn test_dispatch_routes_events() {
        let mut h = harness();
        let (rec, obs) = recorder();
        h.engine.attach(obs);

        h.engine.dispatch(InboundEvent::Fix { fix: gps_fix(6.0, T0) });
        h.engine.dispatch(InboundEvent::NetworkFix { fix: None });
        h.engine.dispatch(InboundEvent::Sample {
            sample: SensorSample::accelerometer(0.0, 0.0, 9.81, 5),
        });
        h.engine.dispatch(InboundEvent::Sample {
            sample: SensorSample::magnetometer(0.0, 20.0, -40.0, 6),
        });

        assert_eq!(rec.locations().len(), 1);
        assert_eq!(rec.compass_count(), 1);
    }
}
