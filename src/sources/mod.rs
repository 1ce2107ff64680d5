//! Platform seams: positioning providers, WiFi scanning, motion sensors and
//! display rotation. The engine only talks to these traits; `simulated`
//! provides in-process implementations for the binaries and tests.

pub mod simulated;

use std::time::Duration;

use crate::config::SensorRate;
use crate::types::{DisplayRotation, Fix, SensorKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderStatus {
    pub name: String,
    pub enabled: bool,
}

impl ProviderStatus {
    pub fn new(name: &str, enabled: bool) -> Self {
        Self {
            name: name.to_string(),
            enabled,
        }
    }
}

pub trait PositionSource {
    /// Every provider the platform knows about, enabled or not.
    fn providers(&self) -> Vec<ProviderStatus>;

    fn last_known_fix(&self, provider: &str) -> Option<Fix>;

    /// Start periodic fixes from `provider`; they arrive via `LocationEngine::on_fix`.
    fn request_updates(&mut self, provider: &str, min_interval: Duration);

    /// Stop every subscription started with `request_updates`.
    fn remove_updates(&mut self);

    /// Network connectivity, consulted by the legacy network-provider filter.
    fn is_online(&self) -> bool {
        true
    }
}

/// WiFi-based positioning. Results arrive via `LocationEngine::on_network_fix`.
pub trait NetworkScanSource {
    /// False when scanning is unavailable on this device.
    fn start_scan(&mut self) -> bool;
    fn stop_scan(&mut self);
}

pub trait SensorSource {
    /// False when the device lacks this sensor.
    fn register(&mut self, kind: SensorKind, rate: SensorRate) -> bool;
    fn unregister_all(&mut self);
}

pub trait DisplayRotationSource {
    fn rotation(&self) -> DisplayRotation;
}

/// Device without accelerometer or magnetometer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoSensors;

impl SensorSource for NoSensors {
    fn register(&mut self, _kind: SensorKind, _rate: SensorRate) -> bool {
        false
    }

    fn unregister_all(&mut self) {}
}
