//! Observer registry and the stock observers.
//!
//! Delivery is synchronous and isolated per observer: a panic in one
//! callback is logged and the remaining observers still get the event.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use crate::heading::CompassReading;
use crate::types::{Fix, LocationErrorCode};

/// Receives engine output. Calls arrive on the engine's thread, one at a time.
pub trait LocationObserver: Send + Sync {
    fn on_location_updated(&self, fix: &Fix);

    /// Angles in radians; `true_heading` and `declination_offset` are -1 when unknown.
    fn on_compass_updated(
        &self,
        time_nanos: i64,
        magnetic_heading: f64,
        true_heading: f64,
        declination_offset: f64,
    );

    fn on_location_error(&self, code: LocationErrorCode);
}

pub type ObserverHandle = Arc<dyn LocationObserver>;

fn same_observer(a: &ObserverHandle, b: &ObserverHandle) -> bool {
    // Compare data pointers only; vtables may differ across codegen units
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

/// Registered observers in attach order. Membership is by `Arc` identity.
#[derive(Default)]
pub struct ObserverSet {
    observers: Vec<ObserverHandle>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if `observer` was already registered.
    pub fn add(&mut self, observer: ObserverHandle) -> bool {
        if self.contains(&observer) {
            return false;
        }
        self.observers.push(observer);
        true
    }

    /// Returns false if `observer` was not registered.
    pub fn remove(&mut self, observer: &ObserverHandle) -> bool {
        let before = self.observers.len();
        self.observers.retain(|o| !same_observer(o, observer));
        self.observers.len() != before
    }

    pub fn contains(&self, observer: &ObserverHandle) -> bool {
        self.observers.iter().any(|o| same_observer(o, observer))
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub fn notify_location(&self, fix: &Fix) {
        for observer in &self.observers {
            deliver("on_location_updated", || observer.on_location_updated(fix));
        }
    }

    pub fn notify_compass(&self, reading: &CompassReading) {
        for observer in &self.observers {
            deliver("on_compass_updated", || {
                observer.on_compass_updated(
                    reading.time_nanos,
                    reading.magnetic_heading,
                    reading.true_heading,
                    reading.declination_offset,
                )
            });
        }
    }

    /// Errors go to a single observer, the one whose attach triggered them.
    pub fn notify_error_to(observer: &ObserverHandle, code: LocationErrorCode) {
        deliver("on_location_error", || observer.on_location_error(code));
    }
}

/// A panicking observer must not take the engine or the other observers down.
fn deliver(callback: &str, f: impl FnOnce()) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!("Observer panicked in {}; continuing", callback);
    }
}

/// Serializable form of one observer callback.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Location {
        fix: Fix,
    },
    Compass {
        time_nanos: i64,
        magnetic_heading: f64,
        true_heading: f64,
        declination_offset: f64,
    },
    Error {
        code: i32,
    },
}

/// Keeps every callback it receives, in order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: EngineEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn locations(&self) -> Vec<Fix> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Location { fix } => Some(fix),
                _ => None,
            })
            .collect()
    }

    pub fn compass_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, EngineEvent::Compass { .. }))
            .count()
    }

    pub fn errors(&self) -> Vec<i32> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Error { code } => Some(code),
                _ => None,
            })
            .collect()
    }
}

impl LocationObserver for RecordingObserver {
    fn on_location_updated(&self, fix: &Fix) {
        self.push(EngineEvent::Location { fix: fix.clone() });
    }

    fn on_compass_updated(
        &self,
        time_nanos: i64,
        magnetic_heading: f64,
        true_heading: f64,
        declination_offset: f64,
    ) {
        self.push(EngineEvent::Compass {
            time_nanos,
            magnetic_heading,
            true_heading,
            declination_offset,
        });
    }

    fn on_location_error(&self, code: LocationErrorCode) {
        self.push(EngineEvent::Error { code: code.code() });
    }
}

/// Prints locations and errors at info; compass updates are too chatty for that.
pub struct LoggingObserver;

impl LocationObserver for LoggingObserver {
    fn on_location_updated(&self, fix: &Fix) {
        info!(
            "[location] {} ({:.6}, {:.6}) ±{:.1}m speed={:.1}m/s",
            fix.provider(),
            fix.latitude(),
            fix.longitude(),
            fix.accuracy(),
            fix.speed()
        );
    }

    fn on_compass_updated(
        &self,
        _time_nanos: i64,
        magnetic_heading: f64,
        true_heading: f64,
        _declination_offset: f64,
    ) {
        debug!(
            "[compass] magnetic={:.1}° true={}",
            magnetic_heading.to_degrees(),
            if true_heading < 0.0 {
                "n/a".to_string()
            } else {
                format!("{:.1}°", true_heading.to_degrees())
            }
        );
    }

    fn on_location_error(&self, code: LocationErrorCode) {
        warn!("[location] error {:?} ({})", code, code.code());
    }
}
