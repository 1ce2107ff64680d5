//! Offline replay of recorded inbound events.
//!
//! A log is JSON (optionally gzip-compressed, `.gz`) holding the provider
//! table at start, any last-known fixes, and the timestamped event stream.
//! Time is driven by a `ManualClock` so results do not depend on when the
//! replay runs.

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use crate::clock::ManualClock;
use crate::config::EngineConfig;
use crate::declination::DeclinationModel;
use crate::engine::LocationEngine;
use crate::error::{EngineError, EngineResult};
use crate::observer::{EngineEvent, ObserverHandle, RecordingObserver};
use crate::sources::simulated::{
    FixedRotation, SimulatedNetworkScanner, SimulatedPositionSource, SimulatedSensors,
};
use crate::types::{DisplayRotation, Fix, InboundEvent};

fn enabled_by_default() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayProvider {
    pub name: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReplayRecord {
    /// Host wall clock when the event was queued.
    pub at_ms: i64,
    /// Host monotonic clock, if it was recorded.
    #[serde(default)]
    pub elapsed_nanos: Option<u64>,
    pub event: InboundEvent,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplayLog {
    #[serde(default)]
    pub providers: Vec<ReplayProvider>,
    #[serde(default)]
    pub last_known: Vec<Fix>,
    #[serde(default)]
    pub network_scanner: bool,
    pub records: Vec<ReplayRecord>,
}

impl ReplayLog {
    pub fn from_reader(reader: impl Read) -> EngineResult<Self> {
        Ok(serde_json::from_reader(BufReader::new(reader))?)
    }
}

pub fn load_log(path: &Path) -> EngineResult<ReplayLog> {
    let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        ReplayLog::from_reader(GzDecoder::new(file))
    } else {
        ReplayLog::from_reader(file)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub records: usize,
    pub fixes_offered: usize,
    pub fixes_accepted: usize,
    pub compass_updates: usize,
    pub errors: Vec<i32>,
    pub final_fix: Option<Fix>,
    /// Last emitted true heading in degrees, when one was known.
    pub final_true_heading_deg: Option<f64>,
}

pub struct ReplayOutcome {
    pub summary: ReplaySummary,
    pub events: Vec<EngineEvent>,
}

/// Runs `log` through a fresh engine with one recording observer attached.
pub fn run(
    log: &ReplayLog,
    config: EngineConfig,
    rotation: DisplayRotation,
    declination: Box<dyn DeclinationModel>,
) -> EngineResult<ReplayOutcome> {
    let start_ms = log.records.first().map(|r| r.at_ms).unwrap_or(0);
    let start_nanos = log.records.first().and_then(|r| r.elapsed_nanos);
    let clock = ManualClock::new(start_ms, start_nanos);

    let positions = SimulatedPositionSource::new();
    for provider in &log.providers {
        positions.set_provider(&provider.name, provider.enabled);
    }
    for fix in &log.last_known {
        positions.set_last_known(fix.clone());
    }

    let mut engine = LocationEngine::new(config, Box::new(positions))?
        .with_time_and_declination(Box::new(clock.clone()), declination)
        .with_sensors(Box::new(SimulatedSensors::full()))
        .with_display_rotation(Box::new(FixedRotation(rotation)));
    if log.network_scanner {
        engine = engine.with_network_scanner(Box::new(SimulatedNetworkScanner::new(true)));
    }

    let recorder = Arc::new(RecordingObserver::new());
    let handle: ObserverHandle = recorder.clone();
    engine.attach(handle.clone());

    let mut summary = ReplaySummary {
        records: log.records.len(),
        ..ReplaySummary::default()
    };

    for record in &log.records {
        clock.set_wall_ms(record.at_ms);
        if record.elapsed_nanos.is_some() {
            clock.set_elapsed_nanos(record.elapsed_nanos);
        }

        match &record.event {
            InboundEvent::Fix { fix } => {
                summary.fixes_offered += 1;
                if engine.on_fix(fix.clone()) {
                    summary.fixes_accepted += 1;
                }
            }
            InboundEvent::NetworkFix { fix } => {
                if fix.is_some() {
                    summary.fixes_offered += 1;
                }
                if engine.on_network_fix(fix.clone()) {
                    summary.fixes_accepted += 1;
                }
            }
            InboundEvent::Sample { sample } => {
                engine.on_sensor_sample(sample);
            }
        }
    }

    let events = recorder.events();
    summary.compass_updates = recorder.compass_count();
    summary.errors = recorder.errors();
    summary.final_fix = engine.last_known().cloned();
    summary.final_true_heading_deg = events.iter().rev().find_map(|e| match e {
        EngineEvent::Compass { true_heading, .. } if *true_heading >= 0.0 => {
            Some(true_heading.to_degrees())
        }
        _ => None,
    });

    engine.detach(&handle);
    Ok(ReplayOutcome { summary, events })
}
