use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use log::{debug, info, warn};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError, Sender};
use tokio::time::{interval, sleep_until, Duration, Instant};

use location_engine_rs::clock::{Clock, SystemClock};
use location_engine_rs::config::EngineConfig;
use location_engine_rs::engine::LocationEngine;
use location_engine_rs::heading::CompassReading;
use location_engine_rs::observer::{LoggingObserver, ObserverHandle};
use location_engine_rs::sources::simulated::{
    FixedRotation, SimulatedNetworkScanner, SimulatedPositionSource, SimulatedSensors, SimulatedTrack,
};
use location_engine_rs::types::{
    DisplayRotation, InboundEvent, GPS_PROVIDER, NETWORK_PROVIDER, PASSIVE_PROVIDER,
};

#[derive(Parser, Debug)]
#[command(name = "location_engine")]
#[command(about = "Location and compass fusion over simulated provider and sensor feeds", long_about = None)]
struct Args {
    /// Duration in seconds (0 = until Ctrl-C)
    #[arg(value_name = "SECONDS", default_value = "30")]
    duration: u64,

    /// Engine configuration (JSON); defaults are used when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Display rotation in degrees (0, 90, 180, 270)
    #[arg(long, default_value = "0")]
    rotation: u32,

    /// Simulated travel speed (m/s); below 1 m/s the compass drives the heading
    #[arg(long, default_value = "8.0")]
    speed: f64,

    /// Simulated travel bearing (degrees from north)
    #[arg(long, default_value = "90.0")]
    bearing: f64,

    /// Disable the GPS provider (the engine reports GPS_OFF)
    #[arg(long)]
    gps_off: bool,

    /// Feed WiFi scan results
    #[arg(long)]
    wifi: bool,
}

/// Pushes one event into the engine queue. Returns false once the engine is gone.
fn push(tx: &Sender<InboundEvent>, event: InboundEvent, feed: &str, count: &mut u64) -> bool {
    match tx.try_send(event) {
        Ok(_) => {
            *count += 1;
            if *count % 100 == 0 {
                debug!("[{}] {} events", feed, count);
            }
            true
        }
        Err(TrySendError::Closed(_)) => {
            debug!("[{}] Channel closed after {} events", feed, count);
            false
        }
        // Queue full, drop this one
        Err(TrySendError::Full(_)) => true,
    }
}

fn since_boot(clock: &SystemClock) -> Duration {
    Duration::from_nanos(clock.elapsed_realtime_nanos().unwrap_or(0))
}

async fn provider_loop(
    tx: Sender<InboundEvent>,
    track: SimulatedTrack,
    clock: SystemClock,
    provider: &'static str,
    period: Duration,
) {
    let mut ticker = interval(period);
    let mut count = 0u64;
    loop {
        ticker.tick().await;
        let fix = track.fix_at(provider, since_boot(&clock), clock.now_wall_ms());
        if !push(&tx, InboundEvent::Fix { fix }, provider, &mut count) {
            break;
        }
    }
}

async fn sensor_loop(tx: Sender<InboundEvent>, track: SimulatedTrack, clock: SystemClock, period: Duration) {
    // Accelerometer and magnetometer alternate, like two listeners on one looper
    let mut ticker = interval(period / 2);
    let mut count = 0u64;
    let mut magnetometer_turn = false;
    loop {
        ticker.tick().await;
        let elapsed = since_boot(&clock);
        let sample = if magnetometer_turn {
            track.magnetometer(elapsed)
        } else {
            track.accelerometer(elapsed)
        };
        magnetometer_turn = !magnetometer_turn;
        if !push(&tx, InboundEvent::Sample { sample }, "sensors", &mut count) {
            break;
        }
    }
}

async fn wifi_loop(tx: Sender<InboundEvent>, track: SimulatedTrack, clock: SystemClock) {
    let mut ticker = interval(Duration::from_secs(5));
    let mut count = 0u64;
    let mut scans = 0u64;
    loop {
        ticker.tick().await;
        scans += 1;
        // Every third scan sees no known access points
        let fix = (scans % 3 != 0).then(|| {
            track.fix_at(NETWORK_PROVIDER, since_boot(&clock), clock.now_wall_ms())
        });
        if !push(&tx, InboundEvent::NetworkFix { fix }, "wifi", &mut count) {
            break;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let Some(rotation) = DisplayRotation::from_degrees(args.rotation) else {
        bail!("Rotation must be 0, 90, 180 or 270, got {}", args.rotation);
    };
    let config = match args.config.as_ref() {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    info!("Location engine starting");
    info!("  Duration: {} seconds (0=continuous)", args.duration);
    info!("  Speed: {:.1} m/s, bearing {:.0}°", args.speed, args.bearing);
    info!("  Rotation: {:?}", rotation);

    let clock = SystemClock::new();
    let track = SimulatedTrack {
        speed_mps: args.speed,
        bearing_deg: args.bearing,
        ..SimulatedTrack::default()
    };

    let positions = SimulatedPositionSource::new()
        .with_provider(GPS_PROVIDER, !args.gps_off)
        .with_provider(NETWORK_PROVIDER, true)
        .with_provider(PASSIVE_PROVIDER, true);
    // Network provider remembers a rough position from a minute ago
    positions.set_last_known(track.fix_at(NETWORK_PROVIDER, Duration::ZERO, clock.now_wall_ms() - 60_000));

    let fix_period = config.fix_update_interval().max(Duration::from_millis(100));
    let sensor_period = config.sensor_rate.period().max(Duration::from_millis(20));

    let mut engine = LocationEngine::new(config, Box::new(positions))?
        .with_clock(Box::new(clock))
        .with_sensors(Box::new(SimulatedSensors::full()))
        .with_display_rotation(Box::new(FixedRotation(rotation)));
    if args.wifi {
        engine = engine.with_network_scanner(Box::new(SimulatedNetworkScanner::new(true)));
    }

    // Single-writer queue: every feed pushes here, only this task touches the engine
    let (tx, mut rx) = mpsc::channel::<InboundEvent>(500);
    let mut handles = Vec::new();
    if !args.gps_off {
        handles.push(tokio::spawn(provider_loop(tx.clone(), track, clock, GPS_PROVIDER, fix_period)));
    }
    handles.push(tokio::spawn(provider_loop(
        tx.clone(),
        track,
        clock,
        NETWORK_PROVIDER,
        fix_period * 4,
    )));
    handles.push(tokio::spawn(sensor_loop(tx.clone(), track, clock, sensor_period)));
    if args.wifi {
        handles.push(tokio::spawn(wifi_loop(tx.clone(), track, clock)));
    }
    drop(tx);

    let observer: ObserverHandle = Arc::new(LoggingObserver);
    engine.attach(observer.clone());

    let deadline = (args.duration > 0).then(|| Instant::now() + Duration::from_secs(args.duration));
    let mut status = interval(Duration::from_secs(5));
    let mut fixes = 0u64;
    let mut accepted = 0u64;
    let mut samples = 0u64;
    let mut last_compass: Option<CompassReading> = None;
    let started = Utc::now();

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else {
                    warn!("All feeds stopped");
                    break;
                };
                match event {
                    InboundEvent::Sample { sample } => {
                        samples += 1;
                        if let Some(reading) = engine.on_sensor_sample(&sample) {
                            last_compass = Some(reading);
                        }
                    }
                    InboundEvent::Fix { fix } => {
                        fixes += 1;
                        accepted += engine.on_fix(fix) as u64;
                    }
                    InboundEvent::NetworkFix { fix } => {
                        fixes += fix.is_some() as u64;
                        accepted += engine.on_network_fix(fix) as u64;
                    }
                }
            }
            _ = status.tick() => {
                if let Some(reading) = last_compass {
                    let mut angles = [reading.magnetic_heading, reading.true_heading];
                    engine.correct_compass_angles(&mut angles);
                    info!(
                        "[status] fixes {}/{} accepted, {} samples, display heading {:.1}° (true {})",
                        accepted,
                        fixes,
                        samples,
                        angles[0].to_degrees(),
                        if angles[1] < 0.0 { "n/a".to_string() } else { format!("{:.1}°", angles[1].to_degrees()) }
                    );
                }
            }
            _ = wait_until(deadline) => {
                info!("Duration reached, stopping...");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping...");
                break;
            }
        }
    }

    engine.detach(&observer);
    for handle in handles {
        handle.abort();
    }

    let last = engine.last_known();
    let summary = json!({
        "runtime_s": Utc::now().signed_duration_since(started).num_milliseconds() as f64 / 1000.0,
        "fixes_offered": fixes,
        "fixes_accepted": accepted,
        "sensor_samples": samples,
        "last_fix": last,
        "last_compass": last_compass,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
