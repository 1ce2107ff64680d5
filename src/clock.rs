//! Time sources for fix arbitration.
//!
//! Two clocks matter: the wall clock (used when comparing fixes across
//! providers and for receipt stamps) and the monotonic "elapsed since boot"
//! clock that fixes may carry. The monotonic one is optional because older
//! platforms cannot report it.

use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub trait Clock {
    /// Wall-clock milliseconds since the Unix epoch.
    fn now_wall_ms(&self) -> i64;

    /// Monotonic nanoseconds on the same base as `Fix::elapsed_realtime_nanos`.
    fn elapsed_realtime_nanos(&self) -> Option<u64>;
}

#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    boot: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { boot: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_wall_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }

    fn elapsed_realtime_nanos(&self) -> Option<u64> {
        Some(self.boot.elapsed().as_nanos() as u64)
    }
}

#[derive(Clone, Copy, Debug)]
struct ManualTime {
    wall_ms: i64,
    elapsed_nanos: Option<u64>,
}

/// Hand-driven clock shared between a test (or replay) and the engine.
#[derive(Clone, Debug)]
pub struct ManualClock {
    time: Arc<Mutex<ManualTime>>,
}

impl ManualClock {
    pub fn new(wall_ms: i64, elapsed_nanos: Option<u64>) -> Self {
        Self {
            time: Arc::new(Mutex::new(ManualTime { wall_ms, elapsed_nanos })),
        }
    }

    /// Clock without a monotonic source, like pre-17 API devices.
    pub fn wall_only(wall_ms: i64) -> Self {
        Self::new(wall_ms, None)
    }

    pub fn set_wall_ms(&self, wall_ms: i64) {
        if let Ok(mut time) = self.time.lock() {
            time.wall_ms = wall_ms;
        }
    }

    pub fn set_elapsed_nanos(&self, nanos: Option<u64>) {
        if let Ok(mut time) = self.time.lock() {
            time.elapsed_nanos = nanos;
        }
    }

    /// Moves both clocks forward.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut time) = self.time.lock() {
            time.wall_ms += by.as_millis() as i64;
            time.elapsed_nanos = time.elapsed_nanos.map(|n| n + by.as_nanos() as u64);
        }
    }
}

impl Clock for ManualClock {
    fn now_wall_ms(&self) -> i64 {
        self.time.lock().map(|t| t.wall_ms).unwrap_or(0)
    }

    fn elapsed_realtime_nanos(&self) -> Option<u64> {
        self.time.lock().ok().and_then(|t| t.elapsed_nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1_000, Some(5_000_000));
        let shared = clock.clone();
        clock.advance(Duration::from_millis(250));

        assert_eq!(shared.now_wall_ms(), 1_250);
        assert_eq!(shared.elapsed_realtime_nanos(), Some(255_000_000));
    }

    #[test]
    fn test_wall_only_clock() {
        let clock = ManualClock::wall_only(10);
        clock.advance(Duration::from_secs(1));
        assert_eq!(clock.now_wall_ms(), 1_010);
        assert_eq!(clock.elapsed_realtime_nanos(), None);
    }

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let a = clock.elapsed_realtime_nanos().unwrap();
        let b = clock.elapsed_realtime_nanos().unwrap();
        assert!(b >= a);
        assert!(clock.now_wall_ms() > 1_577_836_800_000);
    }
}
