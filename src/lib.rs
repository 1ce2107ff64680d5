//! Location and heading fusion.
//!
//! Raw positioning fixes go through [`arbiter::FixArbiter`], which keeps the
//! best fix by an accuracy-decay rule. Accelerometer/magnetometer samples go
//! through [`heading::HeadingEstimator`], which turns them into magnetic and
//! true compass headings. [`engine::LocationEngine`] owns both, drives the
//! platform sources and fans results out to registered observers.

pub mod arbiter;
pub mod clock;
pub mod config;
pub mod declination;
pub mod engine;
pub mod error;
pub mod heading;
pub mod observer;
pub mod orientation;
pub mod replay;
pub mod sources;
pub mod types;

pub use arbiter::{AcceptedState, FixArbiter};
pub use config::EngineConfig;
pub use engine::{EngineState, LocationEngine};
pub use error::{EngineError, EngineResult};
pub use heading::{CompassReading, HeadingEstimator, NO_HEADING};
pub use observer::{LocationObserver, ObserverHandle};
pub use types::{Fix, InboundEvent, LocationErrorCode, SensorSample};
