//! Mihrab - Prayer time scheduling and qibla direction engine
//!
//! Mihrab drives the two live views of a prayer companion app:
//!
//! - **Prayer path**: location fix → schedule cache → provider fetch →
//!   next-prayer resolution → one-second countdown.
//! - **Qibla path**: location fix → great-circle bearing and distance to the
//!   Kaaba → rotation against the live compass heading.
//!
//! Platform services (location, magnetometer, key-value storage, clock) are
//! injected through traits, so the same engines run on device, in the CLI and
//! under paused-time tests.

pub mod bearing;
pub mod cache;
pub mod clock;
pub mod config;
pub mod countdown;
pub mod error;
pub mod heading;
pub mod location;
pub mod prayer;
pub mod provider;
pub mod qibla;
pub mod resolver;
pub mod store;
pub mod types;

// FFI bindings for C interop (always available for cdylib/staticlib builds)
pub mod ffi;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::MihrabConfig;
pub use error::{MihrabError, Result};
pub use heading::{NoSensor, OrientationSensor, PushSensor};
pub use location::{FixedLocation, GeoLocationSource, LocationService};
pub use prayer::PrayerEngine;
pub use provider::{AladhanProvider, CalculationMethod, PrayerTimeProvider, School};
pub use qibla::QiblaEngine;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};

// Data model exports
pub use types::{
    Coordinate, NextPrayer, Prayer, PrayerSchedule, PrayerSnapshot, QiblaReading, QiblaSnapshot,
};

/// Library version reported by the CLI and FFI
pub const MIHRAB_VERSION: &str = env!("CARGO_PKG_VERSION");
