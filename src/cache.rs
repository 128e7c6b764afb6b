//! Prayer schedule cache
//!
//! Entries are keyed by a coarsened coordinate (3 decimal places, roughly
//! 100 m) plus the local calendar date, and expire after a TTL. Storage
//! failures never reach the caller: reads degrade to a miss and writes are
//! dropped, both with a warning.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::KeyValueStore;
use crate::types::{Coordinate, PrayerSchedule};

/// Namespace prefix for cache keys in the shared store
pub const CACHE_KEY_PREFIX: &str = "prayer_cache_";

/// Default cache time-to-live (30 minutes)
pub const DEFAULT_CACHE_TTL_SECS: i64 = 30 * 60;

/// One persisted schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fetched_at: DateTime<Utc>,
    pub date: NaiveDate,
    pub schedule: PrayerSchedule,
}

/// Store key for a coordinate and local date
pub fn cache_key(coordinate: Coordinate, date: NaiveDate) -> String {
    let lat_key = (coordinate.latitude * 1000.0).round() as i64;
    let lon_key = (coordinate.longitude * 1000.0).round() as i64;
    format!(
        "{}{}_{}_{}",
        CACHE_KEY_PREFIX,
        lat_key,
        lon_key,
        date.format("%Y-%m-%d")
    )
}

/// TTL-bounded, day-scoped schedule cache over a [`KeyValueStore`]
pub struct ScheduleCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ScheduleCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh schedule for this coordinate and date, if any
    pub fn lookup(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
        now: DateTime<Utc>,
    ) -> Option<PrayerSchedule> {
        let key = cache_key(coordinate, date);

        let raw = match self.store.get(&key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(%key, "Schedule cache miss");
                return None;
            }
            Err(e) => {
                warn!(%key, error = %e, "Schedule cache read failed");
                return None;
            }
        };

        let entry: CacheEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(%key, error = %e, "Ignoring unreadable schedule cache entry");
                return None;
            }
        };

        if entry.date != date {
            debug!(%key, entry_date = %entry.date, "Schedule cache entry is for another day");
            return None;
        }

        let age = now - entry.fetched_at;
        if age >= self.ttl {
            debug!(%key, age_secs = age.num_seconds(), "Schedule cache entry expired");
            return None;
        }

        debug!(%key, age_secs = age.num_seconds(), "Schedule cache hit");
        Some(entry.schedule)
    }

    /// Persist a freshly fetched schedule. Failures are logged and dropped.
    pub fn store(
        &self,
        coordinate: Coordinate,
        date: NaiveDate,
        schedule: PrayerSchedule,
        now: DateTime<Utc>,
    ) {
        let key = cache_key(coordinate, date);
        let entry = CacheEntry {
            fetched_at: now,
            date,
            schedule,
        };

        let raw = match serde_json::to_string(&entry) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%key, error = %e, "Failed to encode schedule cache entry");
                return;
            }
        };

        match self.store.set(&key, raw) {
            Ok(()) => debug!(%key, "Schedule cached"),
            Err(e) => warn!(%key, error = %e, "Schedule cache write failed"),
        }
    }
}
