//! Core types for the Mihrab engine
//!
//! This module defines the values that flow between components: coordinates,
//! the day-scoped prayer schedule, the next-prayer pointer, the qibla reading,
//! and the snapshots published to UI consumers.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::bearing;
use crate::error::{MihrabError, Result};

/// Geographic position in decimal degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    /// Location of the Kaaba, the qibla reference point
    pub const KAABA: Coordinate = Coordinate {
        latitude: 21.422487,
        longitude: 39.826206,
    };

    /// Create a coordinate, rejecting non-finite or out-of-range values
    pub fn new(latitude: f64, longitude: f64) -> Result<Self> {
        let valid = latitude.is_finite()
            && longitude.is_finite()
            && (-90.0..=90.0).contains(&latitude)
            && (-180.0..=180.0).contains(&longitude);
        if !valid {
            return Err(MihrabError::InvalidCoordinate {
                latitude,
                longitude,
            });
        }
        Ok(Self {
            latitude,
            longitude,
        })
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

/// The six named times of a daily schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Prayer {
    Fajr,
    Sunrise,
    Dhuhr,
    Asr,
    Maghrib,
    Isha,
}

impl Prayer {
    /// All six entries in schedule order
    pub const ALL: [Prayer; 6] = [
        Prayer::Fajr,
        Prayer::Sunrise,
        Prayer::Dhuhr,
        Prayer::Asr,
        Prayer::Maghrib,
        Prayer::Isha,
    ];

    /// The five prayers that can be "next" (Sunrise is informational only)
    pub const ORDINAL: [Prayer; 5] = [
        Prayer::Fajr,
        Prayer::Dhuhr,
        Prayer::Asr,
        Prayer::Maghrib,
        Prayer::Isha,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Prayer::Fajr => "Fajr",
            Prayer::Sunrise => "Sunrise",
            Prayer::Dhuhr => "Dhuhr",
            Prayer::Asr => "Asr",
            Prayer::Maghrib => "Maghrib",
            Prayer::Isha => "Isha",
        }
    }

    fn index(&self) -> usize {
        match self {
            Prayer::Fajr => 0,
            Prayer::Sunrise => 1,
            Prayer::Dhuhr => 2,
            Prayer::Asr => 3,
            Prayer::Maghrib => 4,
            Prayer::Isha => 5,
        }
    }
}

impl fmt::Display for Prayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parse a provider wall-clock string such as `"05:12"` or `"05:12 (+01)"`.
///
/// Anything after the first whitespace is a timezone annotation and is dropped.
pub fn parse_wall_clock(raw: &str) -> Result<NaiveTime> {
    let token = raw
        .split_whitespace()
        .next()
        .ok_or_else(|| MihrabError::InvalidTime(raw.to_string()))?;
    NaiveTime::parse_from_str(token, "%H:%M").map_err(|_| MihrabError::InvalidTime(raw.to_string()))
}

/// Wire shape of a schedule: `{"Fajr": "05:00", ...}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawTimings {
    fajr: String,
    sunrise: String,
    dhuhr: String,
    asr: String,
    maghrib: String,
    isha: String,
}

/// One calendar day's prayer times as local wall-clock values.
///
/// Times are strictly increasing in [`Prayer::ALL`] order, except that Isha may
/// fall after midnight (earlier than Fajr) at high latitudes. The schedule
/// carries no date; callers keep track of the day it was fetched for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawTimings", into = "RawTimings")]
pub struct PrayerSchedule {
    times: [NaiveTime; 6],
}

impl PrayerSchedule {
    /// Build a schedule from parsed times in [`Prayer::ALL`] order
    pub fn new(times: [NaiveTime; 6]) -> Result<Self> {
        let out_of_order = |a: Prayer, b: Prayer| {
            MihrabError::InvalidSchedule(format!(
                "{} ({}) is not before {} ({})",
                a,
                times[a.index()].format("%H:%M"),
                b,
                times[b.index()].format("%H:%M")
            ))
        };
        for pair in Prayer::ALL[..5].windows(2) {
            if times[pair[0].index()] >= times[pair[1].index()] {
                return Err(out_of_order(pair[0], pair[1]));
            }
        }
        // Isha either follows Maghrib the same evening or wraps past midnight
        let isha = times[Prayer::Isha.index()];
        if isha <= times[Prayer::Maghrib.index()] && isha >= times[Prayer::Fajr.index()] {
            return Err(out_of_order(Prayer::Maghrib, Prayer::Isha));
        }
        Ok(Self { times })
    }

    /// Whether Isha falls after midnight, in the early hours of the next day
    pub fn isha_after_midnight(&self) -> bool {
        self.time_of(Prayer::Isha) < self.time_of(Prayer::Maghrib)
    }

    /// Build a schedule from six `HH:MM` strings in [`Prayer::ALL`] order
    pub fn from_strings(raw: [&str; 6]) -> Result<Self> {
        let [fajr, sunrise, dhuhr, asr, maghrib, isha] = raw;
        Self::new([
            parse_wall_clock(fajr)?,
            parse_wall_clock(sunrise)?,
            parse_wall_clock(dhuhr)?,
            parse_wall_clock(asr)?,
            parse_wall_clock(maghrib)?,
            parse_wall_clock(isha)?,
        ])
    }

    /// Parse the `{"Fajr": "05:00", ...}` JSON form
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wall-clock time for a prayer
    pub fn time_of(&self, prayer: Prayer) -> NaiveTime {
        self.times[prayer.index()]
    }

    /// Iterate `(prayer, time)` pairs in schedule order
    pub fn iter(&self) -> impl Iterator<Item = (Prayer, NaiveTime)> + '_ {
        Prayer::ALL.iter().map(move |p| (*p, self.time_of(*p)))
    }
}

impl TryFrom<RawTimings> for PrayerSchedule {
    type Error = MihrabError;

    fn try_from(raw: RawTimings) -> Result<Self> {
        Self::from_strings([
            &raw.fajr,
            &raw.sunrise,
            &raw.dhuhr,
            &raw.asr,
            &raw.maghrib,
            &raw.isha,
        ])
    }
}

impl From<PrayerSchedule> for RawTimings {
    fn from(schedule: PrayerSchedule) -> Self {
        let fmt = |p: Prayer| schedule.time_of(p).format("%H:%M").to_string();
        RawTimings {
            fajr: fmt(Prayer::Fajr),
            sunrise: fmt(Prayer::Sunrise),
            dhuhr: fmt(Prayer::Dhuhr),
            asr: fmt(Prayer::Asr),
            maghrib: fmt(Prayer::Maghrib),
            isha: fmt(Prayer::Isha),
        }
    }
}

impl FromStr for PrayerSchedule {
    type Err = MihrabError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_json(s)
    }
}

/// Which prayer comes next and when
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextPrayer {
    pub prayer: Prayer,
    pub at: DateTime<Utc>,
    /// Set when the target is tomorrow's Fajr approximated from today's time
    pub rolled_over: bool,
}

/// Static bearing/distance plus the live heading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QiblaReading {
    /// Device heading in [0, 360), unset until the first sensor sample
    pub heading_degrees: Option<f64>,
    /// Bearing to the destination in [0, 360)
    pub bearing_degrees: f64,
    pub distance_km: f64,
}

impl QiblaReading {
    /// Shortest signed rotation from heading to bearing, in [-180, 180]
    pub fn rotation_degrees(&self) -> Option<f64> {
        self.heading_degrees
            .map(|heading| bearing::shortest_rotation(heading, self.bearing_degrees))
    }
}

/// Observable state of the prayer-times path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrayerSnapshot {
    pub loading: bool,
    pub error: Option<String>,
    pub hint: Option<String>,
    /// Local calendar day the schedule belongs to
    pub date: Option<NaiveDate>,
    pub schedule: Option<PrayerSchedule>,
    pub next_prayer: Option<NextPrayer>,
    pub countdown: String,
}

impl Default for PrayerSnapshot {
    fn default() -> Self {
        Self {
            loading: true,
            error: None,
            hint: None,
            date: None,
            schedule: None,
            next_prayer: None,
            countdown: "00:00:00".to_string(),
        }
    }
}

impl PrayerSnapshot {
    /// Key of the next prayer, if a schedule is loaded
    pub fn next_key(&self) -> Option<Prayer> {
        self.next_prayer.map(|n| n.prayer)
    }
}

/// Observable state of the qibla path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QiblaSnapshot {
    pub loading: bool,
    pub error: Option<String>,
    pub hint: Option<String>,
    pub coordinate: Option<Coordinate>,
    pub heading_degrees: Option<f64>,
    pub bearing_degrees: Option<f64>,
    pub distance_km: Option<f64>,
    pub rotation_degrees: Option<f64>,
}

impl Default for QiblaSnapshot {
    fn default() -> Self {
        Self {
            loading: true,
            error: None,
            hint: None,
            coordinate: None,
            heading_degrees: None,
            bearing_degrees: None,
            distance_km: None,
            rotation_degrees: None,
        }
    }
}

impl QiblaSnapshot {
    /// Fold a reading into the snapshot, deriving the rotation
    pub fn apply_reading(&mut self, reading: &QiblaReading) {
        self.heading_degrees = reading.heading_degrees;
        self.bearing_degrees = Some(reading.bearing_degrees);
        self.distance_km = Some(reading.distance_km);
        self.rotation_degrees = reading.rotation_degrees();
    }
}
