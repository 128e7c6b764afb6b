//! Engine configuration
//!
//! Every field has a default, so a config file only needs the values it
//! changes. Durations are plain integers with their unit in the field name.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_TTL_SECS;
use crate::error::{MihrabError, Result};
use crate::heading::DEFAULT_SAMPLE_INTERVAL;
use crate::location::LocationConfig;
use crate::provider::{CalculationMethod, School, DEFAULT_ALADHAN_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::types::Coordinate;

/// Settings shared by the prayer and qibla engines
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MihrabConfig {
    /// Calculation convention sent to the provider
    pub method: CalculationMethod,
    /// Asr school sent to the provider
    pub school: School,
    /// IANA zone name forwarded to the provider
    pub timezone: Option<String>,
    /// Provider API root
    pub provider_url: String,
    pub request_timeout_ms: u64,
    pub cache_ttl_secs: i64,
    pub tick_period_ms: u64,
    pub magnetometer_interval_ms: u64,
    /// Qibla reference point
    pub destination: Coordinate,
    pub location: LocationConfig,
}

impl Default for MihrabConfig {
    fn default() -> Self {
        Self {
            method: CalculationMethod::default(),
            school: School::default(),
            timezone: None,
            provider_url: DEFAULT_ALADHAN_URL.to_string(),
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            tick_period_ms: 1000,
            magnetometer_interval_ms: DEFAULT_SAMPLE_INTERVAL.as_millis() as u64,
            destination: Coordinate::KAABA,
            location: LocationConfig::default(),
        }
    }
}

impl MihrabConfig {
    /// Parse and validate a JSON config
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MihrabConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MihrabError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_json(&contents)
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Reject values the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(MihrabError::Config("request_timeout_ms must be positive".into()));
        }
        if self.cache_ttl_secs < 0 {
            return Err(MihrabError::Config("cache_ttl_secs must not be negative".into()));
        }
        if self.tick_period_ms == 0 {
            return Err(MihrabError::Config("tick_period_ms must be positive".into()));
        }
        if self.magnetometer_interval_ms == 0 {
            return Err(MihrabError::Config(
                "magnetometer_interval_ms must be positive".into(),
            ));
        }
        if self.location.attempts.is_empty() {
            return Err(MihrabError::Config(
                "location.attempts must list at least one attempt".into(),
            ));
        }
        Coordinate::new(self.destination.latitude, self.destination.longitude)?;
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cache_ttl_secs)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn magnetometer_interval(&self) -> Duration {
        Duration::from_millis(self.magnetometer_interval_ms)
    }
}
