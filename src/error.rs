//! Error types for Mihrab

use thiserror::Error;

/// Errors that can occur while resolving prayer times or the qibla direction
#[derive(Debug, Error)]
pub enum MihrabError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Unable to obtain location")]
    LocationUnavailable,

    #[error("Prayer times request timed out")]
    RequestTimedOut,

    #[error("Failed to fetch prayer times: {0}")]
    Provider(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Invalid time of day: {0}")]
    InvalidTime(String),

    #[error("Invalid prayer schedule: {0}")]
    InvalidSchedule(String),

    #[error("Invalid coordinate: latitude {latitude}, longitude {longitude}")]
    InvalidCoordinate { latitude: f64, longitude: f64 },

    #[error("Invalid angle: {0}")]
    InvalidAngle(String),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl MihrabError {
    /// Remediation text shown next to the error message.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            MihrabError::PermissionDenied => {
                Some("Allow location access for this app in system settings")
            }
            MihrabError::LocationUnavailable => Some("Enable GPS and try again"),
            MihrabError::RequestTimedOut => Some("Check your internet connection and try again"),
            MihrabError::Provider(_) => Some("Check your internet connection and try again"),
            _ => None,
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, MihrabError>;
