//! AlAdhan provider
//!
//! Fetches one day's timings from the public AlAdhan API
//! (`/v1/timings/{DD-MM-YYYY}`) and maps them to a [`PrayerSchedule`].

use serde::Deserialize;
use tracing::{debug, warn};

use super::{FetchRequest, PrayerTimeProvider};
use crate::error::{MihrabError, Result};
use crate::types::PrayerSchedule;

/// Public AlAdhan API root
pub const DEFAULT_ALADHAN_URL: &str = "https://api.aladhan.com";

#[derive(Debug, Deserialize)]
struct AladhanResponse {
    data: Option<AladhanData>,
}

#[derive(Debug, Deserialize)]
struct AladhanData {
    timings: Option<AladhanTimings>,
}

/// Only the six entries we display; AlAdhan also sends Imsak, Sunset, Midnight, ...
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AladhanTimings {
    fajr: String,
    sunrise: String,
    dhuhr: String,
    asr: String,
    maghrib: String,
    isha: String,
}

/// HTTP client for the AlAdhan timings endpoint
#[derive(Clone)]
pub struct AladhanProvider {
    http: reqwest::Client,
    base_url: String,
}

impl AladhanProvider {
    /// Create a provider against `base_url` (normally [`DEFAULT_ALADHAN_URL`])
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("mihrab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| MihrabError::Provider(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn build_request(&self, request: &FetchRequest) -> Result<reqwest::Request> {
        let url = format!(
            "{}/v1/timings/{}",
            self.base_url,
            request.date.format("%d-%m-%Y")
        );

        let mut query = vec![
            ("latitude", request.coordinate.latitude.to_string()),
            ("longitude", request.coordinate.longitude.to_string()),
            ("method", request.method.id().to_string()),
            ("school", request.school.id().to_string()),
        ];
        if let Some(tz) = &request.timezone {
            query.push(("timezonestring", tz.clone()));
        }

        self.http
            .get(url)
            .query(&query)
            .timeout(request.timeout)
            .build()
            .map_err(|e| MihrabError::Provider(format!("Invalid request: {e}")))
    }

    async fn send(&self, request: &FetchRequest) -> Result<PrayerSchedule> {
        let http_request = self.build_request(request)?;
        let url = http_request.url().clone();

        let response = self.http.execute(http_request).await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            warn!(%url, %status, "Prayer times request rejected");
            return Err(MihrabError::Provider(format!("HTTP {}", status.as_u16())));
        }

        let body = response.bytes().await.map_err(map_reqwest_error)?;
        debug!(%url, bytes = body.len(), "Prayer times response received");
        parse_timings(&body)
    }
}

impl PrayerTimeProvider for AladhanProvider {
    async fn fetch(&self, request: &FetchRequest) -> Result<PrayerSchedule> {
        match tokio::time::timeout(request.timeout, self.send(request)).await {
            Ok(result) => result,
            Err(_) => Err(MihrabError::RequestTimedOut),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> MihrabError {
    if e.is_timeout() {
        MihrabError::RequestTimedOut
    } else {
        MihrabError::Provider(format!("Request failed: {e}"))
    }
}

/// Extract the six timings from an AlAdhan response body
fn parse_timings(body: &[u8]) -> Result<PrayerSchedule> {
    let invalid = || MihrabError::Provider("Invalid response from prayer times service".to_string());

    let response: AladhanResponse = serde_json::from_slice(body).map_err(|_| invalid())?;
    let t = response.data.and_then(|d| d.timings).ok_or_else(invalid)?;

    PrayerSchedule::from_strings([&t.fajr, &t.sunrise, &t.dhuhr, &t.asr, &t.maghrib, &t.isha])
        .map_err(|e| MihrabError::Provider(format!("Invalid timings: {e}")))
}
