//! Device location acquisition
//!
//! [`GeoLocationSource`] asks for permission, tries the last known fix, then
//! walks an ordered list of `(accuracy, timeout)` attempts. A persistent failure
//! is reported as [`MihrabError::LocationUnavailable`] once the list runs out.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{MihrabError, Result};
use crate::types::Coordinate;

/// Accuracy hint passed to the platform location service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    Lowest,
    Low,
    Balanced,
    High,
    Highest,
}

/// Outcome of a permission request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

/// Parameters for one current-position query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixRequest {
    pub accuracy: Accuracy,
    pub timeout: Duration,
    /// Oldest platform-cached fix the service may return
    pub maximum_age: Duration,
}

/// One step of the fallback sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub accuracy: Accuracy,
    pub timeout_ms: u64,
}

/// Fallback sequence for location fixes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub attempts: Vec<FixAttempt>,
    pub maximum_age_ms: u64,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            attempts: vec![
                FixAttempt {
                    accuracy: Accuracy::Balanced,
                    timeout_ms: 3_000,
                },
                FixAttempt {
                    accuracy: Accuracy::Balanced,
                    timeout_ms: 8_000,
                },
            ],
            maximum_age_ms: 5 * 60 * 1000,
        }
    }
}

/// Platform location service.
///
/// Both position queries fail with [`MihrabError::PermissionDenied`] when
/// authorization was not granted.
pub trait LocationService: Send + Sync {
    fn request_permission(&self) -> impl Future<Output = Result<PermissionStatus>> + Send;

    /// Non-blocking cached fix, if the platform has one
    fn last_known_position(&self) -> impl Future<Output = Result<Option<Coordinate>>> + Send;

    /// Fresh fix, bounded by the request's timeout
    fn current_position(&self, request: FixRequest)
        -> impl Future<Output = Result<Coordinate>> + Send;
}

/// Location service that always reports one coordinate
#[derive(Debug, Clone, Copy)]
pub struct FixedLocation(pub Coordinate);

impl LocationService for FixedLocation {
    async fn request_permission(&self) -> Result<PermissionStatus> {
        Ok(PermissionStatus::Granted)
    }

    async fn last_known_position(&self) -> Result<Option<Coordinate>> {
        Ok(Some(self.0))
    }

    async fn current_position(&self, _request: FixRequest) -> Result<Coordinate> {
        Ok(self.0)
    }
}

/// Race a future against a cancellation token
pub(crate) async fn until_cancelled<F: Future>(
    token: &CancellationToken,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(MihrabError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Graduated-fallback location acquisition
pub struct GeoLocationSource<L> {
    service: Arc<L>,
    config: LocationConfig,
}

impl<L: LocationService> GeoLocationSource<L> {
    pub fn new(service: Arc<L>, config: LocationConfig) -> Self {
        Self { service, config }
    }

    /// Obtain one coordinate, or fail with a terminal error.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Coordinate> {
        match until_cancelled(cancel, self.service.request_permission()).await?? {
            PermissionStatus::Granted => {}
            PermissionStatus::Denied => {
                warn!("Location permission denied");
                return Err(MihrabError::PermissionDenied);
            }
        }

        match until_cancelled(cancel, self.service.last_known_position()).await? {
            Ok(Some(coordinate)) => {
                debug!(%coordinate, "Using last known position");
                return Ok(coordinate);
            }
            Ok(None) => debug!("No last known position"),
            Err(MihrabError::PermissionDenied) => return Err(MihrabError::PermissionDenied),
            Err(e) => warn!(error = %e, "Last known position query failed"),
        }

        let maximum_age = Duration::from_millis(self.config.maximum_age_ms);
        for (index, attempt) in self.config.attempts.iter().enumerate() {
            let request = FixRequest {
                accuracy: attempt.accuracy,
                timeout: Duration::from_millis(attempt.timeout_ms),
                maximum_age,
            };

            let bounded = tokio::time::timeout(
                request.timeout,
                self.service.current_position(request),
            );
            match until_cancelled(cancel, bounded).await? {
                Ok(Ok(coordinate)) => {
                    info!(%coordinate, attempt = index + 1, "Location fix obtained");
                    return Ok(coordinate);
                }
                Ok(Err(MihrabError::PermissionDenied)) => {
                    return Err(MihrabError::PermissionDenied)
                }
                Ok(Err(e)) => {
                    warn!(attempt = index + 1, error = %e, "Location attempt failed")
                }
                Err(_) => warn!(
                    attempt = index + 1,
                    timeout_ms = attempt.timeout_ms,
                    "Location attempt timed out"
                ),
            }
        }

        Err(MihrabError::LocationUnavailable)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted location service for tests
    pub(crate) struct ScriptedLocation {
        pub permission: PermissionStatus,
        pub last_known: Option<Coordinate>,
        /// Outcomes per current-position call; `None` hangs past any timeout
        pub fixes: Mutex<VecDeque<Option<Result<Coordinate>>>>,
        pub requests: Mutex<Vec<FixRequest>>,
    }

    impl ScriptedLocation {
        pub(crate) fn new(
            permission: PermissionStatus,
            last_known: Option<Coordinate>,
            fixes: Vec<Option<Result<Coordinate>>>,
        ) -> Self {
            Self {
                permission,
                last_known,
                fixes: Mutex::new(fixes.into()),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl LocationService for ScriptedLocation {
        async fn request_permission(&self) -> Result<PermissionStatus> {
            Ok(self.permission)
        }

        async fn last_known_position(&self) -> Result<Option<Coordinate>> {
            Ok(self.last_known)
        }

        async fn current_position(&self, request: FixRequest) -> Result<Coordinate> {
            self.requests.lock().unwrap().push(request);
            let next = self.fixes.lock().unwrap().pop_front();
            match next {
                Some(Some(outcome)) => outcome,
                Some(None) => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(MihrabError::LocationUnavailable)
                }
                None => Err(MihrabError::LocationUnavailable),
            }
        }
    }

    fn london() -> Coordinate {
        Coordinate::new(51.5074, -0.1278).unwrap()
    }

    #[tokio::test]
    async fn test_last_known_short_circuits() {
        let service = Arc::new(ScriptedLocation::new(
            PermissionStatus::Granted,
            Some(london()),
            vec![],
        ));
        let source = GeoLocationSource::new(service.clone(), LocationConfig::default());
        let coord = source.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(coord, london());
        assert!(service.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permission_denied_is_terminal() {
        let service = Arc::new(ScriptedLocation::new(
            PermissionStatus::Denied,
            Some(london()),
            vec![],
        ));
        let source = GeoLocationSource::new(service.clone(), LocationConfig::default());
        let err = source.acquire(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MihrabError::PermissionDenied));
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_longer_attempt_after_timeout() {
        let service = Arc::new(ScriptedLocation::new(
            PermissionStatus::Granted,
            None,
            vec![None, Some(Ok(london()))],
        ));
        let source = GeoLocationSource::new(service.clone(), LocationConfig::default());
        let coord = source.acquire(&CancellationToken::new()).await.unwrap();
        assert_eq!(coord, london());

        let requests = service.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].timeout, Duration::from_secs(3));
        assert_eq!(requests[1].timeout, Duration::from_secs(8));
        assert_eq!(requests[1].maximum_age, Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_attempts_report_unavailable() {
        let service = Arc::new(ScriptedLocation::new(
            PermissionStatus::Granted,
            None,
            vec![Some(Err(MihrabError::LocationUnavailable)), None],
        ));
        let source = GeoLocationSource::new(service.clone(), LocationConfig::default());
        let err = source.acquire(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MihrabError::LocationUnavailable));
        assert_eq!(service.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_denied_during_attempt_stops_sequence() {
        let service = Arc::new(ScriptedLocation::new(
            PermissionStatus::Granted,
            None,
            vec![Some(Err(MihrabError::PermissionDenied)), Some(Ok(london()))],
        ));
        let source = GeoLocationSource::new(service.clone(), LocationConfig::default());
        let err = source.acquire(&CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MihrabError::PermissionDenied));
        assert_eq!(service.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_fix() {
        let service = Arc::new(ScriptedLocation::new(
            PermissionStatus::Granted,
            Some(london()),
            vec![],
        ));
        let source = GeoLocationSource::new(service, LocationConfig::default());
        let token = CancellationToken::new();
        token.cancel();
        let err = source.acquire(&token).await.unwrap_err();
        assert!(matches!(err, MihrabError::Cancelled));
    }
}
