//! Qibla direction engine
//!
//! Combines one location fix with the live compass heading. Bearing and
//! distance are computed once per activation; only the rotation changes with
//! each heading sample.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::bearing;
use crate::config::MihrabConfig;
use crate::error::MihrabError;
use crate::heading::{HeadingSource, OrientationSensor};
use crate::location::{GeoLocationSource, LocationService};
use crate::types::{Coordinate, QiblaSnapshot};

/// Owner of the qibla activation
pub struct QiblaEngine<L> {
    location: Arc<GeoLocationSource<L>>,
    sensor: Arc<dyn OrientationSensor>,
    destination: Coordinate,
    sample_interval: Duration,
    tx: Arc<watch::Sender<QiblaSnapshot>>,
    activation: Option<CancellationToken>,
}

impl<L: LocationService + 'static> QiblaEngine<L> {
    pub fn new(location: Arc<L>, sensor: Arc<dyn OrientationSensor>, config: &MihrabConfig) -> Self {
        let (tx, _rx) = watch::channel(QiblaSnapshot::default());
        Self {
            location: Arc::new(GeoLocationSource::new(location, config.location.clone())),
            sensor,
            destination: config.destination,
            sample_interval: config.magnetometer_interval(),
            tx: Arc::new(tx),
            activation: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<QiblaSnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> QiblaSnapshot {
        self.tx.borrow().clone()
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_some()
    }

    /// Start an activation if none is running. Requires a tokio runtime.
    pub fn activate(&mut self) {
        if self.activation.is_some() {
            return;
        }
        let token = CancellationToken::new();
        let span = info_span!("qibla_activation", id = %Uuid::new_v4());
        tokio::spawn(
            run(
                Arc::clone(&self.location),
                Arc::clone(&self.sensor),
                self.destination,
                self.sample_interval,
                Arc::clone(&self.tx),
                token.clone(),
            )
            .instrument(span),
        );
        self.activation = Some(token);
    }

    pub fn refresh(&mut self) {
        self.deactivate();
        self.activate();
    }

    /// Cancel the fix request and the heading subscription
    pub fn deactivate(&mut self) {
        if let Some(token) = self.activation.take() {
            token.cancel();
        }
    }
}

impl<L> Drop for QiblaEngine<L> {
    fn drop(&mut self) {
        if let Some(token) = self.activation.take() {
            token.cancel();
        }
    }
}

fn publish(
    tx: &watch::Sender<QiblaSnapshot>,
    token: &CancellationToken,
    update: impl FnOnce(&mut QiblaSnapshot),
) -> bool {
    if token.is_cancelled() {
        return false;
    }
    tx.send_modify(update);
    true
}

async fn run<L: LocationService>(
    location: Arc<GeoLocationSource<L>>,
    sensor: Arc<dyn OrientationSensor>,
    destination: Coordinate,
    sample_interval: Duration,
    tx: Arc<watch::Sender<QiblaSnapshot>>,
    token: CancellationToken,
) {
    publish(&tx, &token, |s| *s = QiblaSnapshot::default());

    let coordinate = match location.acquire(&token).await {
        Ok(coordinate) => coordinate,
        Err(MihrabError::Cancelled) => return,
        Err(e) => {
            warn!(error = %e, "Qibla activation failed");
            publish(&tx, &token, |s| {
                s.loading = false;
                s.error = Some(e.to_string());
                s.hint = e.hint().map(str::to_string);
            });
            return;
        }
    };

    let mut reading = bearing::reading_between(coordinate, destination);
    info!(
        %coordinate,
        bearing = reading.bearing_degrees,
        distance_km = reading.distance_km,
        "Qibla bearing computed"
    );
    if !publish(&tx, &token, |s| {
        s.loading = false;
        s.coordinate = Some(coordinate);
        s.apply_reading(&reading);
    }) {
        return;
    }

    let mut heading = HeadingSource::new(sensor);
    let mut headings = heading.subscribe(sample_interval, &token);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            changed = headings.changed() => {
                if changed.is_err() {
                    debug!("Heading stream closed, keeping static bearing");
                    break;
                }
            }
        }

        let Some(degrees) = *headings.borrow_and_update() else {
            continue;
        };
        reading.heading_degrees = Some(degrees);
        if !publish(&tx, &token, |s| s.apply_reading(&reading)) {
            break;
        }
    }

    heading.unsubscribe();
}
