//! Compass heading from the magnetometer
//!
//! Each sample is converted with `atan2(y, x)` and replaces the previous
//! heading outright. There is no smoothing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bearing::normalize_degrees;

/// Default magnetometer sampling interval
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Raw magnetic-field vector (device axes, microtesla)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MagneticSample {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
}

/// Heading in [0, 360) from the horizontal field components
pub fn heading_from_field(x: f64, y: f64) -> f64 {
    normalize_degrees(y.atan2(x).to_degrees())
}

/// Platform magnetometer.
///
/// Delivery stops when the returned receiver is dropped. Platforms without a
/// magnetometer return a receiver that never yields a sample.
pub trait OrientationSensor: Send + Sync {
    fn samples(&self, interval: Duration) -> mpsc::Receiver<MagneticSample>;
}

/// Sensor for platforms with no magnetometer
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSensor;

impl OrientationSensor for NoSensor {
    fn samples(&self, _interval: Duration) -> mpsc::Receiver<MagneticSample> {
        let (_tx, rx) = mpsc::channel(1);
        rx
    }
}

/// Sensor fed by the embedding platform, one [`PushSensor::push`] per reading
#[derive(Debug, Default)]
pub struct PushSensor {
    tx: Mutex<Option<mpsc::Sender<MagneticSample>>>,
}

impl PushSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a reading to the active subscriber.
    ///
    /// Returns `false` when nobody is listening or the buffer is full.
    pub fn push(&self, sample: MagneticSample) -> bool {
        let guard = match self.tx.lock() {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        match guard.as_ref() {
            Some(tx) => tx.try_send(sample).is_ok(),
            None => false,
        }
    }
}

impl OrientationSensor for PushSensor {
    fn samples(&self, _interval: Duration) -> mpsc::Receiver<MagneticSample> {
        let (tx, rx) = mpsc::channel(64);
        if let Ok(mut guard) = self.tx.lock() {
            *guard = Some(tx);
        }
        rx
    }
}

/// Subscription manager turning sensor samples into a heading stream
pub struct HeadingSource {
    sensor: Arc<dyn OrientationSensor>,
    subscription: Option<CancellationToken>,
}

impl HeadingSource {
    pub fn new(sensor: Arc<dyn OrientationSensor>) -> Self {
        Self {
            sensor,
            subscription: None,
        }
    }

    /// Start receiving headings. Replaces any existing subscription.
    ///
    /// The receiver holds `None` until the first sample arrives, which may be
    /// never on platforms without a magnetometer.
    pub fn subscribe(
        &mut self,
        interval: Duration,
        parent: &CancellationToken,
    ) -> watch::Receiver<Option<f64>> {
        self.unsubscribe();

        let token = parent.child_token();
        let (tx, rx) = watch::channel(None);
        let mut samples = self.sensor.samples(interval);
        let task_token = token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = task_token.cancelled() => break,
                    sample = samples.recv() => match sample {
                        Some(sample) => {
                            if task_token.is_cancelled() {
                                break;
                            }
                            tx.send_replace(Some(heading_from_field(sample.x, sample.y)));
                        }
                        None => {
                            debug!("Orientation sensor stream ended");
                            break;
                        }
                    }
                }
            }
        });

        self.subscription = Some(token);
        rx
    }

    /// Stop the subscription. Safe to call at any time, any number of times.
    pub fn unsubscribe(&mut self) {
        if let Some(token) = self.subscription.take() {
            token.cancel();
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_some()
    }
}

impl Drop for HeadingSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
