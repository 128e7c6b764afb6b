//! Live countdown to the next prayer
//!
//! [`CountdownTicker`] owns at most one repeating tick task. Retargeting cancels
//! the running task before the replacement is spawned, so ticks for two
//! different targets are never pending at once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::clock::Clock;

/// Default tick period
pub const DEFAULT_TICK_PERIOD: Duration = Duration::from_secs(1);

/// Render a remaining duration as zero-padded `HH:MM:SS`.
///
/// Negative durations render as `00:00:00`. Hours are not capped at 24.
pub fn format_countdown(remaining: chrono::Duration) -> String {
    format_countdown_secs(remaining.num_seconds())
}

/// Same as [`format_countdown`] for a whole number of seconds
pub fn format_countdown_secs(secs: i64) -> String {
    let s = secs.max(0);
    format!("{:02}:{:02}:{:02}", s / 3600, (s % 3600) / 60, s % 60)
}

/// One published countdown value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Countdown {
    pub target: Option<DateTime<Utc>>,
    pub remaining_secs: i64,
    pub text: String,
    /// Set once the target instant has been reached; the ticker stops afterwards
    pub elapsed: bool,
}

impl Default for Countdown {
    fn default() -> Self {
        Self {
            target: None,
            remaining_secs: 0,
            text: format_countdown_secs(0),
            elapsed: false,
        }
    }
}

enum TickerState {
    Idle,
    Running {
        target: DateTime<Utc>,
        token: CancellationToken,
    },
}

/// Repeating one-second countdown with a replaceable target
pub struct CountdownTicker {
    clock: Arc<dyn Clock>,
    period: Duration,
    state: TickerState,
    tx: Arc<watch::Sender<Countdown>>,
}

impl CountdownTicker {
    pub fn new(clock: Arc<dyn Clock>, period: Duration) -> Self {
        let (tx, _rx) = watch::channel(Countdown::default());
        Self {
            clock,
            period,
            state: TickerState::Idle,
            tx: Arc::new(tx),
        }
    }

    /// Receive every published countdown value
    pub fn subscribe(&self) -> watch::Receiver<Countdown> {
        self.tx.subscribe()
    }

    /// Current target, if running
    pub fn target(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            TickerState::Idle => None,
            TickerState::Running { target, .. } => Some(*target),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, TickerState::Running { .. })
    }

    /// Start counting down to `target`, replacing any running countdown.
    ///
    /// Must be called from within a tokio runtime. The tick task is tied to a
    /// child of `parent`, so cancelling the owner stops it too.
    pub fn set_target(&mut self, target: DateTime<Utc>, parent: &CancellationToken) {
        if let TickerState::Running {
            target: current,
            token,
        } = &self.state
        {
            if *current == target && !token.is_cancelled() {
                return;
            }
        }
        self.stop();

        let token = parent.child_token();
        debug!(%target, "Countdown target set");
        tokio::spawn(tick_loop(
            Arc::clone(&self.clock),
            self.period,
            target,
            token.clone(),
            Arc::clone(&self.tx),
        ));
        self.state = TickerState::Running { target, token };
    }

    /// Cancel the running tick task, if any
    pub fn stop(&mut self) {
        if let TickerState::Running { token, .. } =
            std::mem::replace(&mut self.state, TickerState::Idle)
        {
            token.cancel();
        }
    }
}

impl Drop for CountdownTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn tick_loop(
    clock: Arc<dyn Clock>,
    period: Duration,
    target: DateTime<Utc>,
    token: CancellationToken,
    tx: Arc<watch::Sender<Countdown>>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => return,
            _ = interval.tick() => {}
        }

        let remaining = target - clock.now().with_timezone(&Utc);
        let remaining_secs = remaining.num_seconds().max(0);
        tx.send_replace(Countdown {
            target: Some(target),
            remaining_secs,
            text: format_countdown_secs(remaining_secs),
            elapsed: false,
        });
        trace!(remaining_secs, "Countdown tick");

        if remaining_secs == 0 {
            // Hold 00:00:00 until the target itself, then report it elapsed
            if let Ok(left) = remaining.to_std() {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(left) => {}
                }
            }
            if token.is_cancelled() {
                return;
            }
            tx.send_replace(Countdown {
                target: Some(target),
                remaining_secs: 0,
                text: format_countdown_secs(0),
                elapsed: true,
            });
            debug!(%target, "Countdown elapsed");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::tests_support::PausedClock;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_countdown() {
        assert_eq!(format_countdown_secs(0), "00:00:00");
        assert_eq!(format_countdown_secs(59), "00:00:59");
        assert_eq!(format_countdown_secs(3661), "01:01:01");
        assert_eq!(format_countdown_secs(-5), "00:00:00");
        assert_eq!(format_countdown_secs(100 * 3600), "100:00:00");
        assert_eq!(format_countdown(chrono::Duration::milliseconds(1999)), "00:00:01");
        assert_eq!(format_countdown(chrono::Duration::seconds(-3600)), "00:00:00");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_down_and_elapses() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 12, 0, 0));
        let target = clock.now().with_timezone(&Utc) + chrono::Duration::seconds(3);
        let owner = CancellationToken::new();

        let mut ticker = CountdownTicker::new(clock.clone(), DEFAULT_TICK_PERIOD);
        let mut rx = ticker.subscribe();
        ticker.set_target(target, &owner);

        let mut seen = Vec::new();
        loop {
            rx.changed().await.unwrap();
            let value = rx.borrow_and_update().clone();
            assert!(value.remaining_secs >= 0);
            seen.push(value.text.clone());
            if value.elapsed {
                break;
            }
        }

        assert_eq!(seen.first().map(String::as_str), Some("00:00:03"));
        assert_eq!(seen.last().map(String::as_str), Some("00:00:00"));
        assert!(seen.contains(&"00:00:01".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retarget_cancels_previous() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 12, 0, 0));
        let now = clock.now().with_timezone(&Utc);
        let owner = CancellationToken::new();

        let mut ticker = CountdownTicker::new(clock.clone(), DEFAULT_TICK_PERIOD);
        let mut rx = ticker.subscribe();

        ticker.set_target(now + chrono::Duration::seconds(2), &owner);
        ticker.set_target(now + chrono::Duration::hours(1), &owner);
        assert_eq!(ticker.target(), Some(now + chrono::Duration::hours(1)));

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(1)).await;
            tokio::task::yield_now().await;
        }

        rx.changed().await.unwrap();
        let value = rx.borrow().clone();
        assert_eq!(value.target, Some(now + chrono::Duration::hours(1)));
        assert!(!value.elapsed);
        assert!(value.remaining_secs > 3000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_to_idle() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 12, 0, 0));
        let owner = CancellationToken::new();
        let mut ticker = CountdownTicker::new(clock.clone(), DEFAULT_TICK_PERIOD);

        ticker.set_target(clock.now().with_timezone(&Utc), &owner);
        assert!(ticker.is_running());
        ticker.stop();
        assert!(!ticker.is_running());
        assert_eq!(ticker.target(), None);
        // stopping twice is harmless
        ticker.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancel_stops_ticks() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 12, 0, 0));
        let owner = CancellationToken::new();
        let mut ticker = CountdownTicker::new(clock.clone(), DEFAULT_TICK_PERIOD);
        let mut rx = ticker.subscribe();

        ticker.set_target(
            clock.now().with_timezone(&Utc) + chrono::Duration::minutes(10),
            &owner,
        );
        rx.changed().await.unwrap();
        rx.borrow_and_update();

        owner.cancel();
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::task::yield_now().await;
        assert!(!rx.has_changed().unwrap_or(false));
    }
}
