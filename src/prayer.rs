//! Prayer times engine
//!
//! One activation runs the whole prayer path: location fix, cache lookup,
//! provider fetch on a miss, cache write, next-prayer resolution and the live
//! countdown. State is published as [`PrayerSnapshot`] values on a watch
//! channel. Every publish checks the activation token first, so a response
//! that lands after teardown is dropped.

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, Utc};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::cache::ScheduleCache;
use crate::clock::Clock;
use crate::config::MihrabConfig;
use crate::countdown::CountdownTicker;
use crate::error::{MihrabError, Result};
use crate::location::{until_cancelled, GeoLocationSource, LocationService};
use crate::provider::{FetchRequest, PrayerTimeProvider};
use crate::resolver;
use crate::store::KeyValueStore;
use crate::types::{Coordinate, PrayerSchedule, PrayerSnapshot};

struct Inner<L, P> {
    location: GeoLocationSource<L>,
    provider: Arc<P>,
    cache: ScheduleCache,
    clock: Arc<dyn Clock>,
    config: MihrabConfig,
}

/// Owner of the prayer-times activation
pub struct PrayerEngine<L, P> {
    inner: Arc<Inner<L, P>>,
    tx: Arc<watch::Sender<PrayerSnapshot>>,
    activation: Option<CancellationToken>,
}

impl<L, P> PrayerEngine<L, P>
where
    L: LocationService + 'static,
    P: PrayerTimeProvider + 'static,
{
    pub fn new(
        location: Arc<L>,
        provider: Arc<P>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        config: MihrabConfig,
    ) -> Self {
        let (tx, _rx) = watch::channel(PrayerSnapshot::default());
        let inner = Inner {
            location: GeoLocationSource::new(location, config.location.clone()),
            provider,
            cache: ScheduleCache::new(store, config.cache_ttl()),
            clock,
            config,
        };
        Self {
            inner: Arc::new(inner),
            tx: Arc::new(tx),
            activation: None,
        }
    }

    /// Watch every snapshot change
    pub fn subscribe(&self) -> watch::Receiver<PrayerSnapshot> {
        self.tx.subscribe()
    }

    /// Latest published state
    pub fn snapshot(&self) -> PrayerSnapshot {
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
        let span = info_span!("prayer_activation", id = %Uuid::new_v4());
        tokio::spawn(
            run(Arc::clone(&self.inner), Arc::clone(&self.tx), token.clone()).instrument(span),
        );
        self.activation = Some(token);
    }

    /// Tear down the current activation and start over with a new fix
    pub fn refresh(&mut self) {
        self.deactivate();
        self.activate();
    }

    /// Cancel the location request, fetch and countdown of this activation
    pub fn deactivate(&mut self) {
        if let Some(token) = self.activation.take() {
            token.cancel();
        }
    }
}

impl<L, P> Drop for PrayerEngine<L, P> {
    fn drop(&mut self) {
        if let Some(token) = self.activation.take() {
            token.cancel();
        }
    }
}

/// Apply a snapshot change unless the activation has been torn down
fn publish(
    tx: &watch::Sender<PrayerSnapshot>,
    token: &CancellationToken,
    update: impl FnOnce(&mut PrayerSnapshot),
) -> bool {
    if token.is_cancelled() {
        return false;
    }
    tx.send_modify(update);
    true
}

fn publish_failure(tx: &watch::Sender<PrayerSnapshot>, token: &CancellationToken, e: &MihrabError) {
    warn!(error = %e, "Prayer times activation failed");
    publish(tx, token, |s| {
        s.loading = false;
        s.error = Some(e.to_string());
        s.hint = e.hint().map(str::to_string);
        s.schedule = None;
        s.date = None;
        s.next_prayer = None;
    });
}

/// Cached schedule for today, or a fresh one from the provider
async fn load_schedule<L, P>(
    inner: &Inner<L, P>,
    coordinate: Coordinate,
    token: &CancellationToken,
) -> Result<(NaiveDate, PrayerSchedule)>
where
    L: LocationService,
    P: PrayerTimeProvider,
{
    let now = inner.clock.now();
    let date = now.date_naive();

    if let Some(schedule) = inner.cache.lookup(coordinate, date, now.with_timezone(&Utc)) {
        info!(%date, "Prayer schedule loaded from cache");
        return Ok((date, schedule));
    }

    let request = FetchRequest {
        coordinate,
        date,
        method: inner.config.method,
        school: inner.config.school,
        timezone: inner.config.timezone.clone(),
        timeout: inner.config.request_timeout(),
    };
    let schedule = until_cancelled(token, inner.provider.fetch(&request)).await??;
    info!(%date, method = %request.method, school = %request.school, "Prayer schedule fetched");

    inner
        .cache
        .store(coordinate, date, schedule, inner.clock.now().with_timezone(&Utc));
    Ok((date, schedule))
}

async fn run<L, P>(
    inner: Arc<Inner<L, P>>,
    tx: Arc<watch::Sender<PrayerSnapshot>>,
    token: CancellationToken,
) where
    L: LocationService,
    P: PrayerTimeProvider,
{
    publish(&tx, &token, |s| *s = PrayerSnapshot::default());

    let coordinate = match inner.location.acquire(&token).await {
        Ok(coordinate) => coordinate,
        Err(MihrabError::Cancelled) => return,
        Err(e) => return publish_failure(&tx, &token, &e),
    };

    let (mut date, mut schedule) = match load_schedule(&inner, coordinate, &token).await {
        Ok(loaded) => loaded,
        Err(MihrabError::Cancelled) => return,
        Err(e) => return publish_failure(&tx, &token, &e),
    };
    publish(&tx, &token, |s| {
        s.loading = false;
        s.error = None;
        s.hint = None;
        s.date = Some(date);
        s.schedule = Some(schedule);
    });

    let mut ticker = CountdownTicker::new(Arc::clone(&inner.clock), inner.config.tick_period());
    let mut countdown = ticker.subscribe();
    // Target that just elapsed; resolution must land strictly after it
    let mut elapsed_target: Option<DateTime<Utc>> = None;
    // Day whose refresh already failed; wait for the next zero-crossing instead
    let mut refresh_failed_for: Option<NaiveDate> = None;

    loop {
        let today = inner.clock.now().date_naive();
        if today > date {
            match load_schedule(&inner, coordinate, &token).await {
                Ok((new_date, new_schedule)) => {
                    info!(%new_date, "Schedule replaced after day rollover");
                    date = new_date;
                    schedule = new_schedule;
                    refresh_failed_for = None;
                    publish(&tx, &token, |s| {
                        s.date = Some(date);
                        s.schedule = Some(schedule);
                    });
                }
                Err(MihrabError::Cancelled) => return,
                Err(e) => {
                    warn!(error = %e, %today, "Rollover refresh failed, keeping previous schedule");
                    refresh_failed_for = Some(today);
                }
            }
        }

        let now = match elapsed_target {
            Some(target) if target > inner.clock.now().with_timezone(&Utc) => {
                target.with_timezone(&Local)
            }
            _ => inner.clock.now(),
        };
        let next = resolver::resolve(&schedule, &now);
        debug!(prayer = %next.prayer, at = %next.at, rolled_over = next.rolled_over, "Next prayer");
        if !publish(&tx, &token, |s| s.next_prayer = Some(next)) {
            return;
        }
        ticker.set_target(next.at, &token);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                changed = countdown.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }

            let value = countdown.borrow_and_update().clone();
            if value.target != Some(next.at) {
                continue;
            }
            if !publish(&tx, &token, |s| s.countdown = value.text.clone()) {
                return;
            }
            if value.elapsed {
                elapsed_target = Some(next.at);
                // Keep 00:00:00 on screen for one tick before moving on
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(inner.config.tick_period()) => {}
                }
                break;
            }

            let today = inner.clock.now().date_naive();
            if today > date && refresh_failed_for != Some(today) {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::tests_support::PausedClock;
    use crate::location::tests::ScriptedLocation;
    use crate::location::PermissionStatus;
    use crate::store::MemoryStore;
    use crate::types::Prayer;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::time::Duration;

    enum Behaviour {
        Succeed,
        Fail,
        Hang,
    }

    struct FakeProvider {
        schedule: PrayerSchedule,
        behaviour: Behaviour,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl FakeProvider {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                schedule: schedule(),
                behaviour,
                requests: Mutex::new(Vec::new()),
            }
        }

        fn dates(&self) -> Vec<NaiveDate> {
            self.requests.lock().unwrap().iter().map(|r| r.date).collect()
        }
    }

    impl PrayerTimeProvider for FakeProvider {
        async fn fetch(&self, request: &FetchRequest) -> Result<PrayerSchedule> {
            self.requests.lock().unwrap().push(request.clone());
            match self.behaviour {
                Behaviour::Succeed => Ok(self.schedule),
                Behaviour::Fail => Err(MihrabError::Provider("HTTP 500".to_string())),
                Behaviour::Hang => {
                    match tokio::time::timeout(request.timeout, std::future::pending::<()>()).await
                    {
                        Ok(()) => Ok(self.schedule),
                        Err(_) => Err(MihrabError::RequestTimedOut),
                    }
                }
            }
        }
    }

    fn schedule() -> PrayerSchedule {
        PrayerSchedule::from_strings(["05:00", "06:20", "13:00", "16:30", "19:45", "21:15"])
            .unwrap()
    }

    fn mecca() -> Coordinate {
        Coordinate::new(21.4225, 39.8262).unwrap()
    }

    fn granted() -> Arc<ScriptedLocation> {
        Arc::new(ScriptedLocation::new(
            PermissionStatus::Granted,
            Some(mecca()),
            vec![],
        ))
    }

    fn engine(
        location: Arc<ScriptedLocation>,
        provider: Arc<FakeProvider>,
        store: Arc<MemoryStore>,
        clock: Arc<PausedClock>,
    ) -> PrayerEngine<ScriptedLocation, FakeProvider> {
        PrayerEngine::new(location, provider, store, clock, MihrabConfig::default())
    }

    async fn wait_for(
        rx: &mut watch::Receiver<PrayerSnapshot>,
        mut pred: impl FnMut(&PrayerSnapshot) -> bool,
    ) -> PrayerSnapshot {
        let wait = async {
            loop {
                {
                    let snap = rx.borrow_and_update();
                    if pred(&snap) {
                        return snap.clone();
                    }
                }
                rx.changed().await.expect("engine dropped");
            }
        };
        tokio::time::timeout(Duration::from_secs(24 * 3600), wait)
            .await
            .expect("condition never reached")
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetches_then_serves_from_cache() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 20, 0, 0));
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(FakeProvider::new(Behaviour::Succeed));

        let mut first = engine(granted(), provider.clone(), store.clone(), clock.clone());
        let mut rx = first.subscribe();
        first.activate();

        let snap = wait_for(&mut rx, |s| s.countdown != "00:00:00").await;
        assert!(!snap.loading);
        assert_eq!(snap.error, None);
        assert_eq!(snap.schedule, Some(schedule()));
        assert_eq!(snap.next_key(), Some(Prayer::Isha));
        assert_eq!(snap.countdown, "01:15:00");
        assert_eq!(provider.dates().len(), 1);
        assert_eq!(store.len(), 1);
        first.deactivate();

        let mut second = engine(granted(), provider.clone(), store.clone(), clock.clone());
        let mut rx = second.subscribe();
        second.activate();
        let snap = wait_for(&mut rx, |s| s.schedule.is_some()).await;
        assert_eq!(snap.schedule, Some(schedule()));
        assert_eq!(provider.dates().len(), 1, "second activation should hit the cache");
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_surfaces_error() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 20, 0, 0));
        let location = Arc::new(ScriptedLocation::new(PermissionStatus::Denied, None, vec![]));
        let provider = Arc::new(FakeProvider::new(Behaviour::Succeed));

        let mut engine = engine(location, provider.clone(), Arc::new(MemoryStore::new()), clock);
        let mut rx = engine.subscribe();
        engine.activate();

        let snap = wait_for(&mut rx, |s| !s.loading).await;
        assert_eq!(snap.error.as_deref(), Some("Location permission denied"));
        assert!(snap.hint.is_some());
        assert_eq!(snap.schedule, None);
        assert!(provider.dates().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_timeout_is_distinct() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 20, 0, 0));
        let provider = Arc::new(FakeProvider::new(Behaviour::Hang));
        let mut engine = engine(granted(), provider, Arc::new(MemoryStore::new()), clock);
        let mut rx = engine.subscribe();
        engine.activate();

        let snap = wait_for(&mut rx, |s| !s.loading).await;
        assert_eq!(snap.error.as_deref(), Some("Prayer times request timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_provider_error_clears_schedule() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 20, 0, 0));
        let provider = Arc::new(FakeProvider::new(Behaviour::Fail));
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(granted(), provider, store.clone(), clock);
        let mut rx = engine.subscribe();
        engine.activate();

        let snap = wait_for(&mut rx, |s| !s.loading).await;
        assert_eq!(snap.error.as_deref(), Some("Failed to fetch prayer times: HTTP 500"));
        assert_eq!(snap.schedule, None);
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_hits_zero_then_advances() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 21, 14, 58));
        let provider = Arc::new(FakeProvider::new(Behaviour::Succeed));
        let mut engine = engine(granted(), provider, Arc::new(MemoryStore::new()), clock.clone());
        let mut rx = engine.subscribe();
        engine.activate();

        let snap = wait_for(&mut rx, |s| s.countdown != "00:00:00").await;
        assert_eq!(snap.next_key(), Some(Prayer::Isha));
        assert_eq!(snap.countdown, "00:00:02");

        let snap = wait_for(&mut rx, |s| s.countdown == "00:00:00").await;
        assert_eq!(snap.next_key(), Some(Prayer::Isha));
        let isha = snap.next_prayer.unwrap().at;
        assert_eq!(clock.now().with_timezone(&Utc), isha);

        // one tick later the countdown already targets tomorrow's Fajr
        let snap = wait_for(&mut rx, |s| {
            s.next_key() == Some(Prayer::Fajr) && s.countdown != "00:00:00"
        })
        .await;
        assert_eq!(snap.countdown, "07:44:59");
        assert_eq!(
            clock.now().with_timezone(&Utc),
            isha + chrono::Duration::seconds(1)
        );
        let next = snap.next_prayer.unwrap();
        assert!(next.rolled_over);
        assert!(next.at > clock.now().with_timezone(&Utc));
    }

    #[tokio::test(start_paused = true)]
    async fn test_midnight_triggers_refetch_for_new_day() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 23, 59, 58));
        let provider = Arc::new(FakeProvider::new(Behaviour::Succeed));
        let mut engine = engine(granted(), provider.clone(), Arc::new(MemoryStore::new()), clock);
        let mut rx = engine.subscribe();
        engine.activate();

        let june_2 = NaiveDate::from_ymd_opt(2024, 6, 2).unwrap();
        let snap = wait_for(&mut rx, |s| {
            s.date == Some(june_2) && s.next_prayer.map_or(false, |n| !n.rolled_over)
        })
        .await;

        assert_eq!(
            provider.dates(),
            vec![NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(), june_2]
        );
        assert_eq!(snap.next_key(), Some(Prayer::Fajr));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_stops_updates() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 12, 0, 0));
        let provider = Arc::new(FakeProvider::new(Behaviour::Succeed));
        let mut engine = engine(granted(), provider, Arc::new(MemoryStore::new()), clock);
        let mut rx = engine.subscribe();
        engine.activate();

        wait_for(&mut rx, |s| s.countdown != "00:00:00").await;
        engine.deactivate();
        assert!(!engine.is_active());
        rx.borrow_and_update();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!rx.has_changed().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deactivate_during_fetch_discards_response() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 20, 0, 0));
        let provider = Arc::new(FakeProvider::new(Behaviour::Hang));
        let store = Arc::new(MemoryStore::new());
        let mut engine = engine(granted(), provider.clone(), store.clone(), clock);
        let mut rx = engine.subscribe();
        engine.activate();

        // request is in flight, its timeout would fire after teardown
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(provider.dates().len(), 1);
        engine.deactivate();
        rx.borrow_and_update();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!rx.has_changed().unwrap());
        assert!(rx.borrow().loading);
        assert_eq!(rx.borrow().error, None);
        assert!(store.is_empty());
        assert_eq!(provider.dates().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_restarts_activation() {
        let clock = Arc::new(PausedClock::start_at(2024, 6, 1, 12, 0, 0));
        let provider = Arc::new(FakeProvider::new(Behaviour::Succeed));
        let location = Arc::new(ScriptedLocation::new(
            PermissionStatus::Granted,
            None,
            vec![Some(Ok(mecca())), Some(Ok(mecca()))],
        ));
        let mut engine = engine(
            location.clone(),
            provider.clone(),
            Arc::new(MemoryStore::new()),
            clock,
        );
        let mut rx = engine.subscribe();
        engine.activate();
        wait_for(&mut rx, |s| s.schedule.is_some()).await;
        assert_eq!(location.requests.lock().unwrap().len(), 1);

        engine.refresh();
        assert!(engine.is_active());
        let snap = wait_for(&mut rx, |s| {
            s.schedule.is_some() && location.requests.lock().unwrap().len() == 2
        })
        .await;
        assert_eq!(snap.next_key(), Some(Prayer::Dhuhr));
        // cache still fresh, so no second fetch
        assert_eq!(provider.dates().len(), 1);
    }
}
