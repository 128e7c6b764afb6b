//! Next-prayer resolution
//!
//! Picks the first ordinal prayer strictly after "now". Past Isha the pointer
//! rolls over to tomorrow's Fajr, reusing today's Fajr wall-clock time until the
//! engine fetches tomorrow's real schedule. An Isha listed after midnight
//! belongs to the night that starts on the schedule's evening.

use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

use crate::types::{NextPrayer, Prayer, PrayerSchedule};

/// Resolve the next prayer for `now`, interpreting the schedule in `now`'s zone.
pub fn resolve<Tz: TimeZone>(schedule: &PrayerSchedule, now: &DateTime<Tz>) -> NextPrayer {
    let tz = now.timezone();
    let today = now.date_naive();
    let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
    let now_utc = now.with_timezone(&Utc);
    let wrapped = schedule.isha_after_midnight();

    // Last night's Isha, still ahead in the small hours
    let overnight = wrapped.then_some((Prayer::Isha, today));
    let day = Prayer::ORDINAL.into_iter().map(|prayer| match prayer {
        Prayer::Isha if wrapped => (prayer, tomorrow),
        _ => (prayer, today),
    });

    for (prayer, date) in overnight.into_iter().chain(day) {
        let at = local_instant(&tz, date, schedule.time_of(prayer));
        if at > now_utc {
            return NextPrayer {
                prayer,
                at,
                rolled_over: false,
            };
        }
    }

    NextPrayer {
        prayer: Prayer::Fajr,
        at: local_instant(&tz, tomorrow, schedule.time_of(Prayer::Fajr)),
        rolled_over: true,
    }
}

/// Convert a local date + wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// spring-forward gap move to the first valid minute after it.
pub fn local_instant<Tz: TimeZone>(tz: &Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let mut naive = NaiveDateTime::new(date, time);
    // Gaps are at most a few hours; bail out with the UTC reading otherwise
    for _ in 0..(4 * 60) {
        if let Some(at) = tz.from_local_datetime(&naive).earliest() {
            return at.with_timezone(&Utc);
        }
        naive += chrono::Duration::minutes(1);
    }
    Utc.from_utc_datetime(&NaiveDateTime::new(date, time))
}
