//! Pure computation of the next scheduled update-cycle time from a [`FrequencySpec`]
//! (§4.2 "Next scheduled time"). Kept free of I/O and wall-clock reads so it is trivially
//! testable and reusable from both the scheduling loop and the hot-swap path.

use crate::types::FrequencySpec;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, Utc, Weekday};
use std::time::SystemTime;

/// Compute the next time an update cycle should run, given the current frequency
/// specification and the current wall-clock time. Pure: repeated calls with the same
/// arguments return the same result (§8 property 7).
pub fn next_scheduled_time(freq: FrequencySpec, now: SystemTime) -> SystemTime {
    let now_utc: DateTime<Utc> = now.into();
    let next = match freq {
        FrequencySpec::None => return SystemTime::UNIX_EPOCH,
        FrequencySpec::Once { date, time } => match next_once(date, time, now_utc) {
            Some(dt) => dt,
            None => return SystemTime::UNIX_EPOCH,
        },
        FrequencySpec::Daily { time } => next_daily(now_utc, time),
        FrequencySpec::Weekly { day_of_week, time } => next_weekly(now_utc, day_of_week, time),
        FrequencySpec::Monthly { day, time } => next_monthly(now_utc, day, time),
        FrequencySpec::MonthlyByWeekAndDay { occurrence, day_of_week, time } => {
            next_monthly_by_week_and_day(now_utc, occurrence, day_of_week, time)
        }
        FrequencySpec::Hourly { minutes } => now_utc + ChronoDuration::minutes(minutes as i64),
    };
    next.into()
}

fn next_once(
    date: chrono::NaiveDate,
    time: chrono::NaiveTime,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let candidate = DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(time), Utc);
    (candidate > now).then_some(candidate)
}

fn next_daily(now: DateTime<Utc>, time: chrono::NaiveTime) -> DateTime<Utc> {
    let today = DateTime::<Utc>::from_naive_utc_and_offset(now.date_naive().and_time(time), Utc);
    if today >= now {
        today
    } else {
        DateTime::<Utc>::from_naive_utc_and_offset(
            (now.date_naive() + ChronoDuration::days(1)).and_time(time),
            Utc,
        )
    }
}

fn next_weekly(now: DateTime<Utc>, day_of_week: Weekday, time: chrono::NaiveTime) -> DateTime<Utc> {
    let mut date = now.date_naive();
    for _ in 0..8 {
        if date.weekday() == day_of_week {
            let candidate = DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(time), Utc);
            if candidate >= now {
                return candidate;
            }
        }
        date = date.succ_opt().expect("date arithmetic within a week does not overflow");
    }
    unreachable!("every week contains each weekday exactly once")
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .expect("valid year/month produces a valid first-of-month date");
    (first_of_next - ChronoDuration::days(1)).day()
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 { (year + 1, 1) } else { (year, month + 1) }
}

fn next_monthly(now: DateTime<Utc>, day: u32, time: chrono::NaiveTime) -> DateTime<Utc> {
    let (mut year, mut month) = (now.year(), now.month());
    loop {
        let dim = days_in_month(year, month);
        let actual_day = if day == 0 { dim } else { day.min(dim) };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, actual_day) {
            let candidate = DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(time), Utc);
            if candidate >= now {
                return candidate;
            }
        }
        (year, month) = next_month(year, month);
    }
}

fn nth_weekday_of_month(year: i32, month: u32, day_of_week: Weekday, occurrence: u8) -> Option<NaiveDate> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let offset =
        (7 + day_of_week.num_days_from_monday() as i64 - first.weekday().num_days_from_monday() as i64) % 7;
    let day = 1 + offset + (occurrence as i64 - 1) * 7;
    if day < 1 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month, day as u32)
}

fn next_monthly_by_week_and_day(
    now: DateTime<Utc>,
    occurrence: u8,
    day_of_week: Weekday,
    time: chrono::NaiveTime,
) -> DateTime<Utc> {
    let (mut year, mut month) = (now.year(), now.month());
    for _ in 0..36 {
        if let Some(date) = nth_weekday_of_month(year, month, day_of_week, occurrence) {
            let candidate = DateTime::<Utc>::from_naive_utc_and_offset(date.and_time(time), Utc);
            if candidate >= now {
                return candidate;
            }
        }
        (year, month) = next_month(year, month);
    }
    unreachable!("a 1st-4th weekday occurrence exists in at least one of the next 36 months")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use proptest::prelude::*;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> SystemTime {
        DateTime::<Utc>::from_naive_utc_and_offset(
            NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, mi, s).unwrap(),
            Utc,
        )
        .into()
    }

    #[test]
    fn none_is_disabled() {
        assert_eq!(next_scheduled_time(FrequencySpec::None, dt(2026, 1, 1, 0, 0, 0)), SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn once_in_the_past_is_disabled() {
        let freq = FrequencySpec::Once {
            date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            time: NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
        };
        assert_eq!(next_scheduled_time(freq, dt(2026, 1, 1, 0, 0, 0)), SystemTime::UNIX_EPOCH);
    }

    #[test]
    fn once_in_the_future_fires_at_that_instant() {
        let freq = FrequencySpec::Once {
            date: NaiveDate::from_ymd_opt(2030, 6, 1).unwrap(),
            time: NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
        };
        assert_eq!(next_scheduled_time(freq, dt(2026, 1, 1, 0, 0, 0)), dt(2030, 6, 1, 12, 0, 0));
    }

    #[test]
    fn daily_rolls_to_tomorrow_if_time_passed() {
        let freq = FrequencySpec::Daily { time: NaiveTime::from_hms_opt(7, 0, 0).unwrap() };
        assert_eq!(next_scheduled_time(freq, dt(2026, 3, 10, 8, 0, 0)), dt(2026, 3, 11, 7, 0, 0));
        assert_eq!(next_scheduled_time(freq, dt(2026, 3, 10, 6, 0, 0)), dt(2026, 3, 10, 7, 0, 0));
    }

    #[test]
    fn weekly_finds_next_occurrence() {
        // 2026-03-10 is a Tuesday.
        let freq = FrequencySpec::Weekly {
            day_of_week: Weekday::Wed,
            time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
        };
        assert_eq!(next_scheduled_time(freq, dt(2026, 3, 10, 0, 0, 0)), dt(2026, 3, 11, 7, 0, 0));
    }

    #[test]
    fn monthly_last_day_handles_short_months() {
        let freq = FrequencySpec::Monthly { day: 0, time: NaiveTime::from_hms_opt(0, 0, 0).unwrap() };
        assert_eq!(next_scheduled_time(freq, dt(2026, 2, 1, 0, 0, 0)), dt(2026, 2, 28, 0, 0, 0));
    }

    #[test]
    fn monthly_by_week_and_day_finds_nth_weekday() {
        // First Monday of March 2026 is the 2nd.
        let freq = FrequencySpec::MonthlyByWeekAndDay {
            occurrence: 1,
            day_of_week: Weekday::Mon,
            time: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
        };
        assert_eq!(next_scheduled_time(freq, dt(2026, 3, 1, 0, 0, 0)), dt(2026, 3, 2, 9, 0, 0));
    }

    #[test]
    fn hourly_adds_minutes() {
        let freq = FrequencySpec::Hourly { minutes: 90 };
        assert_eq!(next_scheduled_time(freq, dt(2026, 3, 10, 0, 0, 0)), dt(2026, 3, 10, 1, 30, 0));
    }

    proptest! {
        #[test]
        fn hourly_is_deterministic_and_non_decreasing(minutes in 1u32..100_000) {
            let now = dt(2026, 1, 1, 0, 0, 0);
            let freq = FrequencySpec::Hourly { minutes };
            let a = next_scheduled_time(freq, now);
            let b = next_scheduled_time(freq, now);
            prop_assert_eq!(a, b);
            prop_assert!(a >= now);
        }

        #[test]
        fn daily_is_deterministic(hour in 0u32..24, minute in 0u32..60) {
            let now = dt(2026, 5, 15, 10, 30, 0);
            let freq = FrequencySpec::Daily { time: NaiveTime::from_hms_opt(hour, minute, 0).unwrap() };
            let a = next_scheduled_time(freq, now);
            let b = next_scheduled_time(freq, now);
            prop_assert_eq!(a, b);
            prop_assert!(a >= now);
        }
    }
}
