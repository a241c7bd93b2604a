//! Air-date arithmetic.
//!
//! Upstream air dates are date-only strings with no time component. Two
//! interpretations coexist and must stay separate: day-count consumers
//! (the episode detector) anchor the date at local midnight, while
//! countdown consumers anchor it at local end of day so a show airing
//! "today" does not read as already expired.

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDate, NaiveTime, TimeZone};

/// Parse a `YYYY-MM-DD` air date. Returns `None` for empty or malformed
/// input rather than failing the surrounding pass.
pub fn parse_air_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()
}

/// Local midnight of the air date. Used for day-since arithmetic.
pub fn air_date_start(date: NaiveDate) -> DateTime<Local> {
    let naive = date.and_time(NaiveTime::MIN);
    match Local.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        // Midnight skipped by a clock shift; the UTC wall time is close enough.
        LocalResult::None => Local.from_utc_datetime(&naive),
    }
}

/// Local end of day (23:59:59) of the air date. Used for countdowns so the
/// air day itself still counts as pending.
pub fn air_date_end(date: NaiveDate) -> DateTime<Local> {
    air_date_start(date) + Duration::days(1) - Duration::seconds(1)
}

/// Whole days elapsed since the air date's local midnight, or `None` when
/// the date is still in the future. Truncated division would otherwise
/// report a date less than a day away as zero days old.
pub fn days_since_air(now: DateTime<Local>, date: NaiveDate) -> Option<i64> {
    let since = now.signed_duration_since(air_date_start(date));
    if since < Duration::zero() {
        return None;
    }
    Some(since.num_days())
}

/// Whether the air date is the same calendar day as `now`.
pub fn airs_today(now: DateTime<Local>, date: NaiveDate) -> bool {
    now.date_naive() == date
}

/// Aired within the last day or two, the window the detector treats as
/// "new". Dates in the future never qualify.
pub fn aired_recently(now: DateTime<Local>, date: NaiveDate) -> bool {
    matches!(days_since_air(now, date), Some(0..=1))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("unambiguous local time")
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_plain_dates_and_rejects_garbage() {
        assert_eq!(parse_air_date("2026-06-14"), Some(day(2026, 6, 14)));
        assert_eq!(parse_air_date(" 2026-06-14 "), Some(day(2026, 6, 14)));
        assert_eq!(parse_air_date(""), None);
        assert_eq!(parse_air_date("not-a-date"), None);
        assert_eq!(parse_air_date("2026-13-40"), None);
    }

    #[test]
    fn same_day_counts_as_zero_days_since() {
        let now = at(2026, 6, 15, 12);
        assert_eq!(days_since_air(now, day(2026, 6, 15)), Some(0));
    }

    #[test]
    fn yesterday_counts_as_one_day_since() {
        let now = at(2026, 6, 15, 12);
        assert_eq!(days_since_air(now, day(2026, 6, 14)), Some(1));
    }

    #[test]
    fn future_dates_are_not_days_since() {
        let now = at(2026, 6, 15, 12);
        assert_eq!(days_since_air(now, day(2026, 6, 16)), None);
    }

    #[test]
    fn recent_window_covers_today_and_yesterday_only() {
        let now = at(2026, 6, 15, 12);
        assert!(aired_recently(now, day(2026, 6, 15)));
        assert!(aired_recently(now, day(2026, 6, 14)));
        assert!(!aired_recently(now, day(2026, 6, 13)));
        assert!(!aired_recently(now, day(2026, 6, 16)));
    }

    #[test]
    fn airs_today_matches_calendar_day() {
        let now = at(2026, 6, 15, 23);
        assert!(airs_today(now, day(2026, 6, 15)));
        assert!(!airs_today(now, day(2026, 6, 16)));
    }

    #[test]
    fn end_of_day_lands_on_the_same_date() {
        let end = air_date_end(day(2026, 6, 15));
        assert_eq!(end.date_naive(), day(2026, 6, 15));
        assert!(end > air_date_start(day(2026, 6, 15)));
    }
}
