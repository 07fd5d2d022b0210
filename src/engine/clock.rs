//! Wall clock and civil-day arithmetic.
//!
//! Every "date" in the system is a civil day in one fixed UTC offset
//! (IST by default), independent of the host timezone.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat,
    TimeZone, Utc, Weekday,
};
use std::sync::RwLock;

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Reads the host clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.write() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.write() {
            *guard += by;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Conversions between instants and civil days in a fixed offset
#[derive(Debug, Clone, Copy)]
pub struct CivilTime {
    offset: FixedOffset,
}

impl CivilTime {
    /// `None` when the offset is outside +/- 24h
    pub fn new(utc_offset_minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?).map(|offset| Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn local(&self, instant: DateTime<Utc>) -> DateTime<FixedOffset> {
        instant.with_timezone(&self.offset)
    }

    pub fn day_of(&self, instant: DateTime<Utc>) -> NaiveDate {
        self.local(instant).date_naive()
    }

    pub fn start_of_day(&self, day: NaiveDate) -> DateTime<FixedOffset> {
        self.at(day, NaiveTime::MIN)
    }

    /// 23:59:59.999 of `day`
    pub fn end_of_day(&self, day: NaiveDate) -> DateTime<FixedOffset> {
        let last = NaiveTime::from_hms_milli_opt(23, 59, 59, 999).unwrap_or(NaiveTime::MIN);
        self.at(day, last)
    }

    fn at(&self, day: NaiveDate, time: NaiveTime) -> DateTime<FixedOffset> {
        // A fixed offset has no gaps or folds, so the mapping is always single
        self.offset
            .from_local_datetime(&day.and_time(time))
            .single()
            .unwrap_or_else(|| Utc.from_utc_datetime(&day.and_time(time)).with_timezone(&self.offset))
    }

    /// Parse a civil day from `YYYY-MM-DD` or from an RFC 3339 instant
    pub fn parse_date(&self, value: &str) -> Result<NaiveDate, String> {
        let value = value.trim();
        if let Ok(day) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
            return Ok(day);
        }
        DateTime::parse_from_rfc3339(value)
            .map(|dt| self.day_of(dt.with_timezone(&Utc)))
            .map_err(|_| format!("Invalid date: {}", value))
    }

    /// Parse an instant: RFC 3339, an ISO local datetime read in the civil
    /// offset, or `HH:MM[:SS]` on `day` in the civil offset
    pub fn parse_instant(
        &self,
        value: &str,
        day: Option<NaiveDate>,
    ) -> Result<DateTime<FixedOffset>, String> {
        let value = value.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Ok(dt.with_timezone(&self.offset));
        }
        if let Ok(local) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M"))
        {
            return Ok(self.at(local.date(), local.time()));
        }
        let time = NaiveTime::parse_from_str(value, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
            .map_err(|_| format!("Invalid time: {}", value))?;
        let day = day.ok_or_else(|| format!("Time {} needs a date", value))?;
        Ok(self.at(day, time))
    }

    /// First and last civil day of `year`
    pub fn year_bounds(year: i32) -> Option<(NaiveDate, NaiveDate)> {
        Some((
            NaiveDate::from_ymd_opt(year, 1, 1)?,
            NaiveDate::from_ymd_opt(year, 12, 31)?,
        ))
    }
}

/// Storage form of an instant
pub fn format_instant(instant: DateTime<FixedOffset>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Storage form of a civil day
pub fn format_date(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

pub fn parse_stored_instant(value: &str) -> Result<DateTime<FixedOffset>, String> {
    DateTime::parse_from_rfc3339(value).map_err(|e| format!("Invalid stored time {}: {}", value, e))
}

/// Signed difference in hours
pub fn hours_between(from: DateTime<FixedOffset>, to: DateTime<FixedOffset>) -> f64 {
    (to - from).num_milliseconds() as f64 / 3_600_000.0
}

/// Count of Monday-to-Friday days in `[start, end]`
pub fn working_days(start: NaiveDate, end: NaiveDate) -> i64 {
    if start > end {
        return 0;
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ist() -> CivilTime {
        CivilTime::new(330).unwrap()
    }

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_civil_day_crosses_utc_midnight() {
        // 20:00 UTC is 01:30 next day in IST
        let instant = Utc.with_ymd_and_hms(2025, 3, 9, 20, 0, 0).unwrap();
        assert_eq!(ist().day_of(instant), day("2025-03-10"));
    }

    #[test]
    fn test_end_of_day() {
        let end = ist().end_of_day(day("2025-03-10"));
        assert_eq!(format_instant(end), "2025-03-10T23:59:59.999+05:30");
    }

    #[test]
    fn test_parse_date_forms() {
        let civil = ist();
        assert_eq!(civil.parse_date("2025-03-10").unwrap(), day("2025-03-10"));
        assert_eq!(
            civil.parse_date("2025-03-09T19:00:00Z").unwrap(),
            day("2025-03-10")
        );
        assert!(civil.parse_date("10/03/2025").is_err());
    }

    #[test]
    fn test_parse_instant_forms() {
        let civil = ist();
        let t = civil.parse_instant("09:30", Some(day("2025-03-10"))).unwrap();
        assert_eq!(format_instant(t), "2025-03-10T09:30:00.000+05:30");

        let t = civil.parse_instant("2025-03-10T04:00:00Z", None).unwrap();
        assert_eq!(format_instant(t), "2025-03-10T09:30:00.000+05:30");

        let t = civil.parse_instant("2025-03-12T10:00:00", None).unwrap();
        assert_eq!(format_instant(t), "2025-03-12T10:00:00.000+05:30");

        let t = civil.parse_instant("2025-03-12T10:00:00.250", None).unwrap();
        assert_eq!(format_instant(t), "2025-03-12T10:00:00.250+05:30");

        let t = civil.parse_instant("2025-03-12T10:15", None).unwrap();
        assert_eq!(format_instant(t), "2025-03-12T10:15:00.000+05:30");

        assert!(civil.parse_instant("2025-03-12T25:00:00", None).is_err());
        assert!(civil.parse_instant("09:30", None).is_err());
        assert!(civil.parse_instant("25:00", Some(day("2025-03-10"))).is_err());
    }

    #[test]
    fn test_working_days() {
        // 2025-03-08 is a Saturday
        assert_eq!(working_days(day("2025-03-08"), day("2025-03-09")), 0);
        assert_eq!(working_days(day("2025-03-10"), day("2025-03-14")), 5);
        assert_eq!(working_days(day("2025-03-10"), day("2025-03-16")), 5);
        assert_eq!(working_days(day("2025-03-10"), day("2025-03-10")), 1);
        assert_eq!(working_days(day("2025-03-14"), day("2025-03-10")), 0);
    }

    #[test]
    fn test_hours_between() {
        let civil = ist();
        let d = day("2025-03-10");
        let a = civil.parse_instant("09:00", Some(d)).unwrap();
        let b = civil.parse_instant("17:00", Some(d)).unwrap();
        assert_eq!(hours_between(a, b), 8.0);
        assert_eq!(hours_between(b, a), -8.0);
    }

    #[test]
    fn test_manual_clock() {
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), start + Duration::hours(2));
        clock.set(start);
        assert_eq!(clock.now(), start);
    }

    #[test]
    fn test_invalid_offset() {
        assert!(CivilTime::new(24 * 60).is_none());
        assert!(CivilTime::new(-330).is_some());
    }
}
