//! Slot-time arithmetic and reporting windows.
//!
//! Slot wall-clock times are `HH:MM` strings on a calendar date and are read
//! as UTC instants.

use std::sync::OnceLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

/// Every availability slot lasts 45 minutes.
pub const SLOT_DURATION_MINUTES: i64 = 45;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TimeError {
    #[error("'{0}' is not a valid HH:MM time")]
    InvalidFormat(String),

    #[error("{0}")]
    OutOfRange(String),

    #[error("'{0}' is not a valid YYYY-MM month key")]
    InvalidMonth(String),
}

fn hhmm_regex() -> &'static Regex {
    static HHMM: OnceLock<Regex> = OnceLock::new();
    HHMM.get_or_init(|| Regex::new(r"^([01][0-9]|2[0-3]):[0-5][0-9]$").expect("static regex"))
}

/// Parses a strict 24-hour `HH:MM` value.
pub fn parse_slot_time(value: &str) -> Result<NaiveTime, TimeError> {
    let trimmed = value.trim();
    if !hhmm_regex().is_match(trimmed) {
        return Err(TimeError::InvalidFormat(value.to_string()));
    }
    NaiveTime::parse_from_str(trimmed, "%H:%M")
        .map_err(|_| TimeError::InvalidFormat(value.to_string()))
}

pub fn format_slot_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// End of a slot starting at `start`. Slots may not reach midnight.
pub fn slot_end(start: NaiveTime) -> Result<NaiveTime, TimeError> {
    let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(SLOT_DURATION_MINUTES));
    if wrapped != 0 {
        return Err(TimeError::OutOfRange(format!(
            "slot starting at {} would run past midnight",
            format_slot_time(start)
        )));
    }
    Ok(end)
}

/// Validates that `start` comes strictly before `end`.
pub fn ensure_ordered(start: NaiveTime, end: NaiveTime) -> Result<(), TimeError> {
    if start >= end {
        return Err(TimeError::OutOfRange(format!(
            "start time {} must be before end time {}",
            format_slot_time(start),
            format_slot_time(end)
        )));
    }
    Ok(())
}

pub fn slot_instant(date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    date.and_time(time).and_utc()
}

/// Hours from `now` until `at`, floored to two decimal places.
///
/// Flooring keeps the sign and the 24-hour tier of the exact value, so the
/// stored snapshot always agrees with the tier that was applied.
pub fn hours_until(now: DateTime<Utc>, at: DateTime<Utc>) -> Decimal {
    let seconds = (at - now).num_seconds();
    (Decimal::from(seconds) / Decimal::from(3600))
        .round_dp_with_strategy(2, RoundingStrategy::ToNegativeInfinity)
}

/// Whole calendar days from `from` to `to` (negative when `to` is earlier).
pub fn days_between(from: NaiveDate, to: NaiveDate) -> i64 {
    (to - from).num_days()
}

/// Every date in `[from, to]` falling on `weekday`, ascending.
pub fn dates_on_weekday(from: NaiveDate, to: NaiveDate, weekday: Weekday) -> Vec<NaiveDate> {
    if from > to {
        return Vec::new();
    }
    let offset = (7 + weekday.num_days_from_monday() as i64
        - from.weekday().num_days_from_monday() as i64)
        % 7;
    let mut dates = Vec::new();
    let mut current = from + Duration::days(offset);
    while current <= to {
        dates.push(current);
        current += Duration::days(7);
    }
    dates
}

/// A `YYYY-MM` reporting month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonthKey {
    first_day: NaiveDate,
}

impl MonthKey {
    pub fn parse(value: &str) -> Result<Self, TimeError> {
        let invalid = || TimeError::InvalidMonth(value.to_string());
        let (year, month) = value.trim().split_once('-').ok_or_else(invalid)?;
        if year.len() != 4 || month.len() != 2 {
            return Err(invalid());
        }
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        let first_day = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
        Ok(Self { first_day })
    }

    /// The month `at` falls in.
    pub fn containing(at: DateTime<Utc>) -> Self {
        let date = at.date_naive();
        Self {
            first_day: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.first_day.and_time(NaiveTime::MIN).and_utc()
    }

    /// First instant of the following month.
    pub fn end(&self) -> DateTime<Utc> {
        let (year, month) = if self.first_day.month() == 12 {
            (self.first_day.year() + 1, 1)
        } else {
            (self.first_day.year(), self.first_day.month() + 1)
        };
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|date| date.and_time(NaiveTime::MIN).and_utc())
            .unwrap_or_else(|| self.start() + Duration::days(31))
    }

    /// Reporting window `[start, end)`; the current month is cut at `now`.
    pub fn window(&self, now: DateTime<Utc>) -> Result<ReportWindow, TimeError> {
        let start = self.start();
        if start > now {
            return Err(TimeError::OutOfRange(format!(
                "month {} has not started yet",
                self
            )));
        }
        let month_end = self.end();
        let closed = month_end <= now;
        Ok(ReportWindow {
            start,
            end: if closed { month_end } else { now },
            closed,
        })
    }
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.first_day.format("%Y-%m"))
    }
}

/// Half-open interval of instants a report covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// True when the month is over and the window no longer depends on the clock.
    pub closed: bool,
}

impl ReportWindow {
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn parses_strict_hhmm() {
        assert_eq!(parse_slot_time("09:30").unwrap(), NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert_eq!(parse_slot_time("23:59").unwrap(), NaiveTime::from_hms_opt(23, 59, 0).unwrap());

        for bad in ["9:30", "24:00", "12:60", "12-30", "", "12:30:00", "ab:cd"] {
            assert!(parse_slot_time(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn slot_end_adds_45_minutes() {
        let start = NaiveTime::from_hms_opt(10, 0, 0).unwrap();
        assert_eq!(slot_end(start).unwrap(), NaiveTime::from_hms_opt(10, 45, 0).unwrap());

        let last = NaiveTime::from_hms_opt(23, 14, 0).unwrap();
        assert_eq!(slot_end(last).unwrap(), NaiveTime::from_hms_opt(23, 59, 0).unwrap());

        let late = NaiveTime::from_hms_opt(23, 30, 0).unwrap();
        assert!(slot_end(late).is_err());
    }

    #[test]
    fn hours_until_floors_to_two_places() {
        let now = Utc.with_ymd_and_hms(2025, 9, 1, 10, 0, 0).unwrap();

        let almost_a_day = now + Duration::hours(24) - Duration::seconds(1);
        assert_eq!(hours_until(now, almost_a_day), dec!(23.99));

        assert_eq!(hours_until(now, now + Duration::hours(24)), dec!(24));

        let just_passed = now - Duration::seconds(1);
        assert_eq!(hours_until(now, just_passed), dec!(-0.01));
    }

    #[test]
    fn weekday_expansion_is_inclusive() {
        let from = NaiveDate::from_ymd_opt(2025, 9, 1).unwrap(); // Monday
        let to = NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(); // Monday
        let mondays = dates_on_weekday(from, to, Weekday::Mon);
        assert_eq!(mondays.len(), 3);
        assert_eq!(mondays[2], to);

        let wednesdays = dates_on_weekday(from, to, Weekday::Wed);
        assert_eq!(wednesdays, vec![
            NaiveDate::from_ymd_opt(2025, 9, 3).unwrap(),
            NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(),
        ]);

        assert!(dates_on_weekday(to, from, Weekday::Mon).is_empty());
    }

    #[test]
    fn month_window_for_closed_and_current_months() {
        let now = Utc.with_ymd_and_hms(2025, 10, 17, 12, 0, 0).unwrap();

        let september = MonthKey::parse("2025-09").unwrap();
        let window = september.window(now).unwrap();
        assert!(window.closed);
        assert_eq!(window.start, Utc.with_ymd_and_hms(2025, 9, 1, 0, 0, 0).unwrap());
        assert_eq!(window.end, Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap());

        let october = MonthKey::parse("2025-10").unwrap();
        let window = october.window(now).unwrap();
        assert!(!window.closed);
        assert_eq!(window.end, now);

        assert!(MonthKey::parse("2025-11").unwrap().window(now).is_err());
    }

    #[test]
    fn containing_month_of_an_instant() {
        let last_second = Utc.with_ymd_and_hms(2025, 9, 30, 23, 59, 59).unwrap();
        let month = MonthKey::containing(last_second);
        assert_eq!(month.to_string(), "2025-09");
        assert_eq!(month.end(), Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap());
        assert_eq!(MonthKey::containing(month.end()).to_string(), "2025-10");
    }

    #[test]
    fn december_rolls_into_next_year() {
        let december = MonthKey::parse("2024-12").unwrap();
        assert_eq!(december.end(), Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(december.to_string(), "2024-12");
    }

    #[test]
    fn rejects_malformed_month_keys() {
        for bad in ["2025-13", "2025-9", "25-09", "2025/09", "september"] {
            assert!(MonthKey::parse(bad).is_err(), "{} should be rejected", bad);
        }
    }
}
