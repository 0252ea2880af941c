//! Timestamp expressions.
//!
//! A written timestamp carries an implicit precision: `2019-08-31` means the
//! whole of that day, `2019-08` the whole month, `3pm` the whole hour. Parsing
//! therefore yields a [`TimeRange`] rather than a single instant, and offset
//! intervals bounded by timestamps cover every message inside the range.

use crate::error::ParseError;
use time::{
    format_description::{well_known::Rfc3339, FormatItem},
    macros::format_description,
    Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset,
};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const MINUTE_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]");
const SECOND_FORMAT: &[FormatItem<'static>] = format_description!("[hour]:[minute]:[second]");
const SUBSEC_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour]:[minute]:[second].[subsecond]");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A half-open interval `[t0, t1)` capturing the precision of a written
/// timestamp. A precise instant has `t0 == t1`.
pub struct TimeRange {
    pub t0: OffsetDateTime,
    pub t1: OffsetDateTime,
}

impl TimeRange {
    pub fn instant(t: OffsetDateTime) -> Self {
        Self { t0: t, t1: t }
    }

    /// Shift both ends by the same signed duration.
    pub fn shift(self, d: Duration) -> Self {
        Self {
            t0: self.t0 + d,
            t1: self.t1 + d,
        }
    }
}

/// Parses `s` in one of a range of possible formats and returns the range of
/// time that it represents.
///
/// Wall-clock forms (those without an explicit zone) take any missing date
/// from `now` in UTC; when `local` is set they are interpreted in `now`'s
/// offset instead. The CLI does not surface `local` yet.
pub fn parse_time(s: &str, local: bool, now: OffsetDateTime) -> Result<TimeRange, ParseError> {
    if let Ok(t) = OffsetDateTime::parse(s, &Rfc3339) {
        // RFC3339 always carries an explicit zone.
        return Ok(TimeRange::instant(t));
    }
    let offset = if local { now.offset() } else { UtcOffset::UTC };
    let today = now.to_offset(offset).date();
    let (t0, t1) = if let Ok(date) = Date::parse(s, DATE_FORMAT) {
        // A whole day.
        (date.midnight(), next_day(date).midnight())
    } else if let Some(month) = parse_month(s) {
        // A whole month.
        (month.midnight(), next_month(month).midnight())
    } else if let Some(year) = parse_year(s) {
        // A whole year.
        (year.midnight(), next_year(year).midnight())
    } else if let Ok(t) = Time::parse(s, MINUTE_FORMAT) {
        // A minute in the current day. There's an argument that we should
        // choose the closest day that contains the given time (e.g. if it is
        // 23:30 now and the input is 01:20, perhaps tomorrow morning rather
        // than this morning), but we keep it simple.
        let t0 = PrimitiveDateTime::new(today, t);
        (t0, t0 + Duration::MINUTE)
    } else if let Ok(t) = Time::parse(s, SUBSEC_FORMAT).or_else(|_| Time::parse(s, SECOND_FORMAT)) {
        // An exact moment in the current day; sub-second digits retained.
        let t0 = PrimitiveDateTime::new(today, t);
        (t0, t0)
    } else if let Some(t) = parse_hour_of_day(s) {
        // An hour in the current day.
        let t0 = PrimitiveDateTime::new(today, t);
        (t0, t0 + Duration::HOUR)
    } else {
        return Err(ParseError::InvalidTimestamp(s.to_owned()));
    };
    Ok(TimeRange {
        t0: t0.assume_offset(offset),
        t1: t1.assume_offset(offset),
    })
}

fn parse_month(s: &str) -> Option<Date> {
    let (year, month) = s.split_once('-')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month = Month::try_from(month.parse::<u8>().ok()?).ok()?;
    Date::from_calendar_date(year, month, 1).ok()
}

fn parse_year(s: &str) -> Option<Date> {
    if s.len() != 4 || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let year: i32 = s.parse().ok()?;
    // Bare numbers below this read as offsets elsewhere in the grammar.
    if year <= 2000 {
        return None;
    }
    Date::from_calendar_date(year, Month::January, 1).ok()
}

fn parse_hour_of_day(s: &str) -> Option<Time> {
    let (hour, pm) = if let Some(hour) = s.strip_suffix("am") {
        (hour, false)
    } else if let Some(hour) = s.strip_suffix("pm") {
        (hour, true)
    } else {
        return None;
    };
    if hour.is_empty() || hour.len() > 2 || !hour.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let hour: u8 = hour.parse().ok()?;
    if !(1..=12).contains(&hour) {
        return None;
    }
    Time::from_hms(hour % 12 + if pm { 12 } else { 0 }, 0, 0).ok()
}

fn next_day(date: Date) -> Date {
    date.next_day().expect("date overflow")
}

fn next_month(date: Date) -> Date {
    let (year, month) = match date.month() {
        Month::December => (date.year() + 1, Month::January),
        month => (date.year(), month.next()),
    };
    Date::from_calendar_date(year, month, 1).expect("date overflow")
}

fn next_year(date: Date) -> Date {
    Date::from_calendar_date(date.year() + 1, Month::January, 1).expect("date overflow")
}
