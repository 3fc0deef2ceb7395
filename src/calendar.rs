use chrono::{
    DateTime, Datelike, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, TimeZone, Utc,
};
use chrono_tz::Tz;

use crate::error::{Error, Result};

pub const GRID_DAYS: usize = 42;

/// Inclusive bounds of a grid, as instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// From midnight of `first` to the last microsecond of `last`, in `tz`.
    pub fn covering(first: NaiveDate, last: NaiveDate, tz: &Tz) -> Result<Self> {
        let after_last = last
            .checked_add_days(Days::new(1))
            .ok_or_else(|| Error::InvalidDate(format!("{last} is the last representable day")))?;
        Ok(Self {
            start: midnight(first, tz).with_timezone(&Utc),
            end: midnight(after_last, tz).with_timezone(&Utc) - TimeDelta::microseconds(1),
        })
    }

    pub fn of_days(days: &[NaiveDate], tz: &Tz) -> Result<Self> {
        match (days.first(), days.last()) {
            (Some(first), Some(last)) => Self::covering(*first, *last, tz),
            _ => Err(Error::InvalidDate("empty day list".to_string())),
        }
    }
}

/// Parse the reference date of a month request.
///
/// Accepts RFC 3339 timestamps, naive `YYYY-MM-DDTHH:MM:SS[.f]` taken in
/// `tz`, and plain `YYYY-MM-DD`.
pub fn parse_reference(input: &str, tz: &Tz) -> Result<NaiveDate> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(tz).date_naive());
    }
    if let Ok(ndt) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(ndt.date());
    }
    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .map_err(|e| Error::InvalidDate(format!("'{input}': {e}")))
}

/// True when `date` is the final day of its month.
pub fn is_end_of_month(date: NaiveDate) -> bool {
    date.succ_opt().is_none_or(|next| next.month() != date.month())
}

/// Number of days in the month containing `date`.
pub fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = (date.year(), date.month());
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    };
    first_of_next
        .and_then(|d| d.pred_opt())
        .map_or(31, |last| last.day())
}

/// The 42 days shown for the month containing `reference`.
///
/// Always six Monday-first weeks, so the view never changes height between
/// months.
pub fn month_grid(reference: NaiveDate) -> Result<Vec<NaiveDate>> {
    let (year, month) = (reference.year(), reference.month());
    let mut days = month_weeks(year, month)?;

    if days.len() < GRID_DAYS {
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let next_weeks = month_weeks(next_year, next_month)?;
        let last = days[days.len() - 1];

        let extra = if last.month() != month {
            // The month ends mid-week and the grid already borrowed the
            // first week of the next month.
            &next_weeks[7..14]
        } else if days.len() == 28 {
            // Four exact weeks (February starting on a Monday).
            &next_weeks[0..14]
        } else {
            &next_weeks[0..7]
        };
        days.extend_from_slice(extra);
    }

    debug_assert_eq!(days.len(), GRID_DAYS);
    Ok(days)
}

/// Midnight of each day in `tz`.
pub fn grid_midnights(days: &[NaiveDate], tz: &Tz) -> Vec<DateTime<Tz>> {
    days.iter().map(|day| midnight(*day, tz)).collect()
}

/// Start of `day` in `tz`.
///
/// When a DST switch skips midnight, this is the first local instant that
/// exists on `day` (01:00 for most zones).
pub fn midnight(day: NaiveDate, tz: &Tz) -> DateTime<Tz> {
    let start = day.and_time(NaiveTime::MIN);
    (0..MIDNIGHT_PROBES)
        .map(|step| start + TimeDelta::minutes(15 * step))
        .find_map(|naive| tz.from_local_datetime(&naive).earliest())
        // Only reachable when a zone drops a whole calendar day.
        .unwrap_or_else(|| tz.from_utc_datetime(&start))
}

/// Quarter hours in a day.
const MIDNIGHT_PROBES: i64 = 96;

/// Whole Monday-to-Sunday weeks touching the given month.
fn month_weeks(year: i32, month: u32) -> Result<Vec<NaiveDate>> {
    let out_of_range = || Error::InvalidDate(format!("{year}-{month:02} is out of range"));

    let first = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(out_of_range)?;
    let last = first
        .checked_add_days(Days::new(u64::from(days_in_month(first) - 1)))
        .ok_or_else(out_of_range)?;

    let start = first
        .checked_sub_days(Days::new(u64::from(first.weekday().num_days_from_monday())))
        .ok_or_else(out_of_range)?;
    let end = last
        .checked_add_days(Days::new(u64::from(6 - last.weekday().num_days_from_monday())))
        .ok_or_else(out_of_range)?;

    Ok(start.iter_days().take_while(|d| *d <= end).collect())
}
