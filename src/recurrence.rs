use chrono::{Datelike, NaiveDate, Weekday};

use crate::calendar::is_end_of_month;
use crate::error::{Error, Result};
use crate::task::RepetitionKind;

/// Does a task created on `created` with the given rule occur on `candidate`?
///
/// Only calendar days are compared. A task never recurs onto its own creation
/// day, so every rule requires `candidate > created`.
pub fn occurs_on(kind: RepetitionKind, created: NaiveDate, candidate: NaiveDate) -> Result<bool> {
    let matched = match kind {
        RepetitionKind::None => false,
        RepetitionKind::Daily => every_day(created, candidate),
        RepetitionKind::Workdays => every_workday(created, candidate),
        RepetitionKind::Weekly => every_week(created, candidate),
        RepetitionKind::Monthly => every_month(created, candidate),
        RepetitionKind::Yearly => every_year(created, candidate),
        RepetitionKind::Special => {
            tracing::warn!(%created, %candidate, "special recurrence requested but not implemented");
            return Err(Error::UnsupportedRecurrence(kind));
        }
    };
    Ok(matched)
}

fn every_day(created: NaiveDate, candidate: NaiveDate) -> bool {
    candidate > created
}

fn every_workday(created: NaiveDate, candidate: NaiveDate) -> bool {
    candidate > created && !matches!(candidate.weekday(), Weekday::Sat | Weekday::Sun)
}

fn every_week(created: NaiveDate, candidate: NaiveDate) -> bool {
    candidate > created && candidate.weekday() == created.weekday()
}

// A task created on the 31st lands on the 30th of short months and on the
// last day of February. Clamping only ever rounds down within the month.
fn every_month(created: NaiveDate, candidate: NaiveDate) -> bool {
    if candidate <= created {
        return false;
    }
    if candidate.day() == created.day() {
        return true;
    }
    matches!(candidate.day(), 28..=30)
        && is_end_of_month(candidate)
        && created.day() > candidate.day()
}

// Feb 29 tasks land on Feb 28 in common years.
fn every_year(created: NaiveDate, candidate: NaiveDate) -> bool {
    if candidate <= created {
        return false;
    }
    if (created.month(), created.day()) == (candidate.month(), candidate.day()) {
        return true;
    }
    created.month() == 2
        && candidate.month() == 2
        && candidate.day() == 28
        && is_end_of_month(candidate)
        && created.day() > candidate.day()
}
