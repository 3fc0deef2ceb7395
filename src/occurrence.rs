use chrono::NaiveDate;
use chrono_tz::Tz;

use crate::error::Result;
use crate::recurrence::occurs_on;
use crate::task::Task;

/// A task placed on one candidate day, before completions and files are known.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OccurrenceStub<'a> {
    pub task: &'a Task,
    pub date: NaiveDate,
}

/// Place recurring tasks onto candidate days.
///
/// Output is grouped by day: for each day in the given order, every matching
/// task in the given order. Callers rely on that order being stable.
pub fn expand<'a>(
    days: &[NaiveDate],
    tasks: &'a [Task],
    tz: &Tz,
) -> Result<Vec<OccurrenceStub<'a>>> {
    let anchors: Vec<NaiveDate> = tasks.iter().map(|task| task.creation_day(tz)).collect();

    let mut stubs = Vec::new();
    for &date in days {
        for (task, &created) in tasks.iter().zip(&anchors) {
            if occurs_on(task.repetition_kind, created, date)? {
                stubs.push(OccurrenceStub { task, date });
            }
        }
    }
    Ok(stubs)
}
