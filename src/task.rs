use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

pub const TITLE_MAX_LEN: usize = 80;
pub const DESCRIPTION_MAX_LEN: usize = 800;

/// How a task repeats after its creation day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RepetitionKind {
    #[default]
    #[serde(rename = "no")]
    None,
    #[serde(rename = "every_day")]
    Daily,
    #[serde(rename = "every_workday")]
    Workdays,
    #[serde(rename = "every_week")]
    Weekly,
    #[serde(rename = "every_month")]
    Monthly,
    #[serde(rename = "every_year")]
    Yearly,
    #[serde(rename = "special")]
    Special,
}

impl RepetitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepetitionKind::None => "no",
            RepetitionKind::Daily => "every_day",
            RepetitionKind::Workdays => "every_workday",
            RepetitionKind::Weekly => "every_week",
            RepetitionKind::Monthly => "every_month",
            RepetitionKind::Yearly => "every_year",
            RepetitionKind::Special => "special",
        }
    }

    pub fn is_recurring(&self) -> bool {
        *self != RepetitionKind::None
    }
}

impl FromStr for RepetitionKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "no" => Ok(RepetitionKind::None),
            "every_day" => Ok(RepetitionKind::Daily),
            "every_workday" => Ok(RepetitionKind::Workdays),
            "every_week" => Ok(RepetitionKind::Weekly),
            "every_month" => Ok(RepetitionKind::Monthly),
            "every_year" => Ok(RepetitionKind::Yearly),
            "special" => Ok(RepetitionKind::Special),
            other => Err(Error::InvalidRepetition(other.to_string())),
        }
    }
}

impl fmt::Display for RepetitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored task. `creation_date` anchors every recurrence computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: i64,
    #[serde(serialize_with = "iso8601")]
    pub creation_date: DateTime<Utc>,
    pub title: String,
    pub description: String,
    pub repetition_kind: RepetitionKind,
    pub autoshift: bool,
}

impl Task {
    /// Calendar day of the creation date in the reference timezone.
    pub fn creation_day(&self, tz: &Tz) -> NaiveDate {
        self.creation_date.with_timezone(tz).date_naive()
    }
}

/// Fields of a task before storage assigns it an id.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewTask {
    pub creation_date: DateTime<Utc>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub repetition_kind: RepetitionKind,
    #[serde(default)]
    pub autoshift: bool,
}

impl NewTask {
    pub fn validate(&self) -> Result<()> {
        if self.repetition_kind.is_recurring() && self.autoshift {
            return Err(Error::ConflictingSchedule);
        }
        if self.title.trim().is_empty() {
            return Err(Error::InvalidTask("title must not be empty".to_string()));
        }
        if self.title.chars().count() > TITLE_MAX_LEN {
            return Err(Error::InvalidTask(format!(
                "title is longer than {TITLE_MAX_LEN} characters"
            )));
        }
        if self.description.chars().count() > DESCRIPTION_MAX_LEN {
            return Err(Error::InvalidTask(format!(
                "description is longer than {DESCRIPTION_MAX_LEN} characters"
            )));
        }
        Ok(())
    }
}

/// The moment a user marked one day of a task as done.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub id: i64,
    pub task_id: i64,
    #[serde(serialize_with = "iso8601")]
    pub completed_at: DateTime<Utc>,
}

/// A file linked to a task as a whole, shared by all of its occurrences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub id: i64,
    pub link: String,
    pub task_id: i64,
}

/// Per-task rows fetched alongside a batch of tasks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskExtras {
    pub completions: Vec<Completion>,
    pub attachments: Vec<Attachment>,
}

/// One calendar-day appearance of a task, ready for the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Occurrence {
    pub id: i64,
    #[serde(serialize_with = "iso8601")]
    pub creation_date: DateTime<Tz>,
    pub title: String,
    pub description: String,
    pub repetition_kind: RepetitionKind,
    pub autoshift: bool,
    #[serde(serialize_with = "iso8601")]
    pub occurrence_date: DateTime<Tz>,
    #[serde(serialize_with = "option_iso8601")]
    pub completed_on: Option<DateTime<Tz>>,
    pub attached_files: Vec<Attachment>,
}

/// Everything the calendar needs to draw one month.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthPack {
    pub dates: Vec<String>,
    pub tasks: Vec<Occurrence>,
}

/// ISO-8601 with a numeric offset, e.g. `2021-01-01T00:00:00+00:00`.
pub fn to_iso8601<Z: TimeZone>(dt: &DateTime<Z>) -> String {
    dt.fixed_offset()
        .to_rfc3339_opts(SecondsFormat::AutoSi, false)
}

fn iso8601<Z: TimeZone, S: Serializer>(
    dt: &DateTime<Z>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&to_iso8601(dt))
}

fn option_iso8601<Z: TimeZone, S: Serializer>(
    dt: &Option<DateTime<Z>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match dt {
        Some(dt) => serializer.serialize_str(&to_iso8601(dt)),
        None => serializer.serialize_none(),
    }
}
