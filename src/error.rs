use chrono::NaiveDate;

use crate::task::RepetitionKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid date: {0}")]
    InvalidDate(String),

    /// The reserved `special` kind needs an options payload that no version
    /// of the rule engine understands yet.
    #[error("recurrence kind '{}' is not supported", .0.as_str())]
    UnsupportedRecurrence(RepetitionKind),

    #[error("unknown repetition kind: '{0}'")]
    InvalidRepetition(String),

    #[error("a task may repeat or autoshift, not both")]
    ConflictingSchedule,

    #[error("invalid task: {0}")]
    InvalidTask(String),

    #[error("task {0} not found")]
    TaskNotFound(i64),

    #[error("task {task_id} is already completed on {day}")]
    DuplicateCompletion { task_id: i64, day: NaiveDate },

    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}
