use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::calendar::{DateRange, grid_midnights, midnight, month_grid};
use crate::error::{Error, Result};
use crate::occurrence::{OccurrenceStub, expand};
use crate::store::TaskStore;
use crate::task::{Attachment, MonthPack, NewTask, Occurrence, Task, TaskExtras, to_iso8601};

pub const LINK_MAX_LEN: usize = 400;

/// Builds calendar views for one owner's tasks and forwards edits to storage.
#[derive(Debug, Clone)]
pub struct Planner<S> {
    store: S,
    tz: Tz,
}

impl<S: TaskStore> Planner<S> {
    pub fn new(store: S, tz: Tz) -> Self {
        Self { store, tz }
    }

    /// Grid dates plus every occurrence shown on them.
    pub async fn month_pack(&self, reference: NaiveDate) -> Result<MonthPack> {
        let days = month_grid(reference)?;
        let tasks = self.month_occurrences(&days).await?;
        let dates = grid_midnights(&days, &self.tz)
            .iter()
            .map(to_iso8601)
            .collect();

        tracing::debug!(%reference, occurrences = tasks.len(), "built month pack");
        Ok(MonthPack { dates, tasks })
    }

    /// All occurrences on `days`, which must be in chronological order.
    ///
    /// Tasks created inside the range come first, on their creation day,
    /// followed by recurring tasks expanded day by day.
    pub async fn month_occurrences(&self, days: &[NaiveDate]) -> Result<Vec<Occurrence>> {
        let range = DateRange::of_days(days, &self.tz)?;

        let dated = self.store.get_tasks_in_range(range).await?;
        let recurring = self.store.get_recurring_tasks_before(range.end).await?;

        let mut stubs: Vec<OccurrenceStub<'_>> = dated
            .iter()
            .map(|task| OccurrenceStub {
                task,
                date: task.creation_day(&self.tz),
            })
            .collect();
        stubs.extend(expand(days, &recurring, &self.tz)?);

        if stubs.is_empty() {
            return Ok(Vec::new());
        }

        let ids: BTreeSet<i64> = stubs.iter().map(|stub| stub.task.id).collect();
        let extras = self.store.get_task_extras(&ids).await?;

        Ok(attach_extras(&stubs, &extras, &self.tz))
    }

    pub async fn task(&self, id: i64) -> Result<Task> {
        self.store.get_task(id).await?.ok_or(Error::TaskNotFound(id))
    }

    pub async fn add_task(&self, task: &NewTask) -> Result<Task> {
        task.validate()?;
        self.store.create_task(task).await
    }

    pub async fn edit_task(&self, id: i64, task: &NewTask) -> Result<Task> {
        task.validate()?;
        self.store.update_task(id, task).await
    }

    pub async fn remove_task(&self, id: i64) -> Result<()> {
        self.store.delete_task(id).await
    }

    /// Mark the occurrence of `task_id` on `day` done at `completed_at`.
    pub async fn mark_done(
        &self,
        task_id: i64,
        day: NaiveDate,
        completed_at: DateTime<Utc>,
    ) -> Result<()> {
        let local_day = completed_at.with_timezone(&self.tz).date_naive();
        if local_day != day {
            return Err(Error::InvalidDate(format!(
                "completion time {} falls on {local_day}, not {day}",
                to_iso8601(&completed_at.with_timezone(&self.tz))
            )));
        }
        self.store.set_completion(task_id, day, Some(completed_at)).await
    }

    /// Clear the completion of `task_id` on `day`, if any.
    pub async fn unmark(&self, task_id: i64, day: NaiveDate) -> Result<()> {
        self.store.set_completion(task_id, day, None).await
    }

    pub async fn attach(&self, task_id: i64, link: &str) -> Result<Attachment> {
        let link = link.trim();
        if link.is_empty() || link.chars().count() > LINK_MAX_LEN {
            return Err(Error::InvalidTask(format!(
                "file link must be 1 to {LINK_MAX_LEN} characters"
            )));
        }
        self.store.add_attachment(task_id, link).await
    }
}

/// Turn stubs into finished occurrences.
///
/// Files belong to the task, so every occurrence gets its own copy of the
/// same list. A completion belongs to the occurrence on its calendar day.
fn attach_extras(stubs: &[OccurrenceStub<'_>], extras: &TaskExtras, tz: &Tz) -> Vec<Occurrence> {
    let mut files: HashMap<i64, Vec<Attachment>> = HashMap::new();
    for file in &extras.attachments {
        files.entry(file.task_id).or_default().push(file.clone());
    }

    let mut completions: HashMap<(i64, NaiveDate), DateTime<Utc>> = HashMap::new();
    for completion in &extras.completions {
        let day = completion.completed_at.with_timezone(tz).date_naive();
        completions
            .entry((completion.task_id, day))
            .or_insert(completion.completed_at);
    }

    stubs
        .iter()
        .map(|stub| {
            let task = stub.task;
            Occurrence {
                id: task.id,
                creation_date: task.creation_date.with_timezone(tz),
                title: task.title.clone(),
                description: task.description.clone(),
                repetition_kind: task.repetition_kind,
                autoshift: task.autoshift,
                occurrence_date: midnight(stub.date, tz),
                completed_on: completions
                    .get(&(task.id, stub.date))
                    .map(|at| at.with_timezone(tz)),
                attached_files: files.get(&task.id).cloned().unwrap_or_default(),
            }
        })
        .collect()
}
