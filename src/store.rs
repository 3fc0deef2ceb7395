use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::calendar::DateRange;
use crate::error::Result;
use crate::task::{Attachment, NewTask, Task, TaskExtras};

/// Storage the planner reads task snapshots from and forwards edits to.
///
/// Implementations scope every call to a single owner.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Tasks whose creation date lies within `range`, bounds included.
    async fn get_tasks_in_range(&self, range: DateRange) -> Result<Vec<Task>>;

    /// Repeating tasks created strictly before `end`.
    async fn get_recurring_tasks_before(&self, end: DateTime<Utc>) -> Result<Vec<Task>>;

    /// Completions and attachments belonging to any of `task_ids`.
    async fn get_task_extras(&self, task_ids: &BTreeSet<i64>) -> Result<TaskExtras>;

    async fn get_task(&self, id: i64) -> Result<Option<Task>>;

    async fn create_task(&self, task: &NewTask) -> Result<Task>;

    async fn update_task(&self, id: i64, task: &NewTask) -> Result<Task>;

    async fn delete_task(&self, id: i64) -> Result<()>;

    /// Record (`Some`) or clear (`None`) the completion of `task_id` on `day`.
    async fn set_completion(
        &self,
        task_id: i64,
        day: NaiveDate,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn add_attachment(&self, task_id: i64, link: &str) -> Result<Attachment>;
}
