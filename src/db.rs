use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::calendar::DateRange;
use crate::error::{Error, Result};
use crate::store::TaskStore;
use crate::task::{Attachment, Completion, NewTask, RepetitionKind, Task, TaskExtras};

pub type DbPool = SqlitePool;

pub async fn init_db(database_url: &str) -> Result<DbPool> {
    let options = SqliteConnectOptions::from_str(database_url)?.foreign_keys(true);

    let mut pool_options = SqlitePoolOptions::new();
    if database_url.contains(":memory:") {
        // Every connection would otherwise open its own empty database.
        pool_options = pool_options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }

    let pool = pool_options.connect_with(options).await?;
    create_tables(&pool).await?;
    Ok(pool)
}

async fn create_tables(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            owner_id INTEGER NOT NULL,
            creation_date TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            repetition TEXT NOT NULL DEFAULT 'no',
            autoshift INTEGER NOT NULL DEFAULT 0,
            -- a task may repeat or autoshift, never both
            CHECK (repetition = 'no' OR autoshift = 0)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS tasks_owner_creation ON tasks (owner_id, creation_date)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS completions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            completed_at TEXT NOT NULL,
            completed_day TEXT NOT NULL,
            UNIQUE (task_id, completed_day)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
            link TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// Fixed width, always UTC: string order is chronological order.
fn to_db_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

fn parse_db_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidDate(format!("stored timestamp '{s}': {e}")))
}

fn to_db_day(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

#[derive(Debug, FromRow)]
pub struct DbTask {
    pub id: i64,
    pub creation_date: String,
    pub title: String,
    pub description: String,
    pub repetition: String,
    pub autoshift: bool,
}

impl DbTask {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            creation_date: parse_db_timestamp(&self.creation_date)?,
            title: self.title,
            description: self.description,
            repetition_kind: self.repetition.parse()?,
            autoshift: self.autoshift,
        })
    }
}

#[derive(Debug, FromRow)]
pub struct DbCompletion {
    pub id: i64,
    pub task_id: i64,
    pub completed_at: String,
}

#[derive(Debug, FromRow)]
pub struct DbFile {
    pub id: i64,
    pub task_id: i64,
    pub link: String,
}

const TASK_COLUMNS: &str = "id, creation_date, title, description, repetition, autoshift";

fn into_tasks(rows: Vec<DbTask>) -> Result<Vec<Task>> {
    rows.into_iter().map(DbTask::into_task).collect()
}

// CHECK failures can only come from the repeat/autoshift constraint.
fn map_write_error(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_check_violation() => Error::ConflictingSchedule,
        _ => Error::Storage(e),
    }
}

fn push_id_list(query: &mut QueryBuilder<'_, Sqlite>, ids: &BTreeSet<i64>) {
    query.push(" (");
    let mut list = query.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    query.push(")");
}

/// SQLite-backed [`TaskStore`] that only ever sees one owner's rows.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: DbPool,
    owner: i64,
}

impl SqliteStore {
    pub fn new(pool: DbPool, owner: i64) -> Self {
        Self { pool, owner }
    }

    async fn require_task(&self, id: i64) -> Result<Task> {
        self.get_task(id).await?.ok_or(Error::TaskNotFound(id))
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn get_tasks_in_range(&self, range: DateRange) -> Result<Vec<Task>> {
        let rows: Vec<DbTask> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE owner_id = ? AND creation_date BETWEEN ? AND ? \
             ORDER BY creation_date, id"
        ))
        .bind(self.owner)
        .bind(to_db_timestamp(&range.start))
        .bind(to_db_timestamp(&range.end))
        .fetch_all(&self.pool)
        .await?;

        into_tasks(rows)
    }

    async fn get_recurring_tasks_before(&self, end: DateTime<Utc>) -> Result<Vec<Task>> {
        let rows: Vec<DbTask> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks \
             WHERE owner_id = ? AND repetition <> ? AND creation_date < ? \
             ORDER BY creation_date, id"
        ))
        .bind(self.owner)
        .bind(RepetitionKind::None.as_str())
        .bind(to_db_timestamp(&end))
        .fetch_all(&self.pool)
        .await?;

        into_tasks(rows)
    }

    async fn get_task_extras(&self, task_ids: &BTreeSet<i64>) -> Result<TaskExtras> {
        if task_ids.is_empty() {
            return Ok(TaskExtras::default());
        }

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT c.id, c.task_id, c.completed_at FROM completions c \
             JOIN tasks t ON t.id = c.task_id WHERE t.owner_id = ",
        );
        query.push_bind(self.owner);
        query.push(" AND c.task_id IN");
        push_id_list(&mut query, task_ids);
        query.push(" ORDER BY c.completed_at, c.id");
        let completions: Vec<DbCompletion> =
            query.build_query_as().fetch_all(&self.pool).await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT f.id, f.task_id, f.link FROM files f \
             JOIN tasks t ON t.id = f.task_id WHERE t.owner_id = ",
        );
        query.push_bind(self.owner);
        query.push(" AND f.task_id IN");
        push_id_list(&mut query, task_ids);
        query.push(" ORDER BY f.id");
        let files: Vec<DbFile> = query.build_query_as().fetch_all(&self.pool).await?;

        let completions = completions
            .into_iter()
            .map(|c| {
                Ok(Completion {
                    id: c.id,
                    task_id: c.task_id,
                    completed_at: parse_db_timestamp(&c.completed_at)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let attachments = files
            .into_iter()
            .map(|f| Attachment {
                id: f.id,
                link: f.link,
                task_id: f.task_id,
            })
            .collect();

        Ok(TaskExtras {
            completions,
            attachments,
        })
    }

    async fn get_task(&self, id: i64) -> Result<Option<Task>> {
        let row: Option<DbTask> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ? AND owner_id = ?"
        ))
        .bind(id)
        .bind(self.owner)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DbTask::into_task).transpose()
    }

    async fn create_task(&self, task: &NewTask) -> Result<Task> {
        let result = sqlx::query(
            "INSERT INTO tasks (owner_id, creation_date, title, description, repetition, autoshift) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(self.owner)
        .bind(to_db_timestamp(&task.creation_date))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.repetition_kind.as_str())
        .bind(task.autoshift)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        let id = result.last_insert_rowid();
        tracing::debug!(id, owner = self.owner, "created task");
        self.require_task(id).await
    }

    async fn update_task(&self, id: i64, task: &NewTask) -> Result<Task> {
        let result = sqlx::query(
            "UPDATE tasks SET creation_date = ?, title = ?, description = ?, repetition = ?, autoshift = ? \
             WHERE id = ? AND owner_id = ?",
        )
        .bind(to_db_timestamp(&task.creation_date))
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.repetition_kind.as_str())
        .bind(task.autoshift)
        .bind(id)
        .bind(self.owner)
        .execute(&self.pool)
        .await
        .map_err(map_write_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::TaskNotFound(id));
        }
        self.require_task(id).await
    }

    async fn delete_task(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ? AND owner_id = ?")
            .bind(id)
            .bind(self.owner)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::TaskNotFound(id));
        }
        tracing::debug!(id, owner = self.owner, "deleted task");
        Ok(())
    }

    async fn set_completion(
        &self,
        task_id: i64,
        day: NaiveDate,
        completed_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let Some(completed_at) = completed_at else {
            sqlx::query(
                "DELETE FROM completions WHERE task_id = ? AND completed_day = ? \
                 AND task_id IN (SELECT id FROM tasks WHERE owner_id = ?)",
            )
            .bind(task_id)
            .bind(to_db_day(day))
            .bind(self.owner)
            .execute(&self.pool)
            .await?;
            return Ok(());
        };

        self.require_task(task_id).await?;

        let inserted = sqlx::query(
            "INSERT INTO completions (task_id, completed_at, completed_day) VALUES (?, ?, ?)",
        )
        .bind(task_id)
        .bind(to_db_timestamp(&completed_at))
        .bind(to_db_day(day))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(Error::DuplicateCompletion { task_id, day })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn add_attachment(&self, task_id: i64, link: &str) -> Result<Attachment> {
        self.require_task(task_id).await?;

        let result = sqlx::query("INSERT INTO files (task_id, link) VALUES (?, ?)")
            .bind(task_id)
            .bind(link)
            .execute(&self.pool)
            .await?;

        Ok(Attachment {
            id: result.last_insert_rowid(),
            link: link.to_string(),
            task_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    async fn store(owner: i64) -> SqliteStore {
        let pool = init_db("sqlite::memory:").await.unwrap();
        SqliteStore::new(pool, owner)
    }

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn new_task(title: &str, created: DateTime<Utc>, kind: RepetitionKind) -> NewTask {
        NewTask {
            creation_date: created,
            title: title.to_string(),
            description: String::new(),
            repetition_kind: kind,
            autoshift: false,
        }
    }

    fn february_range() -> DateRange {
        DateRange {
            start: at(2021, 2, 1, 0, 0),
            end: at(2021, 3, 15, 0, 0) - TimeDelta::microseconds(1),
        }
    }

    #[test]
    fn test_db_timestamps_sort_chronologically() {
        let early = to_db_timestamp(&at(2021, 2, 1, 9, 5));
        let late = to_db_timestamp(&(at(2021, 2, 1, 9, 5) + TimeDelta::milliseconds(1)));
        assert_eq!(early, "2021-02-01T09:05:00.000000Z");
        assert!(early < late);
        assert_eq!(parse_db_timestamp(&late).unwrap(), at(2021, 2, 1, 9, 5) + TimeDelta::milliseconds(1));
    }

    #[tokio::test]
    async fn test_create_and_get_task() {
        let store = store(1).await;
        let created = store
            .create_task(&new_task("rent", at(2021, 1, 1, 17, 59), RepetitionKind::Monthly))
            .await
            .unwrap();

        assert_eq!(created.title, "rent");
        assert_eq!(created.repetition_kind, RepetitionKind::Monthly);
        assert_eq!(store.get_task(created.id).await.unwrap(), Some(created));
    }

    #[tokio::test]
    async fn test_range_and_recurring_queries() {
        let store = store(1).await;
        let plain = store
            .create_task(&new_task("plain", at(2021, 2, 21, 16, 26), RepetitionKind::None))
            .await
            .unwrap();
        let weekly = store
            .create_task(&new_task("weekly", at(2021, 2, 20, 14, 1), RepetitionKind::Weekly))
            .await
            .unwrap();
        let next_month = store
            .create_task(&new_task("march", at(2021, 3, 1, 17, 59), RepetitionKind::None))
            .await
            .unwrap();
        let monthly = store
            .create_task(&new_task("monthly", at(2021, 1, 1, 17, 59), RepetitionKind::Monthly))
            .await
            .unwrap();
        store
            .create_task(&new_task("later", at(2021, 3, 15, 0, 0), RepetitionKind::Daily))
            .await
            .unwrap();

        let in_range = store.get_tasks_in_range(february_range()).await.unwrap();
        let ids: Vec<_> = in_range.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![weekly.id, plain.id, next_month.id]);

        let recurring = store
            .get_recurring_tasks_before(february_range().end)
            .await
            .unwrap();
        let ids: Vec<_> = recurring.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![monthly.id, weekly.id]);
    }

    #[tokio::test]
    async fn test_range_bounds_are_inclusive() {
        let store = store(1).await;
        let range = february_range();
        store
            .create_task(&new_task("first", range.start, RepetitionKind::None))
            .await
            .unwrap();
        store
            .create_task(&new_task("last", range.end, RepetitionKind::None))
            .await
            .unwrap();
        store
            .create_task(&new_task("before", range.start - TimeDelta::seconds(1), RepetitionKind::None))
            .await
            .unwrap();

        let titles: Vec<_> = store
            .get_tasks_in_range(range)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["first", "last"]);
    }

    #[tokio::test]
    async fn test_queries_are_scoped_to_owner() {
        let pool = init_db("sqlite::memory:").await.unwrap();
        let alice = SqliteStore::new(pool.clone(), 1);
        let bob = SqliteStore::new(pool, 2);

        let task = alice
            .create_task(&new_task("alice's", at(2021, 2, 2, 8, 0), RepetitionKind::Daily))
            .await
            .unwrap();
        alice.add_attachment(task.id, "notes.txt").await.unwrap();

        assert!(bob.get_tasks_in_range(february_range()).await.unwrap().is_empty());
        assert!(bob
            .get_recurring_tasks_before(february_range().end)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(bob.get_task(task.id).await.unwrap(), None);
        let extras = bob.get_task_extras(&BTreeSet::from([task.id])).await.unwrap();
        assert!(extras.attachments.is_empty());
        assert!(matches!(bob.delete_task(task.id).await, Err(Error::TaskNotFound(_))));
        assert!(matches!(
            bob.add_attachment(task.id, "x").await,
            Err(Error::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_repeat_and_autoshift_rejected_by_storage() {
        let store = store(1).await;
        let mut task = new_task("both", at(2021, 2, 2, 8, 0), RepetitionKind::Daily);
        task.autoshift = true;
        assert!(matches!(
            store.create_task(&task).await,
            Err(Error::ConflictingSchedule)
        ));
    }

    #[tokio::test]
    async fn test_update_task() {
        let store = store(1).await;
        let task = store
            .create_task(&new_task("draft", at(2021, 2, 2, 8, 0), RepetitionKind::None))
            .await
            .unwrap();

        let mut edit = new_task("final", at(2021, 2, 3, 8, 0), RepetitionKind::None);
        edit.autoshift = true;
        let updated = store.update_task(task.id, &edit).await.unwrap();
        assert_eq!(updated.title, "final");
        assert!(updated.autoshift);
        assert_eq!(updated.creation_date, at(2021, 2, 3, 8, 0));

        assert!(matches!(
            store.update_task(task.id + 100, &edit).await,
            Err(Error::TaskNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_completion_unique_per_task_and_day() {
        let store = store(1).await;
        let a = store
            .create_task(&new_task("a", at(2021, 2, 1, 8, 0), RepetitionKind::Daily))
            .await
            .unwrap();
        let b = store
            .create_task(&new_task("b", at(2021, 2, 1, 8, 0), RepetitionKind::Daily))
            .await
            .unwrap();

        store
            .set_completion(a.id, day(2021, 2, 6), Some(at(2021, 2, 6, 10, 10)))
            .await
            .unwrap();
        // Another task may be completed on the same day.
        store
            .set_completion(b.id, day(2021, 2, 6), Some(at(2021, 2, 6, 11, 0)))
            .await
            .unwrap();
        assert!(matches!(
            store
                .set_completion(a.id, day(2021, 2, 6), Some(at(2021, 2, 6, 23, 0)))
                .await,
            Err(Error::DuplicateCompletion { .. })
        ));

        let extras = store
            .get_task_extras(&BTreeSet::from([a.id, b.id]))
            .await
            .unwrap();
        assert_eq!(extras.completions.len(), 2);

        store.set_completion(a.id, day(2021, 2, 6), None).await.unwrap();
        // Clearing twice is fine.
        store.set_completion(a.id, day(2021, 2, 6), None).await.unwrap();
        let extras = store.get_task_extras(&BTreeSet::from([a.id])).await.unwrap();
        assert!(extras.completions.is_empty());

        store
            .set_completion(a.id, day(2021, 2, 6), Some(at(2021, 2, 6, 23, 0)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_completion_for_missing_task() {
        let store = store(1).await;
        assert!(matches!(
            store
                .set_completion(42, day(2021, 2, 6), Some(at(2021, 2, 6, 10, 0)))
                .await,
            Err(Error::TaskNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_delete_cascades_extras() {
        let store = store(1).await;
        let task = store
            .create_task(&new_task("with files", at(2021, 2, 23, 17, 59), RepetitionKind::None))
            .await
            .unwrap();
        store.add_attachment(task.id, "file1/for/task/3").await.unwrap();
        store.add_attachment(task.id, "file2/for/task/3").await.unwrap();
        store
            .set_completion(task.id, day(2021, 2, 23), Some(at(2021, 2, 23, 18, 0)))
            .await
            .unwrap();

        let ids = BTreeSet::from([task.id]);
        let extras = store.get_task_extras(&ids).await.unwrap();
        let links: Vec<_> = extras.attachments.iter().map(|f| f.link.as_str()).collect();
        assert_eq!(links, vec!["file1/for/task/3", "file2/for/task/3"]);
        assert_eq!(extras.completions.len(), 1);

        store.delete_task(task.id).await.unwrap();
        assert_eq!(store.get_task_extras(&ids).await.unwrap(), TaskExtras::default());
        assert!(matches!(store.delete_task(task.id).await, Err(Error::TaskNotFound(_))));
    }

    #[tokio::test]
    async fn test_extras_for_no_ids() {
        let store = store(1).await;
        assert_eq!(
            store.get_task_extras(&BTreeSet::new()).await.unwrap(),
            TaskExtras::default()
        );
    }
}
