//! Seed binary for populating the months database with fixture tasks.
//!
//! Usage: cargo run --bin seed
//!        cargo run --bin seed -- --file demo.toml --owner 2
//!
//! Reads `[[tasks]]` entries from a TOML file and inserts them for one owner.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use clap::Parser;
use serde::Deserialize;
use std::fs;

use months::calendar::{midnight, parse_reference};
use months::config::{self, Config};
use months::db::{self, SqliteStore};
use months::service::Planner;
use months::task::{NewTask, RepetitionKind};

#[derive(Parser, Debug)]
#[command(name = "seed")]
#[command(about = "Load fixture tasks into the months database")]
struct Args {
    /// Seed file to read
    #[arg(long, default_value = "seed.toml")]
    file: String,

    /// User id that will own the seeded tasks
    #[arg(long, default_value_t = 1)]
    owner: i64,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long)]
    db: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SeedData {
    tasks: Vec<SeedTask>,
}

#[derive(Debug, Deserialize)]
struct SeedTask {
    title: String,
    #[serde(default)]
    description: String,
    /// RFC 3339 timestamp or plain date.
    created: String,
    #[serde(default = "default_repeat")]
    repeat: String,
    #[serde(default)]
    autoshift: bool,
    #[serde(default)]
    files: Vec<String>,
    /// Days (or timestamps) on which the task was marked done.
    #[serde(default)]
    completed: Vec<String>,
}

fn default_repeat() -> String {
    RepetitionKind::None.as_str().to_string()
}

/// Timestamps are kept as written; bare dates mean midnight in `tz`.
fn parse_moment(input: &str, tz: &Tz) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input.trim()) {
        return Ok(dt.with_timezone(&Utc));
    }
    let day = parse_reference(input, tz)?;
    Ok(midnight(day, tz).with_timezone(&Utc))
}

impl SeedTask {
    fn to_new_task(&self, tz: &Tz) -> Result<NewTask> {
        Ok(NewTask {
            creation_date: parse_moment(&self.created, tz)
                .with_context(|| format!("task '{}': bad created date", self.title))?,
            title: self.title.clone(),
            description: self.description.clone(),
            repetition_kind: self.repeat.parse()?,
            autoshift: self.autoshift,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    config::init_tracing();

    let mut config = Config::from_env();
    if let Some(db) = args.db {
        config.database_url = db;
    }
    let tz = config.timezone;

    let pool = db::init_db(&config.database_url).await?;
    tracing::info!(database = %config.database_url, "connected");

    let seed_content = fs::read_to_string(&args.file)
        .with_context(|| format!("reading {}", args.file))?;
    let seed_data: SeedData = toml::from_str(&seed_content)?;
    tracing::info!(count = seed_data.tasks.len(), owner = args.owner, "seeding tasks");

    let planner = Planner::new(SqliteStore::new(pool, args.owner), tz);

    for seed_task in seed_data.tasks {
        let new_task = seed_task.to_new_task(&tz)?;
        let task = match planner.add_task(&new_task).await {
            Ok(task) => task,
            Err(e) => {
                tracing::warn!(title = %seed_task.title, "failed to create task: {e}");
                continue;
            }
        };

        for link in &seed_task.files {
            planner.attach(task.id, link).await?;
        }
        for done in &seed_task.completed {
            let completed_at = parse_moment(done, &tz)?;
            let day = completed_at.with_timezone(&tz).date_naive();
            planner.mark_done(task.id, day, completed_at).await?;
        }

        tracing::info!(id = task.id, title = %task.title, "created task");
    }

    tracing::info!("seeding complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_file_parses() {
        let data: SeedData = toml::from_str(
            r#"
            [[tasks]]
            title = "rent"
            created = "2021-01-01T17:59:22+00:00"
            repeat = "every_month"

            [[tasks]]
            title = "report"
            created = "2021-02-23"
            autoshift = true
            files = ["reports/q1.xlsx"]
            completed = ["2021-02-23"]
            "#,
        )
        .unwrap();

        let tz = chrono_tz::UTC;
        let rent = data.tasks[0].to_new_task(&tz).unwrap();
        assert_eq!(rent.repetition_kind, RepetitionKind::Monthly);
        assert_eq!(rent.creation_date.to_rfc3339(), "2021-01-01T17:59:22+00:00");

        let report = data.tasks[1].to_new_task(&tz).unwrap();
        assert_eq!(report.repetition_kind, RepetitionKind::None);
        assert!(report.autoshift);
        assert_eq!(report.creation_date.to_rfc3339(), "2021-02-23T00:00:00+00:00");
        assert_eq!(data.tasks[1].files, vec!["reports/q1.xlsx"]);
    }

    #[test]
    fn test_seed_rejects_unknown_repeat() {
        let task = SeedTask {
            title: "t".to_string(),
            description: String::new(),
            created: "2021-01-01".to_string(),
            repeat: "hourly".to_string(),
            autoshift: false,
            files: Vec::new(),
            completed: Vec::new(),
        };
        assert!(task.to_new_task(&chrono_tz::UTC).is_err());
    }
}
