use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State},
    http::{StatusCode, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use serde_json::json;

use crate::calendar::parse_reference;
use crate::db::{DbPool, SqliteStore};
use crate::error::Error;
use crate::service::Planner;
use crate::task::{Attachment, MonthPack, NewTask, Task};

pub const OWNER_HEADER: &str = "x-user-id";

#[derive(Debug, Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub timezone: Tz,
}

impl AppState {
    pub fn new(pool: DbPool, timezone: Tz) -> Self {
        Self { pool, timezone }
    }

    fn planner(&self, owner: Owner) -> Planner<SqliteStore> {
        Planner::new(SqliteStore::new(self.pool.clone(), owner.0), self.timezone)
    }
}

/// The acting user, as vouched for by the auth layer in front of us.
#[derive(Debug, Clone, Copy)]
pub struct Owner(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for Owner {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(OWNER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse().ok())
            .map(Owner)
            .ok_or_else(|| {
                error_body(StatusCode::UNAUTHORIZED, format!("missing or invalid {OWNER_HEADER} header"))
            })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::InvalidDate(_)
            | Error::InvalidRepetition(_)
            | Error::ConflictingSchedule
            | Error::InvalidTask(_) => StatusCode::BAD_REQUEST,
            Error::UnsupportedRecurrence(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::TaskNotFound(_) => StatusCode::NOT_FOUND,
            Error::DuplicateCompletion { .. } => StatusCode::CONFLICT,
            Error::Storage(e) => {
                tracing::error!("storage error: {e}");
                return error_body(StatusCode::INTERNAL_SERVER_ERROR, "storage error".to_string());
            }
        };
        error_body(status, self.to_string())
    }
}

fn error_body(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/month", get(month_pack))
        .route("/tasks", post(create_task))
        .route("/tasks/{id}", get(show_task).put(update_task).delete(delete_task))
        .route("/tasks/{id}/completion", put(set_completion))
        .route("/tasks/{id}/files", post(attach_file))
}

#[derive(Debug, Deserialize)]
pub struct MonthQuery {
    pub date: Option<String>,
}

// GET /month?date=... - Grid dates and task occurrences for a month
async fn month_pack(
    State(state): State<AppState>,
    owner: Owner,
    Query(query): Query<MonthQuery>,
) -> Result<Json<MonthPack>, Error> {
    let reference = match query.date.as_deref() {
        Some(date) => parse_reference(date, &state.timezone)?,
        None => Utc::now().with_timezone(&state.timezone).date_naive(),
    };
    let pack = state.planner(owner).month_pack(reference).await?;
    Ok(Json(pack))
}

// POST /tasks - Create a task
async fn create_task(
    State(state): State<AppState>,
    owner: Owner,
    Json(task): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), Error> {
    let task = state.planner(owner).add_task(&task).await?;
    tracing::info!(id = task.id, owner = owner.0, "task created");
    Ok((StatusCode::CREATED, Json(task)))
}

// GET /tasks/:id
async fn show_task(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<i64>,
) -> Result<Json<Task>, Error> {
    Ok(Json(state.planner(owner).task(id).await?))
}

// PUT /tasks/:id - Replace a task's fields
async fn update_task(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(task): Json<NewTask>,
) -> Result<Json<Task>, Error> {
    Ok(Json(state.planner(owner).edit_task(id, &task).await?))
}

// DELETE /tasks/:id - Delete a task with its completions and files
async fn delete_task(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<i64>,
) -> Result<StatusCode, Error> {
    state.planner(owner).remove_task(id).await?;
    tracing::info!(id, owner = owner.0, "task deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CompletionBody {
    /// Day of the occurrence being (un)marked.
    pub date: String,
    /// `null` clears the completion.
    pub completed_at: Option<DateTime<Utc>>,
}

// PUT /tasks/:id/completion - Mark or unmark one occurrence
async fn set_completion(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(body): Json<CompletionBody>,
) -> Result<StatusCode, Error> {
    let day = parse_reference(&body.date, &state.timezone)?;
    let planner = state.planner(owner);
    match body.completed_at {
        Some(at) => planner.mark_done(id, day, at).await?,
        None => planner.unmark(id, day).await?,
    }
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct FileBody {
    pub link: String,
}

// POST /tasks/:id/files - Link a file to a task
async fn attach_file(
    State(state): State<AppState>,
    owner: Owner,
    Path(id): Path<i64>,
    Json(body): Json<FileBody>,
) -> Result<(StatusCode, Json<Attachment>), Error> {
    let file = state.planner(owner).attach(id, &body.link).await?;
    Ok((StatusCode::CREATED, Json(file)))
}
