use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use pacer_core::{
    Schedule, ScheduleType, SchedulerError, Task, TaskConfig, TaskFilter, TaskPatch, TaskType,
};
use pacer_scheduler::{validate_schedule, Scheduler};

use crate::auth::RequireAuth;

/// Shared application state for API handlers.
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    /// `None` leaves the scheduler routes open.
    pub api_token: Option<String>,
}

/// Build the Axum router with all API routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/scheduler/status", get(get_status))
        .route("/api/scheduler/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/scheduler/tasks/{id}",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/scheduler/tasks/{id}/run", post(run_task_now))
        .route("/api/scheduler/tasks/{id}/runs", get(task_runs))
        .with_state(state)
}

/// JSON error body `{"success": false, "error": "..."}` with a mapped status.
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let status = match &err {
            SchedulerError::NotFound(_) => StatusCode::NOT_FOUND,
            SchedulerError::AlreadyRunning(_) => StatusCode::CONFLICT,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => {
                tracing::error!(error = %err, "Scheduler API request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "success": false, "error": self.1 }))).into_response()
    }
}

type ApiResult<T = Json<Value>> = Result<T, ApiError>;

/// Task JSON plus a human-readable schedule.
fn task_json(task: &Task) -> Value {
    let mut value = serde_json::to_value(task).unwrap_or_else(|_| json!({ "id": task.id }));
    if let Value::Object(map) = &mut value {
        map.insert(
            "schedule_description".into(),
            Value::String(task.schedule.describe()),
        );
    }
    value
}

/// What `next_run_at` should show before a task's first run.
fn first_run_at(schedule: &Schedule, now: DateTime<Utc>) -> DateTime<Utc> {
    match schedule {
        Schedule::OneTime { scheduled_time } => *scheduled_time,
        // never-run cron and interval tasks are due on the next cycle
        Schedule::Cron { .. } | Schedule::Interval { .. } => now,
    }
}

/// Health check endpoint.
async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "pacer",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn get_status(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> ApiResult {
    let status = state.scheduler.status().await?;
    Ok(Json(json!({ "success": true, "status": status })))
}

/// All tasks, newest first.
async fn list_tasks(_auth: RequireAuth, State(state): State<Arc<AppState>>) -> ApiResult {
    let mut tasks = state.scheduler.store().query(&TaskFilter::all()).await?;
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    let tasks: Vec<Value> = tasks.iter().map(task_json).collect();
    Ok(Json(json!({ "success": true, "tasks": tasks })))
}

async fn get_task(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    let task = state
        .scheduler
        .store()
        .get(id)
        .await?
        .ok_or(SchedulerError::NotFound(id))?;
    Ok(Json(json!({ "success": true, "task": task_json(&task) })))
}

/// Schedule parameters as sent by clients. Exactly the one parameter named by
/// `schedule_type` may be present.
#[derive(Debug, Default, Deserialize)]
pub struct ScheduleFields {
    #[serde(default)]
    pub schedule_type: Option<ScheduleType>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub interval_minutes: Option<u32>,
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
}

impl ScheduleFields {
    /// The validated schedule, or `None` when no schedule fields were sent.
    fn resolve(&self) -> Result<Option<Schedule>, ApiError> {
        let given: Vec<&str> = [
            ("cron_expression", self.cron_expression.is_some()),
            ("interval_minutes", self.interval_minutes.is_some()),
            ("scheduled_time", self.scheduled_time.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, set)| set.then_some(field))
        .collect();

        let Some(kind) = self.schedule_type else {
            if given.is_empty() {
                return Ok(None);
            }
            return Err(ApiError::bad_request(format!(
                "schedule_type is required with {}",
                given.join(", ")
            )));
        };

        let expected = match kind {
            ScheduleType::Cron => "cron_expression",
            ScheduleType::Interval => "interval_minutes",
            ScheduleType::OneTime => "scheduled_time",
        };
        if let Some(extra) = given.iter().find(|field| **field != expected) {
            return Err(ApiError::bad_request(format!(
                "{extra} does not apply to schedule_type {}",
                kind.as_str()
            )));
        }
        let missing = || {
            ApiError::bad_request(format!("{expected} is required for schedule_type {}", kind.as_str()))
        };

        let schedule = match kind {
            ScheduleType::Cron => Schedule::Cron {
                cron_expression: self.cron_expression.clone().ok_or_else(missing)?,
            },
            ScheduleType::Interval => Schedule::Interval {
                interval_minutes: self.interval_minutes.ok_or_else(missing)?,
            },
            ScheduleType::OneTime => Schedule::OneTime {
                scheduled_time: self.scheduled_time.ok_or_else(missing)?,
            },
        };
        validate_schedule(&schedule)?;
        Ok(Some(schedule))
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    #[serde(alias = "task_name")]
    pub name: String,
    pub task_type: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(flatten)]
    pub schedule: ScheduleFields,
    #[serde(default, alias = "task_config")]
    pub config: TaskConfig,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

async fn create_task(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("name must not be empty"));
    }
    let task_type: TaskType = req.task_type.parse()?;
    let schedule = req
        .schedule
        .resolve()?
        .ok_or_else(|| ApiError::bad_request("schedule_type is required"))?;

    let mut task = Task::new(req.name, task_type, schedule).with_config(req.config);
    task.description = req.description;
    task.is_active = req.is_active;
    task.next_run_at = Some(first_run_at(&task.schedule, task.created_at));

    let task = state.scheduler.store().insert(task).await?;
    tracing::info!(task_id = %task.id, task = %task.name, schedule = %task.schedule, "Task created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "task": task_json(&task) })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default, alias = "task_name")]
    pub name: Option<String>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "task_config")]
    pub config: Option<TaskConfig>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(flatten)]
    pub schedule: ScheduleFields,
}

async fn update_task(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<UpdateTaskRequest>,
) -> ApiResult {
    let mut patch = TaskPatch {
        name: req.name.clone(),
        description: req.description.clone().map(Some),
        config: req.config.clone(),
        is_active: req.is_active,
        ..Default::default()
    };
    if let Some(task_type) = &req.task_type {
        let task_type: TaskType = task_type.parse()?;
        patch.task_type = Some(task_type.as_str().to_string());
    }
    if let Some(schedule) = req.schedule.resolve()? {
        patch.next_run_at = Some(Some(first_run_at(&schedule, Utc::now())));
        patch.schedule = Some(schedule);
    }
    if patch.is_empty() {
        return Err(ApiError::bad_request("No valid fields to update"));
    }

    let task = state.scheduler.store().update(id, patch).await?;
    Ok(Json(json!({ "success": true, "task": task_json(&task) })))
}

async fn delete_task(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult {
    if !state.scheduler.store().delete(id).await? {
        return Err(SchedulerError::NotFound(id).into());
    }
    tracing::info!(task_id = %id, "Task deleted");
    Ok(Json(json!({ "success": true, "message": "Task deleted successfully" })))
}

/// Dispatch immediately; the response does not wait for the handler.
async fn run_task_now(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    // dropping the handle detaches the execution
    let _detached = state.scheduler.run_now(id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "success": true, "message": "Task execution started" })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    #[serde(default = "default_runs_limit")]
    pub limit: usize,
}

fn default_runs_limit() -> usize {
    20
}

async fn task_runs(
    _auth: RequireAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Query(query): Query<RunsQuery>,
) -> ApiResult {
    let runs = match state.scheduler.history() {
        Some(history) => history.recent(id, query.limit.min(500)).await?,
        None => Vec::new(),
    };
    Ok(Json(json!({ "success": true, "runs": runs })))
}
