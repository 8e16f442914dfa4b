/// Durable SQLite-backed storage for scheduled task definitions.
///
/// One row per task: schedule parameters, the opaque handler config as JSON,
/// run-state and counters. Timestamps are RFC 3339 UTC text with a fixed
/// precision so they also sort lexically.
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use tracing::{info, warn};

use pacer_core::{
    RunStats, RunStatus, Schedule, SchedulerError, Task, TaskFilter, TaskId, TaskPatch, TaskStore,
};

const SCHEMA: &str = r#"
    PRAGMA journal_mode=WAL;
    CREATE TABLE IF NOT EXISTS scheduled_tasks (
        id               TEXT PRIMARY KEY,
        name             TEXT NOT NULL,
        task_type        TEXT NOT NULL,
        description      TEXT,
        schedule_type    TEXT NOT NULL,
        cron_expression  TEXT,
        interval_minutes INTEGER,
        scheduled_time   TEXT,
        config           TEXT NOT NULL DEFAULT '{}',
        is_active        INTEGER NOT NULL DEFAULT 1,
        is_running       INTEGER NOT NULL DEFAULT 0,
        last_run_at      TEXT,
        last_run_status  TEXT NOT NULL DEFAULT 'none',
        last_run_message TEXT,
        next_run_at      TEXT,
        total_runs       INTEGER NOT NULL DEFAULT 0,
        successful_runs  INTEGER NOT NULL DEFAULT 0,
        failed_runs      INTEGER NOT NULL DEFAULT 0,
        created_at       TEXT NOT NULL,
        updated_at       TEXT NOT NULL,
        CHECK (
            (schedule_type = 'cron' AND cron_expression IS NOT NULL
                AND interval_minutes IS NULL AND scheduled_time IS NULL)
         OR (schedule_type = 'interval' AND interval_minutes IS NOT NULL
                AND cron_expression IS NULL AND scheduled_time IS NULL)
         OR (schedule_type = 'one_time' AND scheduled_time IS NOT NULL
                AND cron_expression IS NULL AND interval_minutes IS NULL)
        )
    );
    CREATE INDEX IF NOT EXISTS idx_scheduled_tasks_dispatch
        ON scheduled_tasks(is_active, is_running);
"#;

const COLUMNS: &str = "id, name, task_type, description, schedule_type, cron_expression,
    interval_minutes, scheduled_time, config, is_active, is_running, last_run_at,
    last_run_status, last_run_message, next_run_at, total_runs, successful_runs,
    failed_runs, created_at, updated_at";

pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open task store")?;
        let store = Self::init(conn)?;
        info!(path = %db_path, "Task store opened");
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory task store")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA).context("create scheduled_tasks schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T, SchedulerError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SchedulerError::store("task store connection poisoned"))?;
        f(&conn).map_err(|e| SchedulerError::store(format!("{e:#}")))
    }

    fn fetch(conn: &Connection, id: TaskId) -> Result<Option<Task>> {
        let sql = format!("SELECT {COLUMNS} FROM scheduled_tasks WHERE id = ?1");
        let task = conn
            .query_row(&sql, params![id.to_string()], task_from_row)
            .optional()?;
        Ok(task)
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>, SchedulerError> {
        self.with_conn(|conn| {
            let (clause, values) = where_clause(filter);
            let sql = format!("SELECT {COLUMNS} FROM scheduled_tasks{clause} ORDER BY created_at ASC");
            let mut stmt = conn.prepare(&sql)?;
            let tasks = stmt
                .query_map(params_from_iter(values.iter()), task_from_row)?
                .filter_map(|row| match row {
                    Ok(task) => Some(task),
                    Err(e) => {
                        warn!(error = %e, "Skipping unreadable task row");
                        None
                    }
                })
                .collect();
            Ok(tasks)
        })
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, SchedulerError> {
        self.with_conn(|conn| Self::fetch(conn, id))
    }

    async fn insert(&self, task: Task) -> Result<Task, SchedulerError> {
        self.with_conn(|conn| {
            let (schedule_type, cron_expression, interval_minutes, scheduled_time) =
                schedule_columns(&task.schedule);
            conn.execute(
                &format!(
                    "INSERT INTO scheduled_tasks ({COLUMNS})
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)"
                ),
                params![
                    task.id.to_string(),
                    task.name,
                    task.task_type,
                    task.description,
                    schedule_type,
                    cron_expression,
                    interval_minutes,
                    scheduled_time,
                    serde_json::to_string(&task.config)?,
                    task.is_active,
                    task.is_running,
                    task.last_run_at.map(ts),
                    task.last_run_status.as_str(),
                    task.last_run_message,
                    task.next_run_at.map(ts),
                    task.stats.total_runs as i64,
                    task.stats.successful_runs as i64,
                    task.stats.failed_runs as i64,
                    ts(task.created_at),
                    ts(task.updated_at),
                ],
            )
            .with_context(|| format!("insert task {}", task.id))?;
            Ok(task)
        })
    }

    async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Task, SchedulerError> {
        let updated = self.with_conn(|conn| {
            let mut sets: Vec<&'static str> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();
            let mut set = |column: &'static str, value: Box<dyn ToSql>| {
                sets.push(column);
                values.push(value);
            };

            if let Some(name) = patch.name {
                set("name", Box::new(name));
            }
            if let Some(task_type) = patch.task_type {
                set("task_type", Box::new(task_type));
            }
            if let Some(description) = patch.description {
                set("description", Box::new(description));
            }
            if let Some(schedule) = &patch.schedule {
                let (kind, cron, interval, at) = schedule_columns(schedule);
                set("schedule_type", Box::new(kind));
                set("cron_expression", Box::new(cron));
                set("interval_minutes", Box::new(interval));
                set("scheduled_time", Box::new(at));
            }
            if let Some(config) = &patch.config {
                set("config", Box::new(serde_json::to_string(config)?));
            }
            if let Some(is_active) = patch.is_active {
                set("is_active", Box::new(is_active));
            }
            if let Some(is_running) = patch.is_running {
                set("is_running", Box::new(is_running));
            }
            if let Some(last_run_at) = patch.last_run_at {
                set("last_run_at", Box::new(last_run_at.map(ts)));
            }
            if let Some(status) = patch.last_run_status {
                set("last_run_status", Box::new(status.as_str()));
            }
            if let Some(message) = patch.last_run_message {
                set("last_run_message", Box::new(message));
            }
            if let Some(next_run_at) = patch.next_run_at {
                set("next_run_at", Box::new(next_run_at.map(ts)));
            }
            set("updated_at", Box::new(ts(Utc::now())));

            let assignments: Vec<String> = sets
                .iter()
                .enumerate()
                .map(|(i, column)| format!("{column} = ?{}", i + 1))
                .collect();
            let sql = format!(
                "UPDATE scheduled_tasks SET {} WHERE id = ?{}",
                assignments.join(", "),
                values.len() + 1
            );
            values.push(Box::new(id.to_string()));

            let n = conn
                .execute(&sql, params_from_iter(values.iter()))
                .with_context(|| format!("update task {id}"))?;
            if n == 0 {
                return Ok(None);
            }
            Self::fetch(conn, id)
        })?;
        updated.ok_or(SchedulerError::NotFound(id))
    }

    async fn delete(&self, id: TaskId) -> Result<bool, SchedulerError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM scheduled_tasks WHERE id = ?1",
                params![id.to_string()],
            )?;
            Ok(n > 0)
        })
    }

    async fn increment_run_counters(
        &self,
        id: TaskId,
        status: RunStatus,
    ) -> Result<RunStats, SchedulerError> {
        let (ok, failed) = match status {
            RunStatus::Success => (1, 0),
            RunStatus::Failed => (0, 1),
            RunStatus::None => (0, 0),
        };
        let stats = self.with_conn(|conn| {
            conn.execute(
                "UPDATE scheduled_tasks
                 SET total_runs = total_runs + ?2 + ?3,
                     successful_runs = successful_runs + ?2,
                     failed_runs = failed_runs + ?3
                 WHERE id = ?1",
                params![id.to_string(), ok, failed],
            )?;
            let stats = conn
                .query_row(
                    "SELECT total_runs, successful_runs, failed_runs
                     FROM scheduled_tasks WHERE id = ?1",
                    params![id.to_string()],
                    |row| {
                        Ok(RunStats {
                            total_runs: row.get::<_, i64>(0)? as u64,
                            successful_runs: row.get::<_, i64>(1)? as u64,
                            failed_runs: row.get::<_, i64>(2)? as u64,
                        })
                    },
                )
                .optional()?;
            Ok(stats)
        })?;
        stats.ok_or(SchedulerError::NotFound(id))
    }

    async fn try_claim(&self, id: TaskId, now: DateTime<Utc>) -> Result<bool, SchedulerError> {
        let claimed = self.with_conn(|conn| {
            let n = conn.execute(
                "UPDATE scheduled_tasks
                 SET is_running = 1, last_run_at = ?2, updated_at = ?2
                 WHERE id = ?1 AND is_running = 0",
                params![id.to_string(), ts(now)],
            )?;
            if n == 1 {
                return Ok(Some(true));
            }
            let exists: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM scheduled_tasks WHERE id = ?1",
                    params![id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(exists.map(|_| false))
        })?;
        claimed.ok_or(SchedulerError::NotFound(id))
    }

    async fn count(&self, filter: &TaskFilter) -> Result<u64, SchedulerError> {
        self.with_conn(|conn| {
            let (clause, values) = where_clause(filter);
            let sql = format!("SELECT COUNT(*) FROM scheduled_tasks{clause}");
            let n: i64 = conn.query_row(&sql, params_from_iter(values.iter()), |row| row.get(0))?;
            Ok(n as u64)
        })
    }
}

pub(crate) fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

fn where_clause(filter: &TaskFilter) -> (String, Vec<bool>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();
    if let Some(active) = filter.is_active {
        values.push(active);
        conditions.push(format!("is_active = ?{}", values.len()));
    }
    if let Some(running) = filter.is_running {
        values.push(running);
        conditions.push(format!("is_running = ?{}", values.len()));
    }
    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

fn schedule_columns(
    schedule: &Schedule,
) -> (&'static str, Option<String>, Option<i64>, Option<String>) {
    let kind = schedule.kind().as_str();
    match schedule {
        Schedule::Cron { cron_expression } => (kind, Some(cron_expression.clone()), None, None),
        Schedule::Interval { interval_minutes } => {
            (kind, None, Some(i64::from(*interval_minutes)), None)
        }
        Schedule::OneTime { scheduled_time } => (kind, None, None, Some(ts(*scheduled_time))),
    }
}

fn conversion_error(idx: usize, err: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let id: String = row.get(0)?;
    let schedule_type: String = row.get(4)?;
    let schedule = match schedule_type.as_str() {
        "cron" => Schedule::Cron {
            cron_expression: row.get(5)?,
        },
        "interval" => Schedule::Interval {
            interval_minutes: u32::try_from(row.get::<_, i64>(6)?)
                .map_err(|e| conversion_error(6, e))?,
        },
        "one_time" => Schedule::OneTime {
            scheduled_time: parse_ts(7, &row.get::<_, String>(7)?)?,
        },
        other => {
            return Err(conversion_error(
                4,
                SchedulerError::InvalidSchedule(format!("unknown schedule_type {other}")),
            ))
        }
    };
    let config: String = row.get(8)?;
    let status: String = row.get(12)?;

    Ok(Task {
        id: id.parse().map_err(|e| conversion_error(0, e))?,
        name: row.get(1)?,
        task_type: row.get(2)?,
        description: row.get(3)?,
        schedule,
        config: serde_json::from_str(&config).map_err(|e| conversion_error(8, e))?,
        is_active: row.get(9)?,
        is_running: row.get(10)?,
        last_run_at: parse_opt_ts(11, row.get(11)?)?,
        last_run_status: status.parse().map_err(|e| conversion_error(12, e))?,
        last_run_message: row.get(13)?,
        next_run_at: parse_opt_ts(14, row.get(14)?)?,
        stats: RunStats {
            total_runs: row.get::<_, i64>(15)? as u64,
            successful_runs: row.get::<_, i64>(16)? as u64,
            failed_runs: row.get::<_, i64>(17)? as u64,
        },
        created_at: parse_ts(18, &row.get::<_, String>(18)?)?,
        updated_at: parse_ts(19, &row.get::<_, String>(19)?)?,
    })
}
