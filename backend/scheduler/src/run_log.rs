/// Durable run log for scheduled tasks.
///
/// Every execution attempt, successful or not, appends a row here with its
/// counts and summary. The task row only keeps the latest outcome.
use std::sync::Mutex;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use pacer_core::{RunHistory, RunRecord, SchedulerError, TaskId};

use crate::task_store::{parse_ts, ts};

pub struct SqliteRunLog {
    conn: Mutex<Connection>,
}

impl SqliteRunLog {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).context("open run log")?;
        Self::init(conn)
    }

    /// Create an in-memory log (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory run log")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS task_run_log (
                id          TEXT PRIMARY KEY,
                task_id     TEXT NOT NULL,
                task_name   TEXT NOT NULL,
                started_at  TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                status      TEXT NOT NULL,
                trigger_type TEXT NOT NULL DEFAULT 'scheduled',
                processed   INTEGER NOT NULL DEFAULT 0,
                inserted    INTEGER NOT NULL DEFAULT 0,
                updated     INTEGER NOT NULL DEFAULT 0,
                message     TEXT
            );
            CREATE INDEX IF NOT EXISTS task_run_log_task_id ON task_run_log(task_id, started_at);
            "#,
        )
        .context("create task_run_log schema")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T, SchedulerError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| SchedulerError::store("run log connection poisoned"))?;
        f(&conn).map_err(|e| SchedulerError::store(format!("{e:#}")))
    }
}

#[async_trait]
impl RunHistory for SqliteRunLog {
    async fn record(&self, entry: &RunRecord) -> Result<(), SchedulerError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO task_run_log
                 (id, task_id, task_name, started_at, finished_at, status,
                  processed, inserted, updated, message, trigger_type)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    entry.id.to_string(),
                    entry.task_id.to_string(),
                    entry.task_name,
                    ts(entry.started_at),
                    ts(entry.finished_at),
                    entry.status.as_str(),
                    entry.processed as i64,
                    entry.inserted as i64,
                    entry.updated as i64,
                    entry.message,
                    entry.trigger.as_str(),
                ],
            )?;
            Ok(())
        })
    }

    async fn recent(&self, task_id: TaskId, limit: usize) -> Result<Vec<RunRecord>, SchedulerError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, task_id, task_name, started_at, finished_at, status,
                        processed, inserted, updated, message, trigger_type
                 FROM task_run_log WHERE task_id = ?1
                 ORDER BY started_at DESC LIMIT ?2",
            )?;
            let entries = stmt
                .query_map(params![task_id.to_string(), limit as i64], |row| {
                    let id: String = row.get(0)?;
                    let task_id: String = row.get(1)?;
                    let status: String = row.get(5)?;
                    let trigger: String = row.get(10)?;
                    Ok(RunRecord {
                        id: id.parse().map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                0,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                        task_id: task_id.parse().map_err(|e| {
                            rusqlite::Error::FromSqlConversionFailure(
                                1,
                                rusqlite::types::Type::Text,
                                Box::new(e),
                            )
                        })?,
                        task_name: row.get(2)?,
                        started_at: parse_ts(3, &row.get::<_, String>(3)?)?,
                        finished_at: parse_ts(4, &row.get::<_, String>(4)?)?,
                        status: status.parse().unwrap_or_default(),
                        trigger: trigger.parse().unwrap_or_default(),
                        processed: row.get::<_, i64>(6)? as u64,
                        inserted: row.get::<_, i64>(7)? as u64,
                        updated: row.get::<_, i64>(8)? as u64,
                        message: row.get(9)?,
                    })
                })?
                .filter_map(|r| r.ok())
                .collect();
            Ok(entries)
        })
    }

    /// Prune entries that started before `cutoff`.
    async fn prune(&self, cutoff: DateTime<Utc>) -> Result<usize, SchedulerError> {
        self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM task_run_log WHERE started_at < ?1",
                params![ts(cutoff)],
            )?;
            Ok(n)
        })
    }
}
