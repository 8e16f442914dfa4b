//! Operator subcommands other than `serve`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use pacer_config::PacerConfig;
use pacer_core::{Task, TaskFilter, TaskPatch};
use pacer_scheduler::{upcoming, validate_cron, ExecutionOutcome};

use crate::app;
use crate::terminal_output::{
    flag_cell, note_error, note_success, note_warn, run_status_cell, time_cell, truncate, Align,
    Table,
};

/// Ask a running server for its scheduler status.
pub async fn status(config: &PacerConfig) -> Result<()> {
    let host = match config.bind() {
        "0.0.0.0" | "::" => "127.0.0.1",
        other => other,
    };
    let url = format!("http://{host}:{}/api/scheduler/status", config.port());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()?;
    let mut request = client.get(&url);
    if let Some(token) = config.api_token() {
        request = request.bearer_auth(token);
    }

    let response = match request.send().await {
        Ok(resp) => resp,
        Err(_) => {
            note_warn(&format!("Pacer is not running on {host}:{}", config.port()));
            return Ok(());
        }
    };
    if !response.status().is_success() {
        bail!("status request failed: {}", response.status());
    }

    let body: Value = response.json().await.context("decode status response")?;
    let status = &body["status"];
    println!(
        "scheduler: {}\nactive tasks: {}\nrunning tasks: {}",
        if status["running"].as_bool() == Some(true) { "running" } else { "stopped" },
        status["active_tasks_count"],
        status["running_tasks_count"],
    );
    Ok(())
}

/// Print every task as a table, newest first.
pub async fn list_tasks(config: &PacerConfig) -> Result<()> {
    let store = app::open_store(config)?;
    let mut tasks = store.query(&TaskFilter::all()).await?;
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let table = tasks_table(&tasks);
    if table.is_empty() {
        println!("No scheduled tasks.");
    } else {
        print!("{}", table.render());
    }
    Ok(())
}

fn tasks_table(tasks: &[Task]) -> Table {
    let mut table = Table::new()
        .column("ID", Align::Left)
        .column("Name", Align::Left)
        .column("Type", Align::Left)
        .column("Schedule", Align::Left)
        .column("Active", Align::Left)
        .column("State", Align::Left)
        .column("Last run", Align::Left)
        .column("Next run", Align::Left)
        .column("Runs", Align::Right)
        .column("Failed", Align::Right);

    for task in tasks {
        table.row(vec![
            task.id.to_string(),
            truncate(&task.name, 32),
            task.task_type.clone(),
            truncate(&task.schedule.describe(), 28),
            flag_cell(task.is_active, "yes"),
            flag_cell(task.is_running, "running"),
            format!("{} {}", run_status_cell(task.last_run_status), time_cell(task.last_run_at)),
            time_cell(task.next_run_at),
            task.stats.total_runs.to_string(),
            task.stats.failed_runs.to_string(),
        ]);
    }
    table
}

/// Execute one task in this process and wait for it to finish.
pub async fn run(config: &PacerConfig, id: Uuid) -> Result<()> {
    let scheduler = app::build_scheduler(config)?;
    let handle = scheduler.run_now(id).await?;
    let report = handle
        .await
        .context("task execution panicked")?
        .context("task execution aborted; see log for details")?;

    let elapsed = (report.finished_at - report.started_at).num_milliseconds();
    match report.outcome {
        ExecutionOutcome::Succeeded(outcome) => {
            note_success(&format!("{} ({elapsed} ms)", outcome.message));
        }
        ExecutionOutcome::Failed(message) => {
            note_error(&message);
            bail!("task {id} failed");
        }
        ExecutionOutcome::Skipped => {
            note_warn("Task was claimed by another worker; nothing ran");
        }
    }
    if let Some(next) = report.next_run_at {
        println!("next run: {}", time_cell(Some(next)));
    }
    Ok(())
}

/// Clear a `is_running` flag left behind by a crashed worker.
pub async fn unlock(config: &PacerConfig, id: Uuid) -> Result<()> {
    let store = app::open_store(config)?;
    let task = store.update(id, TaskPatch::release()).await?;
    tracing::info!(task_id = %id, task = %task.name, "Running flag cleared");
    note_success(&format!("Released '{}'", task.name));
    Ok(())
}

/// Validate a cron expression and list its next fire times.
pub fn check_cron(expr: &str, count: usize) -> Result<()> {
    let normalized = validate_cron(expr)?;
    println!("normalized: {normalized}");
    for at in upcoming(expr, Utc::now(), count)? {
        println!("  {}", at.to_rfc3339());
    }
    Ok(())
}
