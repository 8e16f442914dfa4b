//! Wires stores, handlers and the scheduler from the effective config.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use pacer_config::PacerConfig;
use pacer_core::{TaskStore, TaskType};
use pacer_handlers::{
    MeetingRepository, MeetingsImportHandler, MeetingsImporter, MeetingsSource,
    RatingsCheckHandler, SqliteMeetingRepository, UpstreamClient,
};
use pacer_scheduler::{
    ClaimStrategy, HandlerRegistry, Scheduler, SchedulerConfig, SqliteRunLog, SqliteTaskStore,
    TaskExecutor,
};

/// Open the task store alone, for commands that never dispatch.
pub fn open_store(config: &PacerConfig) -> Result<Arc<dyn TaskStore>> {
    let store = SqliteTaskStore::open(config.db_path())
        .with_context(|| format!("open task store at {}", config.db_path()))?;
    Ok(Arc::new(store))
}

/// Handlers for every [`TaskType`], backed by the upstream API and the
/// meetings table in the same database file.
pub fn build_registry(config: &PacerConfig) -> Result<HandlerRegistry> {
    let api_key = config
        .upstream_api_key()
        .context("upstream.api_key is not set (or export PACER_UPSTREAM_API_KEY)")?;

    let source: Arc<dyn MeetingsSource> =
        Arc::new(UpstreamClient::new(config.upstream_base_url(), api_key)?);
    let repo: Arc<dyn MeetingRepository> = Arc::new(
        SqliteMeetingRepository::open(config.db_path()).context("open meetings repository")?,
    );
    let importer = Arc::new(MeetingsImporter::new(source.clone(), repo.clone()));

    Ok(HandlerRegistry::new()
        .with(
            TaskType::MeetingsImport,
            Arc::new(MeetingsImportHandler::new(importer.clone(), repo.clone())),
        )
        .with(
            TaskType::RatingsCheck,
            Arc::new(RatingsCheckHandler::new(source, repo, importer)),
        ))
}

/// Build a scheduler that is ready to `start()`.
pub fn build_scheduler(config: &PacerConfig) -> Result<Arc<Scheduler>> {
    let store = open_store(config)?;
    let history = Arc::new(SqliteRunLog::open(config.db_path()).context("open run log")?);
    let registry = Arc::new(build_registry(config)?);
    let claim_strategy: ClaimStrategy = config.claim_strategy().parse()?;

    let executor = TaskExecutor::new(store.clone(), registry.clone())
        .with_history(history)
        .with_claim_strategy(claim_strategy);

    let scheduler_config = SchedulerConfig {
        poll_interval: Duration::from_secs(config.poll_interval_secs()),
        run_log_retention_days: Some(config.run_log_retention_days()),
    };

    info!(
        db = %config.db_path(),
        handlers = ?registry.list(),
        "Scheduler components ready"
    );
    Ok(Arc::new(Scheduler::new(store, executor, scheduler_config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_db(yaml: &str) -> (tempfile::TempDir, PacerConfig) {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("pacer.db");
        let mut config: PacerConfig = serde_yaml::from_str(yaml).unwrap();
        config.store = Some(pacer_config::schema::StoreSection {
            db_path: Some(db.to_string_lossy().into_owned()),
        });
        (dir, config)
    }

    #[test]
    fn registry_requires_upstream_key() {
        let (_dir, config) = config_with_db("{}");
        let err = build_registry(&config).err().expect("registry needs an upstream key");
        assert!(err.to_string().contains("upstream.api_key"));
    }

    #[tokio::test]
    async fn builds_scheduler_with_every_handler() {
        let (_dir, config) = config_with_db(
            "upstream:\n  api_key: k\nscheduler:\n  claim_strategy: advisory\n",
        );
        let registry = build_registry(&config).unwrap();
        assert_eq!(registry.list().len(), TaskType::ALL.len());

        let scheduler = build_scheduler(&config).unwrap();
        assert!(!scheduler.is_running().await);
        assert!(scheduler.history().is_some());
    }

    #[test]
    fn unknown_claim_strategy_is_refused() {
        let (_dir, config) =
            config_with_db("upstream:\n  api_key: k\nscheduler:\n  claim_strategy: eager\n");
        assert!(build_scheduler(&config).is_err());
    }
}
