//! Config defaults: fills unset sections so the effective config can be
//! printed or serialized in full.

use crate::schema::{
    LoggingSection, PacerConfig, SchedulerSection, ServerSection, StoreSection, UpstreamSection,
};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_CLAIM_STRATEGY: &str = "compare_and_set";
pub const DEFAULT_RUN_LOG_RETENTION_DAYS: u32 = 30;
pub const DEFAULT_DB_PATH: &str = "pacer.db";
pub const DEFAULT_UPSTREAM_BASE_URL: &str = "https://api.puntingform.com.au/v2";
pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: PacerConfig) -> PacerConfig {
    let config = apply_scheduler_defaults(config);
    let config = apply_store_defaults(config);
    let config = apply_upstream_defaults(config);
    let config = apply_server_defaults(config);
    apply_logging_defaults(config)
}

fn apply_scheduler_defaults(mut config: PacerConfig) -> PacerConfig {
    let scheduler = config.scheduler.get_or_insert_with(SchedulerSection::default);
    scheduler
        .poll_interval_secs
        .get_or_insert(DEFAULT_POLL_INTERVAL_SECS);
    scheduler
        .claim_strategy
        .get_or_insert_with(|| DEFAULT_CLAIM_STRATEGY.to_string());
    scheduler
        .run_log_retention_days
        .get_or_insert(DEFAULT_RUN_LOG_RETENTION_DAYS);
    config
}

fn apply_store_defaults(mut config: PacerConfig) -> PacerConfig {
    let store = config.store.get_or_insert_with(StoreSection::default);
    store
        .db_path
        .get_or_insert_with(|| DEFAULT_DB_PATH.to_string());
    config
}

/// The API key has no default; validation reports it.
fn apply_upstream_defaults(mut config: PacerConfig) -> PacerConfig {
    let upstream = config.upstream.get_or_insert_with(UpstreamSection::default);
    upstream
        .base_url
        .get_or_insert_with(|| DEFAULT_UPSTREAM_BASE_URL.to_string());
    config
}

fn apply_server_defaults(mut config: PacerConfig) -> PacerConfig {
    let server = config.server.get_or_insert_with(ServerSection::default);
    server.bind.get_or_insert_with(|| DEFAULT_BIND.to_string());
    server.port.get_or_insert(DEFAULT_PORT);
    config
}

fn apply_logging_defaults(mut config: PacerConfig) -> PacerConfig {
    let logging = config.logging.get_or_insert_with(LoggingSection::default);
    logging
        .level
        .get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    logging.dir.get_or_insert_with(|| DEFAULT_LOG_DIR.to_string());
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_every_section() {
        let cfg = apply_all_defaults(PacerConfig::default());
        let scheduler = cfg.scheduler.unwrap();
        assert_eq!(scheduler.poll_interval_secs, Some(60));
        assert_eq!(scheduler.claim_strategy.as_deref(), Some("compare_and_set"));
        assert_eq!(cfg.server.unwrap().port, Some(8080));
        assert_eq!(cfg.upstream.unwrap().api_key, None);
    }

    #[test]
    fn does_not_override_user_values() {
        let cfg = PacerConfig {
            scheduler: Some(SchedulerSection {
                poll_interval_secs: Some(5),
                claim_strategy: Some("advisory".into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let cfg = apply_all_defaults(cfg);
        assert_eq!(cfg.poll_interval_secs(), 5);
        assert_eq!(cfg.claim_strategy(), "advisory");
        assert_eq!(cfg.run_log_retention_days(), 30);
    }
}
