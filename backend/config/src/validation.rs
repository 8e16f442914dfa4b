//! Config validation. Errors stop `pacer serve`; warnings are only logged.

use thiserror::Error;

use crate::schema::PacerConfig;

const CLAIM_STRATEGIES: [&str; 2] = ["compare_and_set", "advisory"];
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &PacerConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_scheduler(config, &mut report);
    validate_upstream(config, &mut report);
    validate_server(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_scheduler(config: &PacerConfig, report: &mut ValidationReport) {
    if config.poll_interval_secs() == 0 {
        report.error("scheduler.poll_interval_secs", "poll interval must be >= 1 second");
    }
    let strategy = config.claim_strategy();
    if !CLAIM_STRATEGIES.contains(&strategy) {
        report.error(
            "scheduler.claim_strategy",
            format!("Unknown claim strategy '{strategy}'. Use 'compare_and_set' or 'advisory'"),
        );
    } else if strategy == "advisory" {
        report.warn(
            "scheduler.claim_strategy",
            "advisory claims allow a task to run twice when claims race",
        );
    }
    if config.run_log_retention_days() == 0 {
        report.warn(
            "scheduler.run_log_retention_days",
            "retention of 0 days prunes every run log entry",
        );
    }
}

fn validate_upstream(config: &PacerConfig, report: &mut ValidationReport) {
    if config.upstream_api_key().is_none() {
        report.error(
            "upstream.api_key",
            "Upstream API key is required (set PACER_UPSTREAM_API_KEY)",
        );
    }
    let url = config.upstream_base_url();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        report.error("upstream.base_url", format!("'{url}' is not an http(s) URL"));
    }
}

fn validate_server(config: &PacerConfig, report: &mut ValidationReport) {
    let port = config.port();
    if port == 0 {
        report.error("server.port", "port must be non-zero");
    } else if port < 1024 && port != 80 && port != 443 {
        report.warn(
            "server.port",
            format!("Port {port} requires elevated privileges; consider using a port >= 1024"),
        );
    }
    if config.api_token().is_none() {
        report.warn(
            "server.api_token",
            "No API token set; scheduler routes are unauthenticated",
        );
    }
}

fn validate_logging(config: &PacerConfig, report: &mut ValidationReport) {
    let level = config.log_level();
    if !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        report.warn("logging.level", format!("Unknown log level '{level}'; using info"));
    }
}
