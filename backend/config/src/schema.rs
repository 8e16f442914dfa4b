//! Pacer runtime configuration schema.
//!
//! Every field is optional on disk; [`crate::defaults`] fills the gaps and the
//! accessor methods fall back to the same constants.

use serde::{Deserialize, Serialize};

use crate::defaults::{
    DEFAULT_BIND, DEFAULT_CLAIM_STRATEGY, DEFAULT_DB_PATH, DEFAULT_LOG_DIR, DEFAULT_LOG_LEVEL,
    DEFAULT_POLL_INTERVAL_SECS, DEFAULT_PORT, DEFAULT_RUN_LOG_RETENTION_DAYS,
    DEFAULT_UPSTREAM_BASE_URL,
};

/// Root configuration (`config.yaml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PacerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<StoreSection>,

    /// Meetings provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamSection>,

    /// Management HTTP server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerSection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_interval_secs: Option<u64>,
    /// `compare_and_set` or `advisory`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_strategy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_log_retention_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Bearer token for `/api/scheduler/*`. Unset leaves the routes open.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for the rolling JSON log. Empty string disables file output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

impl PacerConfig {
    pub fn poll_interval_secs(&self) -> u64 {
        self.scheduler
            .as_ref()
            .and_then(|s| s.poll_interval_secs)
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
    }

    pub fn claim_strategy(&self) -> &str {
        self.scheduler
            .as_ref()
            .and_then(|s| s.claim_strategy.as_deref())
            .unwrap_or(DEFAULT_CLAIM_STRATEGY)
    }

    pub fn run_log_retention_days(&self) -> u32 {
        self.scheduler
            .as_ref()
            .and_then(|s| s.run_log_retention_days)
            .unwrap_or(DEFAULT_RUN_LOG_RETENTION_DAYS)
    }

    pub fn db_path(&self) -> &str {
        self.store
            .as_ref()
            .and_then(|s| s.db_path.as_deref())
            .unwrap_or(DEFAULT_DB_PATH)
    }

    pub fn upstream_base_url(&self) -> &str {
        self.upstream
            .as_ref()
            .and_then(|u| u.base_url.as_deref())
            .unwrap_or(DEFAULT_UPSTREAM_BASE_URL)
    }

    pub fn upstream_api_key(&self) -> Option<&str> {
        self.upstream
            .as_ref()
            .and_then(|u| u.api_key.as_deref())
            .filter(|k| !k.is_empty())
    }

    pub fn bind(&self) -> &str {
        self.server
            .as_ref()
            .and_then(|s| s.bind.as_deref())
            .unwrap_or(DEFAULT_BIND)
    }

    pub fn port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn api_token(&self) -> Option<&str> {
        self.server
            .as_ref()
            .and_then(|s| s.api_token.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_dir(&self) -> Option<&str> {
        let dir = self
            .logging
            .as_ref()
            .and_then(|l| l.dir.as_deref())
            .unwrap_or(DEFAULT_LOG_DIR);
        (!dir.is_empty()).then_some(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_yaml() {
        let yaml = r#"
scheduler:
  poll_interval_secs: 15
upstream:
  api_key: abc
server:
  port: 9090
"#;
        let cfg: PacerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.poll_interval_secs(), 15);
        assert_eq!(cfg.claim_strategy(), "compare_and_set");
        assert_eq!(cfg.upstream_api_key(), Some("abc"));
        assert_eq!(cfg.port(), 9090);
        assert_eq!(cfg.bind(), "0.0.0.0");
        assert_eq!(cfg.db_path(), "pacer.db");
    }

    #[test]
    fn empty_log_dir_disables_file_output() {
        let cfg: PacerConfig = serde_yaml::from_str("logging:\n  dir: \"\"\n").unwrap();
        assert_eq!(cfg.log_dir(), None);
        assert_eq!(PacerConfig::default().log_dir(), Some("logs"));
    }
}
