//! Environment handling for config values.
//!
//! Two mechanisms:
//! - `${VAR_NAME}` references inside string values, resolved at load time.
//!   Only uppercase `[A-Z_][A-Z0-9_]*` names match; `$${VAR}` is a literal `${VAR}`.
//! - `PACER_*` override variables that replace individual settings outright.

use std::collections::HashMap;

use anyhow::{bail, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::warn;

use crate::schema::{PacerConfig, ServerSection, StoreSection, UpstreamSection};

/// `$${NAME}` (escaped) or `${NAME}`.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references in a config JSON value tree.
///
/// Returns an error if any referenced env var is not set or is empty.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    substitute_value(value, &std::env::vars().collect(), "")
}

/// Substitute env vars using a provided map (useful for testing).
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(arr) => arr
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut result = serde_json::Map::new();
            for (k, v) in map {
                let child_path = if path.is_empty() {
                    k.clone()
                } else {
                    format!("{path}.{k}")
                };
                result.insert(k.clone(), substitute_value(v, env, &child_path)?);
            }
            Ok(Value::Object(result))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let substituted = ENV_VAR_PATTERN.replace_all(s, |caps: &regex::Captures| {
        let var_name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{var_name}}}");
        }
        match env.get(var_name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: var_name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(substituted.into_owned())
}

/// Apply `PACER_*` overrides from the process environment.
pub fn apply_env_overrides(config: PacerConfig) -> PacerConfig {
    apply_env_overrides_with(config, &std::env::vars().collect())
}

/// Apply overrides from a provided map (useful for testing).
pub fn apply_env_overrides_with(
    mut config: PacerConfig,
    env: &HashMap<String, String>,
) -> PacerConfig {
    let get = |name: &str| env.get(name).filter(|v| !v.is_empty()).cloned();

    if let Some(db) = get("PACER_DB") {
        config.store.get_or_insert_with(StoreSection::default).db_path = Some(db);
    }
    if let Some(raw) = get("PACER_PORT") {
        match raw.parse::<u16>() {
            Ok(port) => {
                config.server.get_or_insert_with(ServerSection::default).port = Some(port);
            }
            Err(_) => warn!(value = %raw, "Ignoring invalid PACER_PORT"),
        }
    }
    if let Some(bind) = get("PACER_BIND") {
        config.server.get_or_insert_with(ServerSection::default).bind = Some(bind);
    }
    if let Some(token) = get("PACER_API_TOKEN") {
        config.server.get_or_insert_with(ServerSection::default).api_token = Some(token);
    }
    if let Some(key) = get("PACER_UPSTREAM_API_KEY") {
        config.upstream.get_or_insert_with(UpstreamSection::default).api_key = Some(key);
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn substitutes_nested_var() {
        let v = json!({"upstream": {"api_key": "${PF_KEY}"}});
        let result = resolve_env_vars_with(&v, &env(&[("PF_KEY", "abc123")])).unwrap();
        assert_eq!(result["upstream"]["api_key"], "abc123");
    }

    #[test]
    fn error_names_missing_var_and_path() {
        let v = json!({"server": {"api_token": "${MISSING_TOKEN}"}});
        let err = resolve_env_vars_with(&v, &HashMap::new()).unwrap_err().to_string();
        assert!(err.contains("MISSING_TOKEN"));
        assert!(err.contains("server.api_token"));
    }

    #[test]
    fn escaped_reference_is_literal() {
        let v = json!({"k": "$${HOME_DIR}/x"});
        let result = resolve_env_vars_with(&v, &HashMap::new()).unwrap();
        assert_eq!(result["k"], "${HOME_DIR}/x");
    }

    #[test]
    fn overrides_replace_file_values() {
        let cfg: PacerConfig = serde_yaml::from_str("server:\n  port: 9000\n").unwrap();
        let cfg = apply_env_overrides_with(
            cfg,
            &env(&[
                ("PACER_PORT", "7070"),
                ("PACER_DB", "/var/lib/pacer/pacer.db"),
                ("PACER_UPSTREAM_API_KEY", "k"),
            ]),
        );
        assert_eq!(cfg.port(), 7070);
        assert_eq!(cfg.db_path(), "/var/lib/pacer/pacer.db");
        assert_eq!(cfg.upstream_api_key(), Some("k"));
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let cfg = apply_env_overrides_with(PacerConfig::default(), &env(&[("PACER_PORT", "http")]));
        assert_eq!(cfg.port(), 8080);
    }
}
