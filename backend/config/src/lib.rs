//! `pacer-config`: Pacer runtime configuration.
//!
//! Provides:
//! - Typed config schema with effective-value accessors
//! - YAML loading from `$PACER_CONFIG_DIR/config.yaml`
//! - `${ENV_VAR}` substitution and `PACER_*` overrides
//! - Default value application
//! - Validation report

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{
    apply_env_overrides, apply_env_overrides_with, resolve_env_vars,
    resolve_env_vars_with, MissingEnvVarError,
};
pub use io::{config_dir, config_file_path};
pub use schema::PacerConfig;
pub use validation::{validate, ConfigValidationError, ValidationReport};

use std::path::Path;

use anyhow::{Context, Result};

/// Load a config file, substitute env vars, then apply `PACER_*` overrides
/// and defaults. Validation is left to the caller: `serve` refuses to start
/// on errors, the read-only commands only report them.
pub async fn load_and_prepare(path: &Path) -> Result<PacerConfig> {
    let raw = io::load_raw(path).await?;
    let value = resolve_env_vars(&raw).context("Failed to resolve env vars in config")?;

    let config: PacerConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;
    Ok(apply_all_defaults(apply_env_overrides(config)))
}

/// Log every warning and error in `report`.
pub fn log_report(report: &ValidationReport) {
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    for error in &report.errors {
        tracing::error!(path = %error.path, message = %error.message, "Config error");
    }
}
