use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../../../schema/config-v1.json");

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV_VAR: &str = "LEAFSCAN_CONFIG";

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

/// Picks the config file: an explicit path first, then `LEAFSCAN_CONFIG`,
/// then `<config dir>/leafscan/config.json` if that file exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(path) = std::env::var_os(CONFIG_ENV_VAR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(path));
    }

    dirs::config_dir()
        .map(|d| d.join("leafscan").join("config.json"))
        .filter(|p| p.is_file())
        .ok_or(ConfigError::NotFound)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let error_messages: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !error_messages.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: error_messages.join("; "),
        });
    }

    Ok(())
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    let interval = config.worker.polling_interval_secs;
    if !interval.is_finite() || interval <= 0.0 {
        return Err(ConfigError::Validation {
            message: format!("Polling interval must be positive, got {}", interval),
        });
    }
    if Duration::try_from_secs_f64(interval).is_err() {
        return Err(ConfigError::Validation {
            message: format!("Polling interval {} is too large", interval),
        });
    }

    if config.worker.worker_count == 0 {
        return Err(ConfigError::Validation {
            message: "Worker count must be at least 1".to_string(),
        });
    }

    Ok(())
}
