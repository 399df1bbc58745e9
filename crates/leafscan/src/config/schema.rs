use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::db::ConnectionSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Retries of one atomic unit before the store is reported unavailable.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_backoff_ms() -> u64 {
    100
}

impl DatabaseConfig {
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }
}

/// Where image, weight and mask blobs are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Blob tables inside the database file.
    #[default]
    Database,
    /// One file per blob under `root`.
    Filesystem { root: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_polling_interval")]
    pub polling_interval_secs: f64,
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
}

fn default_polling_interval() -> f64 {
    5.0
}

fn default_worker_count() -> usize {
    1
}

impl WorkerConfig {
    /// Falls back to the default interval for values the loader rejects.
    pub fn polling_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.polling_interval_secs)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(default_polling_interval()))
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            polling_interval_secs: default_polling_interval(),
            worker_count: default_worker_count(),
        }
    }
}

/// External model runner settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Program invoked once per inference.
    #[serde(default = "default_program")]
    pub program: String,
    /// Arguments placed before the model descriptor arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Directory model weights are written to before the runner reads them.
    #[serde(default = "default_weights_cache")]
    pub weights_cache: PathBuf,
}

fn default_program() -> String {
    "leafscan-runner".to_string()
}

fn default_weights_cache() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("leafscan")
        .join("weights")
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: Vec::new(),
            weights_cache: default_weights_cache(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence when set.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}
