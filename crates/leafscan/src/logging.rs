//! Process-wide log subscriber.
//!
//! Library code logs through both `log` and `tracing`. [`init`] installs a
//! `tracing` subscriber and bridges `log` records into it, so one filter
//! and one output format apply to everything.

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::LeafscanError;

/// Builds the filter: `RUST_LOG` when set, otherwise `config.level`.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter, LeafscanError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| LeafscanError::Logging(format!("invalid level '{}': {}", config.level, e))),
    }
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<(), LeafscanError> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_target(false)),
        ),
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };
    installed.map_err(|e| LeafscanError::Logging(e.to_string()))?;

    tracing_log::LogTracer::init().map_err(|e| LeafscanError::Logging(e.to_string()))?;

    tracing::debug!(format = ?config.format, "Logging initialized");
    Ok(())
}
