//! Global tracing subscriber setup

use crate::config::LoggingConfig;
use crate::error::{ConfigError, ConfigResult};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Build the filter for `config`; `RUST_LOG` takes precedence when set.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    let level = config.level.to_lowercase();
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},ember={level}")))
}

/// Install the global tracing subscriber with the configured format and level.
///
/// Fails when a global subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> ConfigResult<()> {
    config.validate()?;
    let env_filter = env_filter(config);

    let result = match config.format.to_lowercase().as_str() {
        "json" => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .try_init(),
        "compact" => tracing_subscriber::registry()
            .with(fmt::layer().compact())
            .with(env_filter)
            .try_init(),
        _ => tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(env_filter)
            .try_init(),
    };

    result.map_err(|e| ConfigError::Tracing(e.to_string()))
}
