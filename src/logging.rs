//! Tracing subscriber setup.

use crate::config::ApplicationConfig;
use crate::error::{AppResult, DaqError};
use tracing_subscriber::EnvFilter;

/// Builds the filter: `RUST_LOG` when set, else the configured level.
pub fn env_filter(config: &ApplicationConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
}

/// Installs the global subscriber, pretty or JSON per `log_format`.
///
/// Fails if a global subscriber is already installed.
pub fn init(config: &ApplicationConfig) -> AppResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(config))
        .with_target(true);

    let result = if config.log_format == "json" {
        builder.json().with_current_span(true).try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| DaqError::Configuration(format!("failed to install logger: {e}")))
}
