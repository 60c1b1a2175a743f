//! Logging bootstrap.

use tracing::debug;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LoggingConfig;
use crate::error::{HostError, Result};

/// Build the filter: `RUST_LOG` wins, else the configured level.
///
/// # Errors
/// Returns `HostError::Logging` when the configured level is not a valid
/// filter directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| HostError::Logging(e.to_string()))
}

/// Install the global `tracing` subscriber.
///
/// Returns `false` when a subscriber was already installed; that is not an
/// error, so tests and embedders may call this freely.
///
/// # Errors
/// Returns `HostError::Logging` for an invalid level.
pub fn init_logging(config: &LoggingConfig) -> Result<bool> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = if config.json {
        registry
            .with(fmt::layer().json().with_target(config.with_target))
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(config.with_target))
            .try_init()
    };

    match installed {
        Ok(()) => {
            debug!(level = %config.level, json = config.json, "Logging initialized");
            Ok(true)
        }
        Err(_) => Ok(false),
    }
}
