//! Error types for the host integration layer.

use thiserror::Error;
use zonekit_core::ZoneError;

/// Failures while booting or configuring the simulated host.
#[derive(Error, Debug)]
pub enum HostError {
    /// Host configuration could not be parsed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The logging subscriber could not be built.
    #[error("Logging setup failed: {0}")]
    Logging(String),

    /// The engine reported a failure (persistence, config).
    #[error(transparent)]
    Engine(#[from] ZoneError),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, HostError>;
