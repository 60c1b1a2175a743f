//! Error types for the zonekit core library.

use thiserror::Error;

/// Top-level error type for all zonekit operations.
#[derive(Error, Debug)]
pub enum ZoneError {
    /// A flow id did not resolve to a registered definition.
    #[error("Flow not found: {0}")]
    FlowNotFound(String),

    /// A flow action reported failure.
    #[error("Action '{action}' failed: {reason}")]
    ActionFailed {
        /// Resolved action name.
        action: String,
        /// What the dispatcher reported.
        reason: String,
    },

    /// A registered trap policy failed while being evaluated.
    #[error("Policy error: {0}")]
    Policy(String),

    /// An event handler or lifecycle step failed while being invoked.
    #[error("Handler '{name}' failed: {reason}")]
    Handler {
        /// Handler or step name.
        name: String,
        /// Failure message.
        reason: String,
    },

    /// The host integration layer could not satisfy a capability call.
    #[error("Host error: {0}")]
    Host(String),

    /// A persisted row could not be decoded.
    #[error("Malformed row at line {line} in {file}: {reason}")]
    MalformedRow {
        /// File the row came from.
        file: String,
        /// 1-based line number (header is line 1).
        line: u64,
        /// Decoder message.
        reason: String,
    },

    /// Two row batches that should share a snapshot id do not.
    #[error("Snapshot id mismatch: expected {expected}, found {found}")]
    SnapshotMismatch {
        /// Snapshot id of the reference batch.
        expected: String,
        /// Snapshot id that was encountered.
        found: String,
    },

    /// CSV encoding failure.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ZoneError>;
