//! Error types for the ERNE core library.

use thiserror::Error;

/// Top-level error type for all ERNE operations.
///
/// Nothing here is fatal to a host process: persistence failures are logged
/// and degrade to "operation skipped", and capacity overflow is handled by
/// pruning rather than surfaced as an error.
#[derive(Error, Debug)]
pub enum ErneError {
    /// The experience payload was malformed (missing or non-finite numeric
    /// fields, empty sensory input). The store is left untouched.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Reading from or writing to the persistence boundary failed.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A periodic task could not be scheduled (e.g. no async runtime).
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ErneError {
    /// Shorthand for an [`ErneError::InvalidInput`] with a formatted reason.
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInput(reason.into())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ErneError>;
