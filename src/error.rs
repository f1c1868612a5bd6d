//! Error types for synchronization runs.
//!
//! Store and transport calls report failures through `anyhow::Error` so that
//! each implementation can attach its own context. Only the conditions that
//! end a whole run surface as a [`SyncError`]; everything that goes wrong
//! inside a single document unit is absorbed into the run's result.

use std::time::Duration;
use thiserror::Error;

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a synchronization run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The source's document index could not be listed.
    #[error("failed to enumerate documents in {store}: {source:#}")]
    Enumeration {
        /// Name of the store that failed.
        store: String,
        /// Underlying store error.
        #[source]
        source: anyhow::Error,
    },

    /// The run exceeded the configured deadline.
    #[error("synchronization timed out after {0:?}")]
    TimedOut(Duration),

    /// The engine configuration is unusable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SyncError {
    /// Returns true if re-running the same synchronization may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Enumeration { .. } | SyncError::TimedOut(_))
    }
}
