use std::time::Duration;

use thiserror::Error;
use webcache_store::{OpenError, StoreError};

/// Result alias used across the facade.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every way a facade call can fail.
///
/// Serialization problems are deliberately absent: they are logged and
/// swallowed.
#[derive(Debug, Error)]
pub enum Error {
    /// The backend could not be opened. No handle was cached.
    #[error("open failed: {0}")]
    Open(#[from] OpenError),

    /// The backend did not finish opening in time. The open was cancelled.
    #[error("open timed out after {0:?}")]
    Timeout(Duration),

    /// A put/get/remove/clear call failed at the backend.
    #[error("operation failed: {0}")]
    Operation(#[from] StoreError),

    /// An operation was issued before `open` succeeded.
    #[error("database is not open")]
    NotOpen,

    /// The blocking task running the engine call panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),

    /// Configuration could not be read or parsed.
    #[error("invalid configuration: {0}")]
    Config(String),
}
