use thiserror::Error;

/// Failure of a put/get/remove/clear call against an engine.
///
/// Operation failures are local to the call: they never touch the open
/// handle or other in-flight operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An error from SQLite.
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// An error from redb, flattened to its message.
    #[cfg(feature = "redb")]
    #[error("redb error: {0}")]
    Redb(String),

    /// Filesystem error while preparing storage.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded.
    #[error("record encoding failed: {0}")]
    Encode(String),

    /// A stored record could not be decoded.
    #[error("record decoding failed: {0}")]
    Decode(String),

    /// The flat store refused a write past its quota.
    #[error("quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded {
        /// Bytes the store would hold after the write.
        needed: u64,
        /// Configured limit.
        quota: u64,
    },

    /// Lock poisoned by a panicking writer.
    #[error("store lock poisoned")]
    LockPoisoned,
}

/// Failure to open a database. The caller is left without a handle.
#[derive(Debug, Error)]
pub enum OpenError {
    /// Versions start at 1.
    #[error("invalid database version {0}: versions start at 1")]
    InvalidVersion(u32),

    /// Name is empty or would escape the storage directory.
    #[error("invalid database name {0:?}")]
    InvalidName(String),

    /// Another connection holds the database.
    #[error("open blocked: {0}")]
    Blocked(String),

    /// The database exists at a version this request cannot open.
    #[error("version conflict: requested {requested}, database is at {found}")]
    VersionConflict {
        /// Version passed to open.
        requested: u32,
        /// Version recorded in the database.
        found: u32,
    },

    /// The database opened but the expected store is not in it.
    #[error("ObjectStore missed")]
    StoreMissing,

    /// The caller stopped waiting before the open finished.
    #[error("open cancelled")]
    Cancelled,

    /// Engine error during setup.
    #[error("setup failed: {0}")]
    Setup(#[from] StoreError),
}
