use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{OpenError, StoreError};

/// A stored record.
///
/// `content` is always text: the facade serializes structured values before
/// they reach an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Record key.
    pub id: String,
    /// Serialized value.
    pub content: String,
    /// Last write time in milliseconds since the Unix epoch, if tracked.
    pub timestamp: Option<u64>,
}

impl Record {
    /// Create a record stamped with the current time.
    pub fn new(id: &str, content: &str) -> Self {
        Self {
            id: id.to_string(),
            content: content.to_string(),
            timestamp: Some(crate::now_ms()),
        }
    }
}

/// The three kinds of host storage facility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Transactional object-store engine.
    ObjectStore,
    /// SQL-table embedded database.
    Sql,
    /// Flat synchronous string-keyed store.
    Flat,
}

impl BackendKind {
    /// Stable lowercase name, as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObjectStore => "object-store",
            Self::Sql => "sql",
            Self::Flat => "flat",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a file-backed engine keeps its databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Nothing touches disk.
    InMemory,
    /// One file per database name inside this directory.
    Directory(PathBuf),
}

impl Location {
    /// Capability probe: in-memory always works, a directory must exist and
    /// be writable.
    pub fn is_usable(&self) -> bool {
        match self {
            Self::InMemory => true,
            Self::Directory(dir) => std::fs::metadata(dir)
                .map(|meta| meta.is_dir() && !meta.permissions().readonly())
                .unwrap_or(false),
        }
    }

    /// Path of the database file for `name` with the given extension.
    pub(crate) fn file_for(&self, name: &str, extension: &str) -> Option<PathBuf> {
        match self {
            Self::InMemory => None,
            Self::Directory(dir) => Some(dir.join(format!("{name}.{extension}"))),
        }
    }
}

/// `(name, version)` pair identifying a database. Fixed for the lifetime of
/// an open handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DbIdentity {
    name: String,
    version: u32,
}

impl DbIdentity {
    /// Validate and build an identity.
    ///
    /// Versions start at 1. Names become file stems, so they must be
    /// non-empty and free of path separators.
    pub fn new(name: &str, version: u32) -> Result<Self, OpenError> {
        if version == 0 {
            return Err(OpenError::InvalidVersion(version));
        }
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
            return Err(OpenError::InvalidName(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            version,
        })
    }

    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl fmt::Display for DbIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@v{}", self.name, self.version)
    }
}

/// Everything an adapter needs to open a database.
#[derive(Debug, Clone)]
pub struct OpenRequest {
    /// Database to open.
    pub identity: DbIdentity,
    /// Estimated size in bytes. `0` means no hint.
    pub size_hint: u64,
    /// Cancelled by the caller when it stops waiting for the open.
    pub cancel: CancellationToken,
}

impl OpenRequest {
    /// Build a request with a fresh, never-cancelled token.
    pub fn new(identity: DbIdentity, size_hint: u64) -> Self {
        Self {
            identity,
            size_hint,
            cancel: CancellationToken::new(),
        }
    }

    /// Use the caller's cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Checkpoint for adapters: fail the open if the caller gave up.
    pub fn check_cancelled(&self) -> Result<(), OpenError> {
        if self.cancel.is_cancelled() {
            Err(OpenError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What a `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// A new record was created.
    Inserted,
    /// An existing record was overwritten.
    Updated,
    /// Nothing was written because the value could not be serialized.
    /// Adapters never return this; the facade does.
    Skipped,
}

/// An opened database.
///
/// Every operation is one call against the engine and reports exactly one
/// outcome. Missing keys are never errors.
pub trait Backend: Send + Sync {
    /// Which engine this handle talks to.
    fn kind(&self) -> BackendKind;

    /// Insert or overwrite the record at `key`.
    fn put(&self, key: &str, value: &str) -> Result<PutOutcome, StoreError>;

    /// Content stored at `key`, or `None` if no record exists.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Delete the record at `key`. Returns how many records were removed.
    fn remove(&self, key: &str) -> Result<u64, StoreError>;

    /// Delete every record. Returns how many records were removed.
    fn clear(&self) -> Result<u64, StoreError>;

    /// All keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StoreError>;

    /// Number of stored records.
    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.keys()?.len() as u64)
    }

    /// Whether the store holds no records.
    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Check if a record exists at `key`.
    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key)?.is_some())
    }
}

/// A host storage facility that can be probed and opened.
pub trait Adapter: Send + Sync {
    /// Which engine this adapter opens.
    fn kind(&self) -> BackendKind;

    /// Capability detection. Cheap and side-effect free.
    fn probe(&self) -> bool;

    /// Establish or create storage for `request.identity`, running schema
    /// setup if needed.
    fn open(&self, request: &OpenRequest) -> Result<Box<dyn Backend>, OpenError>;
}
