//! Object-store adapter using [`redb`](https://docs.rs/redb).
//!
//! Each database holds one store of records keyed by `id`, plus a metadata
//! table recording the schema version. Opening a database at a higher
//! version runs the upgrade step, which creates the store. Opening at the
//! recorded version expects the store to be there already.
//!
//! Enable with `features = ["redb"]`.
//!
//! ```
//! use webcache_store::{Adapter, DbIdentity, Location, ObjectStoreAdapter, OpenRequest};
//!
//! let adapter = ObjectStoreAdapter::new(Location::InMemory);
//! let request = OpenRequest::new(DbIdentity::new("app", 1).unwrap(), 0);
//! let backend = adapter.open(&request).unwrap();
//! backend.put("s1", "hello").unwrap();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use redb::{Database, DatabaseError, ReadableTable, TableDefinition, TableError};
use tracing::debug;

use crate::error::{OpenError, StoreError};
use crate::traits::{
    Adapter, Backend, BackendKind, DbIdentity, Location, OpenRequest, PutOutcome, Record,
};

// ── Table definitions ───────────────────────────────────────────────

/// Name of the single object store inside every database.
pub const STORE_NAME: &str = "__webcached_db_name__";

const STORE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new(STORE_NAME);
const META_TABLE: TableDefinition<&str, u32> = TableDefinition::new("__webcached_meta__");
const VERSION_KEY: &str = "version";

fn err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Redb(e.to_string())
}

// ── Open state ──────────────────────────────────────────────────────

/// Lifecycle of one database name's most recent open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenState {
    /// No open has been attempted.
    Unopened,
    /// An open request is in flight.
    Opening,
    /// The last open produced a handle.
    Ready,
    /// The last open failed.
    Failed,
}

// ── Adapter ─────────────────────────────────────────────────────────

/// Adapter that opens one redb database per name.
///
/// In-memory databases are kept by the adapter, so reopening a name sees the
/// data written through earlier handles.
pub struct ObjectStoreAdapter {
    location: Location,
    in_memory: Mutex<HashMap<String, Arc<Database>>>,
    states: Mutex<HashMap<String, OpenState>>,
}

impl ObjectStoreAdapter {
    /// Adapter storing databases at `location`.
    pub fn new(location: Location) -> Self {
        Self {
            location,
            in_memory: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// State of the most recent open of `name`. Opens of other names do not
    /// affect it.
    pub fn state(&self, name: &str) -> OpenState {
        self.states
            .lock()
            .map(|states| states.get(name).copied().unwrap_or(OpenState::Unopened))
            .unwrap_or(OpenState::Failed)
    }

    fn transition(&self, identity: &DbIdentity, next: OpenState) {
        if let Ok(mut states) = self.states.lock() {
            let state = states
                .entry(identity.name().to_string())
                .or_insert(OpenState::Unopened);
            debug!(db = %identity, from = ?*state, to = ?next, "object store open");
            *state = next;
        }
    }

    fn connect(&self, name: &str) -> Result<Arc<Database>, OpenError> {
        if let Some(path) = self.location.file_for(name, "redb") {
            return match Database::create(path) {
                Ok(db) => Ok(Arc::new(db)),
                Err(DatabaseError::DatabaseAlreadyOpen) => Err(OpenError::Blocked(format!(
                    "database {name:?} is held by another connection"
                ))),
                Err(e) => Err(err(e).into()),
            };
        }

        let mut in_memory = self.in_memory.lock().map_err(|_| StoreError::LockPoisoned)?;
        if let Some(db) = in_memory.get(name) {
            return Ok(Arc::clone(db));
        }
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(err)?;
        let db = Arc::new(db);
        in_memory.insert(name.to_string(), Arc::clone(&db));
        Ok(db)
    }

    fn open_database(&self, request: &OpenRequest) -> Result<Box<dyn Backend>, OpenError> {
        let identity = &request.identity;
        let requested = identity.version();
        let db = self.connect(identity.name())?;

        match stored_version(&db)? {
            Some(found) if found > requested => {
                return Err(OpenError::VersionConflict { requested, found });
            }
            Some(found) if found == requested => {}
            found => {
                debug!(db = %identity, ?found, "upgrade needed");
                upgrade(&db, request)?;
            }
        }

        if !has_store(&db)? {
            return Err(OpenError::StoreMissing);
        }
        request.check_cancelled()?;
        debug!(db = %identity, size_hint = request.size_hint, "object store ready");
        Ok(Box::new(ObjectStoreBackend { db }))
    }
}

impl Adapter for ObjectStoreAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn probe(&self) -> bool {
        self.location.is_usable()
    }

    fn open(&self, request: &OpenRequest) -> Result<Box<dyn Backend>, OpenError> {
        self.transition(&request.identity, OpenState::Opening);
        let result = self.open_database(request);
        let next = if result.is_ok() {
            OpenState::Ready
        } else {
            OpenState::Failed
        };
        self.transition(&request.identity, next);
        result
    }
}

/// Version recorded in the metadata table, `None` for a fresh database.
fn stored_version(db: &Database) -> Result<Option<u32>, StoreError> {
    let txn = db.begin_read().map_err(err)?;
    let meta = match txn.open_table(META_TABLE) {
        Ok(table) => table,
        Err(TableError::TableDoesNotExist(_)) => return Ok(None),
        Err(e) => return Err(err(e)),
    };
    let version = meta.get(VERSION_KEY).map_err(err)?.map(|guard| guard.value());
    Ok(version)
}

fn has_store(db: &Database) -> Result<bool, StoreError> {
    let txn = db.begin_read().map_err(err)?;
    match txn.open_table(STORE_TABLE) {
        Ok(_) => Ok(true),
        Err(TableError::TableDoesNotExist(_)) => Ok(false),
        Err(e) => Err(err(e)),
    }
}

/// Create the store and record the new version in one write transaction.
fn upgrade(db: &Database, request: &OpenRequest) -> Result<(), OpenError> {
    let txn = db.begin_write().map_err(err)?;
    txn.open_table(STORE_TABLE).map_err(err)?;
    {
        let mut meta = txn.open_table(META_TABLE).map_err(err)?;
        meta.insert(VERSION_KEY, request.identity.version())
            .map_err(err)?;
    }
    if let Err(cancelled) = request.check_cancelled() {
        txn.abort().map_err(err)?;
        return Err(cancelled);
    }
    txn.commit().map_err(err)?;
    Ok(())
}

// ── Backend ─────────────────────────────────────────────────────────

/// An open redb database. Every operation runs in its own transaction
/// scoped to the single store.
struct ObjectStoreBackend {
    db: Arc<Database>,
}

fn encode_record(record: &Record) -> Result<Vec<u8>, StoreError> {
    postcard::to_allocvec(record).map_err(|e| StoreError::Encode(e.to_string()))
}

fn decode_record(bytes: &[u8]) -> Result<Record, StoreError> {
    postcard::from_bytes(bytes).map_err(|e| StoreError::Decode(e.to_string()))
}

impl Backend for ObjectStoreBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::ObjectStore
    }

    fn put(&self, key: &str, value: &str) -> Result<PutOutcome, StoreError> {
        let encoded = encode_record(&Record::new(key, value))?;
        let txn = self.db.begin_write().map_err(err)?;
        let replaced = {
            let mut table = txn.open_table(STORE_TABLE).map_err(err)?;
            let previous = table.insert(key, encoded.as_slice()).map_err(err)?;
            previous.is_some()
        };
        txn.commit().map_err(err)?;
        Ok(if replaced {
            PutOutcome::Updated
        } else {
            PutOutcome::Inserted
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(STORE_TABLE).map_err(err)?;
        match table.get(key).map_err(err)? {
            Some(guard) => Ok(Some(decode_record(guard.value())?.content)),
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> Result<u64, StoreError> {
        let txn = self.db.begin_write().map_err(err)?;
        let removed = {
            let mut table = txn.open_table(STORE_TABLE).map_err(err)?;
            let previous = table.remove(key).map_err(err)?;
            previous.is_some()
        };
        txn.commit().map_err(err)?;
        Ok(u64::from(removed))
    }

    fn clear(&self) -> Result<u64, StoreError> {
        let txn = self.db.begin_write().map_err(err)?;
        let removed = {
            let mut table = txn.open_table(STORE_TABLE).map_err(err)?;

            // Collect keys first: the table can't be mutated while iterating.
            let mut keys = Vec::new();
            for item in table.iter().map_err(err)? {
                let (key_guard, _) = item.map_err(err)?;
                keys.push(key_guard.value().to_string());
            }
            for key in &keys {
                table.remove(key.as_str()).map_err(err)?;
            }
            keys.len() as u64
        };
        txn.commit().map_err(err)?;
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(STORE_TABLE).map_err(err)?;
        let mut keys = Vec::new();
        for item in table.iter().map_err(err)? {
            let (key_guard, _) = item.map_err(err)?;
            keys.push(key_guard.value().to_string());
        }
        Ok(keys)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, version: u32) -> OpenRequest {
        OpenRequest::new(DbIdentity::new(name, version).unwrap(), 0)
    }

    fn new_backend() -> Box<dyn Backend> {
        ObjectStoreAdapter::new(Location::InMemory)
            .open(&request("test", 1))
            .unwrap()
    }

    fn disk_adapter(dir: &tempfile::TempDir) -> ObjectStoreAdapter {
        ObjectStoreAdapter::new(Location::Directory(dir.path().to_path_buf()))
    }

    #[test]
    fn put_get_remove() {
        let backend = new_backend();
        assert_eq!(backend.put("k1", "hello").unwrap(), PutOutcome::Inserted);
        assert_eq!(backend.get("k1").unwrap().as_deref(), Some("hello"));

        assert_eq!(backend.put("k1", "world").unwrap(), PutOutcome::Updated);
        assert_eq!(backend.get("k1").unwrap().as_deref(), Some("world"));
        assert_eq!(backend.len().unwrap(), 1);

        assert_eq!(backend.remove("k1").unwrap(), 1);
        assert_eq!(backend.get("k1").unwrap(), None);
    }

    #[test]
    fn missing_key_is_not_an_error() {
        let backend = new_backend();
        assert_eq!(backend.get("nope").unwrap(), None);
        assert_eq!(backend.remove("nope").unwrap(), 0);
    }

    #[test]
    fn clear_removes_everything() {
        let backend = new_backend();
        backend.put("b", "2").unwrap();
        backend.put("a", "1").unwrap();
        backend.put("c", "3").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["a", "b", "c"]); // sorted by redb

        assert_eq!(backend.clear().unwrap(), 3);
        assert!(backend.is_empty().unwrap());
        assert_eq!(backend.get("a").unwrap(), None);
    }

    #[test]
    fn state_tracks_last_open() {
        let adapter = ObjectStoreAdapter::new(Location::InMemory);
        assert_eq!(adapter.state("db"), OpenState::Unopened);

        adapter.open(&request("db", 2)).unwrap();
        assert_eq!(adapter.state("db"), OpenState::Ready);

        assert!(adapter.open(&request("db", 1)).is_err());
        assert_eq!(adapter.state("db"), OpenState::Failed);
    }

    #[test]
    fn state_is_kept_per_name() {
        let adapter = ObjectStoreAdapter::new(Location::InMemory);
        adapter.open(&request("ready", 1)).unwrap();
        adapter.open(&request("broken", 3)).unwrap();
        assert!(adapter.open(&request("broken", 2)).is_err());

        assert_eq!(adapter.state("ready"), OpenState::Ready);
        assert_eq!(adapter.state("broken"), OpenState::Failed);
        assert_eq!(adapter.state("other"), OpenState::Unopened);
    }

    #[test]
    fn in_memory_reopen_sees_data() {
        let adapter = ObjectStoreAdapter::new(Location::InMemory);
        adapter
            .open(&request("db", 1))
            .unwrap()
            .put("k", "v")
            .unwrap();

        let again = adapter.open(&request("db", 1)).unwrap();
        assert_eq!(again.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn version_upgrade_keeps_records() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = disk_adapter(&dir);
        {
            let backend = adapter.open(&request("app", 1)).unwrap();
            backend.put("k", "value").unwrap();
        }

        let backend = adapter.open(&request("app", 2)).unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("value"));
    }

    #[test]
    fn lower_version_conflicts() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = disk_adapter(&dir);
        drop(adapter.open(&request("app", 3)).unwrap());

        let err = adapter.open(&request("app", 2)).err().unwrap();
        assert!(matches!(
            err,
            OpenError::VersionConflict {
                requested: 2,
                found: 3
            }
        ));
    }

    #[test]
    fn second_connection_is_blocked() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = disk_adapter(&dir);
        let _held = adapter.open(&request("app", 1)).unwrap();

        let err = adapter.open(&request("app", 1)).err().unwrap();
        assert!(matches!(err, OpenError::Blocked(_)), "got {err}");
    }

    #[test]
    fn missing_store_fails_open() {
        let dir = tempfile::tempdir().unwrap();
        {
            // A database at version 1 that never ran the upgrade step.
            let db = Database::create(dir.path().join("bare.redb")).unwrap();
            let txn = db.begin_write().unwrap();
            {
                let mut meta = txn.open_table(META_TABLE).unwrap();
                meta.insert(VERSION_KEY, 1u32).unwrap();
            }
            txn.commit().unwrap();
        }

        let err = disk_adapter(&dir).open(&request("bare", 1)).err().unwrap();
        assert!(matches!(err, OpenError::StoreMissing));
        assert_eq!(err.to_string(), "ObjectStore missed");
    }

    #[test]
    fn cancelled_upgrade_leaves_database_unversioned() {
        let adapter = ObjectStoreAdapter::new(Location::InMemory);
        let req = request("db", 1);
        req.cancel.cancel();
        assert!(matches!(
            adapter.open(&req).err().unwrap(),
            OpenError::Cancelled
        ));

        let db = adapter.connect("db").unwrap();
        assert_eq!(stored_version(&db).unwrap(), None);
        assert!(!has_store(&db).unwrap());
    }

    #[test]
    fn records_carry_timestamps() {
        let adapter = ObjectStoreAdapter::new(Location::InMemory);
        adapter
            .open(&request("db", 1))
            .unwrap()
            .put("k", "v")
            .unwrap();

        let db = adapter.connect("db").unwrap();
        let txn = db.begin_read().unwrap();
        let table = txn.open_table(STORE_TABLE).unwrap();
        let record = decode_record(table.get("k").unwrap().unwrap().value()).unwrap();
        assert_eq!(record.id, "k");
        assert_eq!(record.content, "v");
        assert!(record.timestamp.is_some());
    }

    #[test]
    fn open_logs_size_hint() {
        let adapter = ObjectStoreAdapter::new(Location::InMemory);
        let request = OpenRequest::new(DbIdentity::new("db", 1).unwrap(), 10_485_760);
        let (opened, logs) = crate::test_log::capture(|| adapter.open(&request).is_ok());
        assert!(opened);
        assert!(logs.contains("size_hint=10485760"), "{logs}");
    }
}
