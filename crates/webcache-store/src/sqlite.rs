//! SQL-table adapter using rusqlite.
//!
//! Every database holds one table:
//!
//! ```sql
//! CREATE TABLE cache (id TEXT PRIMARY KEY, content TEXT, timestamp DATETIME)
//! ```
//!
//! The schema version lives in `PRAGMA user_version`. Upserts are an explicit
//! two-step attempt: `INSERT`, then `UPDATE` when the insert is rejected.
//!
//! # Example
//!
//! ```
//! use webcache_store::{Adapter, DbIdentity, Location, OpenRequest, SqlAdapter};
//!
//! let adapter = SqlAdapter::new(Location::InMemory);
//! let request = OpenRequest::new(DbIdentity::new("app", 1).unwrap(), 0);
//! let backend = adapter.open(&request).unwrap();
//!
//! backend.put("s1", "temp=22.5").unwrap();
//! assert_eq!(backend.get("s1").unwrap().as_deref(), Some("temp=22.5"));
//! ```

use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{OpenError, StoreError};
use crate::traits::{Adapter, Backend, BackendKind, Location, OpenRequest, PutOutcome};

/// Connection settings applied to every database the SQL adapter opens.
///
/// Reads from the `[sqlite]` table of the facade's TOML config; fields left
/// out keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// How the `cache` database journals writes (`wal` unless set).
    pub journal_mode: JournalMode,
    /// How long a write waits on a locked database, in ms.
    pub busy_timeout_ms: u32,
    /// Bytes per page for new database files.
    pub page_size: u32,
    /// Turn the open size hint into a hard `max_page_count`. Off unless set:
    /// the hint is then only logged.
    pub cap_to_size_hint: bool,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
            page_size: 4096,
            cap_to_size_hint: false,
        }
    }
}

/// `PRAGMA journal_mode` values the adapter knows how to set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JournalMode {
    /// `WAL`: reads keep going while a `put` commits.
    Wal,
    /// `DELETE`: rollback journal removed after each commit.
    Delete,
    /// `MEMORY`: journal kept in RAM, lost on a crash.
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Adapter that opens one SQLite database per name.
///
/// In-memory databases are private to each open.
#[derive(Debug, Clone)]
pub struct SqlAdapter {
    location: Location,
    config: SqliteConfig,
}

impl SqlAdapter {
    /// Adapter with the default configuration.
    pub fn new(location: Location) -> Self {
        Self::with_config(location, SqliteConfig::default())
    }

    /// Adapter with custom configuration.
    pub fn with_config(location: Location, config: SqliteConfig) -> Self {
        Self { location, config }
    }

    fn connect(&self, name: &str) -> Result<Connection, StoreError> {
        let conn = match self.location.file_for(name, "sqlite") {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.execute_batch(&format!(
            "PRAGMA page_size = {};
             PRAGMA journal_mode = {};
             PRAGMA busy_timeout = {};
             PRAGMA synchronous = NORMAL;",
            self.config.page_size,
            self.config.journal_mode.as_str(),
            self.config.busy_timeout_ms,
        ))?;
        Ok(conn)
    }
}

/// Record the requested version in a fresh database, or check it against
/// the stored one.
fn check_version(conn: &Connection, requested: u32) -> Result<(), OpenError> {
    let found: u32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(StoreError::from)?;
    match found {
        0 => {
            conn.execute_batch(&format!("PRAGMA user_version = {requested};"))
                .map_err(StoreError::from)?;
            Ok(())
        }
        found if found == requested => Ok(()),
        found => Err(OpenError::VersionConflict { requested, found }),
    }
}

/// Pages kept free above the schema when the size hint is a hard cap.
const HEADROOM_PAGES: u64 = 8;

/// Cap the database at `size_hint` bytes, never below what it already
/// holds plus [`HEADROOM_PAGES`]. Runs after the table exists.
fn apply_size_hint(conn: &Connection, size_hint: u64) -> Result<u64, StoreError> {
    let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
    let in_use: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
    let pages = size_hint
        .div_ceil(page_size.max(1) as u64)
        .max(in_use.max(0) as u64 + HEADROOM_PAGES);
    conn.execute_batch(&format!("PRAGMA max_page_count = {pages};"))?;
    Ok(pages)
}

/// Probe for the `cache` table and create it when the probe fails.
fn ensure_table(conn: &Connection) -> Result<(), StoreError> {
    let probe = conn.query_row("SELECT id FROM cache LIMIT 1", [], |_| Ok(()));
    match probe {
        Ok(()) | Err(rusqlite::Error::QueryReturnedNoRows) => Ok(()),
        Err(missing) => {
            debug!(error = %missing, "cache table probe failed, creating table");
            conn.execute_batch(
                "CREATE TABLE cache (id TEXT PRIMARY KEY, content TEXT, timestamp DATETIME)",
            )?;
            Ok(())
        }
    }
}

impl Adapter for SqlAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn probe(&self) -> bool {
        self.location.is_usable()
    }

    fn open(&self, request: &OpenRequest) -> Result<Box<dyn Backend>, OpenError> {
        let identity = &request.identity;
        let conn = self.connect(identity.name())?;
        check_version(&conn, identity.version())?;
        request.check_cancelled()?;
        ensure_table(&conn)?;
        if self.config.cap_to_size_hint && request.size_hint > 0 {
            let pages = apply_size_hint(&conn, request.size_hint)?;
            debug!(db = %identity, max_pages = pages, "size hint applied as page cap");
        }
        request.check_cancelled()?;
        debug!(db = %identity, size_hint = request.size_hint, "sql database ready");
        Ok(Box::new(SqlBackend {
            conn: Mutex::new(conn),
        }))
    }
}

/// An open SQLite database, behind a `Mutex` for shared access.
struct SqlBackend {
    conn: Mutex<Connection>,
}

impl SqlBackend {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn try_insert(conn: &Connection, key: &str, value: &str, now: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO cache (content, timestamp, id) VALUES (?1, ?2, ?3)",
        params![value, now, key],
    )
}

fn try_update(conn: &Connection, key: &str, value: &str, now: i64) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE cache SET content = ?1, timestamp = ?2 WHERE id = ?3",
        params![value, now, key],
    )
}

impl Backend for SqlBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Sql
    }

    fn put(&self, key: &str, value: &str) -> Result<PutOutcome, StoreError> {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;
        let now = crate::now_ms() as i64;
        let outcome = match try_insert(&tx, key, value, now) {
            Ok(_) => PutOutcome::Inserted,
            Err(rejected) => {
                debug!(key, error = %rejected, "insert rejected, updating existing row");
                match try_update(&tx, key, value, now)? {
                    0 => return Err(rejected.into()),
                    _ => PutOutcome::Updated,
                }
            }
        };
        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock()?;
        let content: Option<Option<String>> = conn
            .query_row(
                "SELECT content FROM cache WHERE id = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(content.flatten())
    }

    fn remove(&self, key: &str) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM cache WHERE id = ?1", params![key])?;
        Ok(deleted as u64)
    }

    fn clear(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM cache", [])?;
        Ok(deleted as u64)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id FROM cache ORDER BY id")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(keys)
    }

    fn len(&self) -> Result<u64, StoreError> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::DbIdentity;

    fn request(name: &str, version: u32) -> OpenRequest {
        OpenRequest::new(DbIdentity::new(name, version).unwrap(), 0)
    }

    fn test_backend() -> Box<dyn Backend> {
        SqlAdapter::new(Location::InMemory)
            .open(&request("test", 1))
            .unwrap()
    }

    #[test]
    fn put_get_remove() {
        let backend = test_backend();

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
        let backend = test_backend();
        assert_eq!(backend.get("nope").unwrap(), None);
        assert_eq!(backend.remove("nope").unwrap(), 0);
    }

    #[test]
    fn clear_and_keys() {
        let backend = test_backend();
        backend.put("b", "2").unwrap();
        backend.put("a", "1").unwrap();
        assert_eq!(backend.keys().unwrap(), vec!["a", "b"]);

        assert_eq!(backend.clear().unwrap(), 2);
        assert!(backend.is_empty().unwrap());
    }

    #[test]
    fn update_stamps_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SqlAdapter::new(Location::Directory(dir.path().to_path_buf()));
        let backend = adapter.open(&request("stamps", 1)).unwrap();
        backend.put("k", "v1").unwrap();
        backend.put("k", "v2").unwrap();
        drop(backend);

        let conn = Connection::open(dir.path().join("stamps.sqlite")).unwrap();
        let (rows, stamp): (i64, i64) = conn
            .query_row("SELECT COUNT(*), MAX(timestamp) FROM cache", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(rows, 1);
        assert!(stamp > 0);
    }

    #[test]
    fn reopen_keeps_data_and_checks_version() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SqlAdapter::new(Location::Directory(dir.path().to_path_buf()));

        {
            let backend = adapter.open(&request("app", 2)).unwrap();
            backend.put("k", "persist").unwrap();
        }

        let backend = adapter.open(&request("app", 2)).unwrap();
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("persist"));
        drop(backend);

        let err = adapter.open(&request("app", 3)).err().unwrap();
        assert!(matches!(
            err,
            OpenError::VersionConflict {
                requested: 3,
                found: 2
            }
        ));
    }

    #[test]
    fn existing_table_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                "CREATE TABLE cache (id TEXT PRIMARY KEY, content TEXT, timestamp DATETIME);
                 INSERT INTO cache (id, content, timestamp) VALUES ('old', '\"x\"', 1);",
            )
            .unwrap();
        }

        let adapter = SqlAdapter::new(Location::Directory(dir.path().to_path_buf()));
        let backend = adapter.open(&request("legacy", 1)).unwrap();
        assert_eq!(backend.get("old").unwrap().as_deref(), Some("\"x\""));
    }

    #[test]
    fn cancelled_open_fails() {
        let req = request("cancelled", 1);
        req.cancel.cancel();
        let err = SqlAdapter::new(Location::InMemory).open(&req).err().unwrap();
        assert!(matches!(err, OpenError::Cancelled));
    }

    #[test]
    fn unusable_directory_fails_probe() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = SqlAdapter::new(Location::Directory(dir.path().join("missing")));
        assert!(!adapter.probe());
    }

    fn capped(size_hint: u64) -> Box<dyn Backend> {
        let config = SqliteConfig {
            cap_to_size_hint: true,
            ..SqliteConfig::default()
        };
        let req = OpenRequest::new(DbIdentity::new("capped", 1).unwrap(), size_hint);
        SqlAdapter::with_config(Location::InMemory, config)
            .open(&req)
            .unwrap()
    }

    #[test]
    fn small_size_hint_is_advisory_by_default() {
        for hint in [1, 4096, 8192, 16 * 1024] {
            let req = OpenRequest::new(DbIdentity::new("hinted", 1).unwrap(), hint);
            let backend = SqlAdapter::new(Location::InMemory).open(&req).unwrap();
            backend.put("big", &"x".repeat(20_000)).unwrap();
            assert_eq!(backend.get("big").unwrap().map(|v| v.len()), Some(20_000));
        }
    }

    #[test]
    fn capped_open_leaves_room_for_schema() {
        let backend = capped(1);
        assert_eq!(backend.put("k", "small").unwrap(), PutOutcome::Inserted);
        assert_eq!(backend.put("k", "again").unwrap(), PutOutcome::Updated);
        assert_eq!(backend.get("k").unwrap().as_deref(), Some("again"));
    }

    #[test]
    fn full_database_rejects_new_key_with_insert_error() {
        let backend = capped(1);
        backend.put("small", "fits").unwrap();

        let err = backend.put("huge", &"x".repeat(1_000_000)).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)), "{err}");
        assert_eq!(backend.get("huge").unwrap(), None);
        assert_eq!(backend.keys().unwrap(), vec!["small"]);
    }
}
