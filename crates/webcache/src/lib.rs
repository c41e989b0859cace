//! # webcache
//!
//! One asynchronous key/value API (`open`, `put`, `get`, `remove`, `clear`)
//! over whichever storage backend the host provides: a transactional object
//! store, a SQL table, or a flat string-keyed store.
//!
//! Write storage logic once against [`CachedDb`]; the backend is chosen when
//! the `CachedDb` is built, from an ordered [`SelectionPolicy`] checked
//! against the [`Host`]'s capability probes.
//!
//! ## Quick Start
//!
//! ```
//! use serde::{Deserialize, Serialize};
//! use webcache::{CachedDb, Host, StorageConfig};
//!
//! #[derive(Debug, PartialEq, Serialize, Deserialize)]
//! struct User { name: String }
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let db = CachedDb::new(&Host::in_memory(), StorageConfig::default());
//! db.open("test-db", 1).await.unwrap();
//!
//! db.put("user:1", &User { name: "a".into() }).await.unwrap();
//! let user: Option<User> = db.get("user:1").await.unwrap();
//! assert_eq!(user, Some(User { name: "a".into() }));
//! # });
//! ```
//!
//! ## Serialization
//!
//! Values are stored as JSON text. Failures to serialize or parse are not
//! surfaced as errors: a value that cannot be serialized is skipped
//! ([`PutOutcome::Skipped`]) and malformed stored text reads back as `None`.
//! Both cases are logged at `warn`. Use [`CachedDb::get_raw`] to see the
//! stored text as-is.

mod callbacks;
mod codec;
mod config;
mod db;
mod error;
mod host;
mod selector;

pub use callbacks::Callbacks;
pub use config::StorageConfig;
pub use db::{CachedDb, DbHandle};
pub use error::{Error, Result};
pub use host::Host;
pub use selector::SelectionPolicy;

pub use webcache_store::{
    Adapter, Backend, BackendKind, DbIdentity, FlatAdapter, FlatStore, Location, OpenError,
    OpenRequest, PutOutcome, SqliteConfig, StoreError,
};
