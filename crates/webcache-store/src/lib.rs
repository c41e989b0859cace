//! # webcache-store
//!
//! Storage adapters for [`webcache`](https://docs.rs/webcache).
//!
//! Each adapter maps the same five-operation contract (open, put, get,
//! remove, clear) onto one host storage engine. Values are always strings at
//! this layer; structured values are serialized by the facade crate.
//!
//! ## Quick Start
//!
//! ```
//! use webcache_store::{Adapter, DbIdentity, FlatAdapter, OpenRequest};
//!
//! let adapter = FlatAdapter::default();
//! let request = OpenRequest::new(DbIdentity::new("app", 1).unwrap(), 0);
//! let backend = adapter.open(&request).unwrap();
//!
//! backend.put("user:1", r#"{"name":"a"}"#).unwrap();
//! assert_eq!(backend.get("user:1").unwrap().as_deref(), Some(r#"{"name":"a"}"#));
//! ```
//!
//! ## Adapters
//!
//! | Adapter | Feature flag | Engine |
//! |---------|-------------|--------|
//! | [`FlatAdapter`] | *(always available)* | shared in-process string map |
//! | `ObjectStoreAdapter` | `redb` | transactional object store on redb |
//! | `SqlAdapter` | `sqlite` | one `cache` table in SQLite |

mod error;
mod flat;
#[cfg(feature = "redb")]
mod redb;
#[cfg(feature = "sqlite")]
mod sqlite;
mod traits;

pub use error::{OpenError, StoreError};
pub use flat::{FlatAdapter, FlatStore};
#[cfg(feature = "redb")]
pub use redb::{ObjectStoreAdapter, OpenState, STORE_NAME};
#[cfg(feature = "sqlite")]
pub use sqlite::{JournalMode, SqlAdapter, SqliteConfig};
pub use traits::*;

/// Milliseconds since the Unix epoch, used for record timestamps.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
