use std::path::PathBuf;
use std::sync::Arc;

use webcache_store::{
    Adapter, BackendKind, FlatAdapter, FlatStore, Location, ObjectStoreAdapter, SqlAdapter,
    SqliteConfig,
};

use crate::config::StorageConfig;

/// The storage facilities a host environment offers.
///
/// A host always carries a flat store, which is the selector's last resort.
/// The object-store and SQL facilities are optional.
///
/// ```
/// use webcache::{BackendKind, Host};
///
/// let host = Host::flat_only();
/// assert_eq!(host.capabilities(), vec![BackendKind::Flat]);
///
/// let host = Host::in_memory();
/// assert_eq!(host.capabilities().len(), 3);
/// ```
#[derive(Clone)]
pub struct Host {
    adapters: Vec<Arc<dyn Adapter>>,
    flat: Arc<FlatAdapter>,
}

impl Host {
    /// Host offering only `store` as a flat store.
    pub fn new(store: FlatStore) -> Self {
        let flat = Arc::new(FlatAdapter::new(store));
        Self {
            adapters: vec![flat.clone() as Arc<dyn Adapter>],
            flat,
        }
    }

    /// Host offering only a fresh flat store.
    pub fn flat_only() -> Self {
        Self::new(FlatStore::new())
    }

    /// All three facilities, nothing on disk.
    pub fn in_memory() -> Self {
        Self::flat_only()
            .with_object_store(Location::InMemory)
            .with_sql(Location::InMemory, SqliteConfig::default())
    }

    /// Object store and SQL databases under `dir`, plus a fresh flat store.
    pub fn on_disk(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self::flat_only()
            .with_object_store(Location::Directory(dir.clone()))
            .with_sql(Location::Directory(dir), SqliteConfig::default())
    }

    /// Host described by `config`: on disk under `data_dir` when set,
    /// otherwise in memory.
    pub fn from_config(config: &StorageConfig) -> Self {
        let flat = match config.flat_quota {
            Some(quota) => FlatStore::with_quota(quota),
            None => FlatStore::new(),
        };
        let location = match &config.data_dir {
            Some(dir) => Location::Directory(dir.clone()),
            None => Location::InMemory,
        };
        Self::new(flat)
            .with_object_store(location.clone())
            .with_sql(location, config.sqlite.clone())
    }

    /// Offer a redb object store at `location`.
    pub fn with_object_store(self, location: Location) -> Self {
        self.with_builtin(Arc::new(ObjectStoreAdapter::new(location)))
    }

    /// Offer SQLite databases at `location`.
    pub fn with_sql(self, location: Location, config: SqliteConfig) -> Self {
        self.with_builtin(Arc::new(SqlAdapter::with_config(location, config)))
    }

    /// Register a custom adapter. It is tried before any facility of the
    /// same kind registered earlier.
    pub fn with_adapter(mut self, adapter: Arc<dyn Adapter>) -> Self {
        self.adapters.insert(0, adapter);
        self
    }

    // Built-ins go before the flat store, after custom adapters.
    fn with_builtin(mut self, adapter: Arc<dyn Adapter>) -> Self {
        let at = self.adapters.len() - 1;
        self.adapters.insert(at, adapter);
        self
    }

    /// The host's flat store.
    pub fn flat_store(&self) -> &FlatStore {
        self.flat.store()
    }

    /// Kinds whose facility currently passes its capability probe.
    pub fn capabilities(&self) -> Vec<BackendKind> {
        let mut kinds = Vec::new();
        for adapter in &self.adapters {
            let kind = adapter.kind();
            if !kinds.contains(&kind) && adapter.probe() {
                kinds.push(kind);
            }
        }
        kinds
    }

    pub(crate) fn adapters_of(&self, kind: BackendKind) -> impl Iterator<Item = &Arc<dyn Adapter>> {
        self.adapters.iter().filter(move |adapter| adapter.kind() == kind)
    }

    pub(crate) fn fallback(&self) -> Arc<dyn Adapter> {
        self.flat.clone()
    }
}
