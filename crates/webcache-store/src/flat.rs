use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use crate::error::{OpenError, StoreError};
use crate::traits::{Adapter, Backend, BackendKind, OpenRequest, PutOutcome};

/// Flat string-keyed store.
///
/// All data lives in a shared `BTreeMap`; clones see the same entries, the
/// way every page of an origin sees the same host store. An optional quota
/// caps the total bytes of keys plus values.
///
/// # Example
///
/// ```
/// use webcache_store::FlatStore;
///
/// let store = FlatStore::new();
/// store.set_item("greeting", "hello").unwrap();
///
/// let other = store.clone();
/// assert_eq!(other.get_item("greeting").unwrap().as_deref(), Some("hello"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct FlatStore {
    inner: Arc<Mutex<FlatState>>,
}

#[derive(Debug, Default)]
struct FlatState {
    entries: BTreeMap<String, String>,
    used_bytes: u64,
    quota: Option<u64>,
}

fn entry_size(key: &str, value: &str) -> u64 {
    (key.len() + value.len()) as u64
}

impl FlatStore {
    /// Create an empty store with no quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that rejects writes past `quota` bytes.
    pub fn with_quota(quota: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(FlatState {
                quota: Some(quota),
                ..FlatState::default()
            })),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, FlatState>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Store `value` at `key`, returning the previous value.
    pub fn set_item(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.lock()?;
        let replaced = state
            .entries
            .get(key)
            .map(|old| entry_size(key, old))
            .unwrap_or(0);
        let needed = state.used_bytes - replaced + entry_size(key, value);
        if let Some(quota) = state.quota {
            if needed > quota {
                return Err(StoreError::QuotaExceeded { needed, quota });
            }
        }
        state.used_bytes = needed;
        Ok(state.entries.insert(key.to_string(), value.to_string()))
    }

    /// Value at `key`, if any.
    pub fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lock()?.entries.get(key).cloned())
    }

    /// Remove `key`, returning the value it held.
    pub fn remove_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut state = self.lock()?;
        let removed = state.entries.remove(key);
        if let Some(old) = &removed {
            state.used_bytes -= entry_size(key, old);
        }
        Ok(removed)
    }

    /// Remove every entry, returning how many there were.
    pub fn clear_items(&self) -> Result<usize, StoreError> {
        let mut state = self.lock()?;
        let count = state.entries.len();
        state.entries.clear();
        state.used_bytes = 0;
        Ok(count)
    }

    /// Bytes currently used by keys and values.
    pub fn used_bytes(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.used_bytes)
    }
}

impl Backend for FlatStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    fn put(&self, key: &str, value: &str) -> Result<PutOutcome, StoreError> {
        match self.set_item(key, value)? {
            Some(_) => Ok(PutOutcome::Updated),
            None => Ok(PutOutcome::Inserted),
        }
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.get_item(key)
    }

    fn remove(&self, key: &str) -> Result<u64, StoreError> {
        Ok(u64::from(self.remove_item(key)?.is_some()))
    }

    fn clear(&self) -> Result<u64, StoreError> {
        Ok(self.clear_items()? as u64)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.lock()?.entries.keys().cloned().collect())
    }

    fn len(&self) -> Result<u64, StoreError> {
        Ok(self.lock()?.entries.len() as u64)
    }

    fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.entries.contains_key(key))
    }
}

/// Adapter over a [`FlatStore`]. Opening always succeeds and hands out the
/// shared store; the database name and version are not used.
#[derive(Debug, Clone, Default)]
pub struct FlatAdapter {
    store: FlatStore,
}

impl FlatAdapter {
    /// Wrap an existing store.
    pub fn new(store: FlatStore) -> Self {
        Self { store }
    }

    /// The store every open hands out.
    pub fn store(&self) -> &FlatStore {
        &self.store
    }
}

impl Adapter for FlatAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::Flat
    }

    fn probe(&self) -> bool {
        true
    }

    fn open(&self, request: &OpenRequest) -> Result<Box<dyn Backend>, OpenError> {
        debug!(db = %request.identity, size_hint = request.size_hint, "flat store ready");
        Ok(Box::new(self.store.clone()))
    }
}
