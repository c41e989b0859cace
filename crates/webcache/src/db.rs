//! The facade: one session object per logical database.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use webcache_store::{
    Adapter, Backend, BackendKind, DbIdentity, OpenRequest, PutOutcome, StoreError,
};

use crate::callbacks::Callbacks;
use crate::codec;
use crate::config::StorageConfig;
use crate::error::{Error, Result};
use crate::host::Host;

/// Shared reference to an opened backend.
///
/// Cloning is cheap; every clone talks to the same backend instance.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    identity: DbIdentity,
    backend: Box<dyn Backend>,
}

impl DbHandle {
    fn new(identity: DbIdentity, backend: Box<dyn Backend>) -> Self {
        Self {
            inner: Arc::new(HandleInner { identity, backend }),
        }
    }

    /// Name and version the handle was opened with.
    pub fn identity(&self) -> &DbIdentity {
        &self.inner.identity
    }

    /// Engine behind the handle.
    pub fn kind(&self) -> BackendKind {
        self.inner.backend.kind()
    }

    /// Direct access to the string-level backend.
    pub fn backend(&self) -> &dyn Backend {
        self.inner.backend.as_ref()
    }

    /// Whether two handles refer to the same opened backend.
    pub fn same_as(&self, other: &DbHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbHandle")
            .field("identity", &self.inner.identity)
            .field("kind", &self.kind())
            .finish()
    }
}

/// Key/value session over the backend chosen for a host.
///
/// The backend is selected once, when the `CachedDb` is built. The first
/// successful [`open`](Self::open) caches its handle; later opens return that
/// handle without touching the backend until [`close`](Self::close) is
/// called.
///
/// Every operation returns a future and has a `*_with` variant taking
/// [`Callbacks`], notified from the same completion path.
pub struct CachedDb {
    adapter: Arc<dyn Adapter>,
    config: StorageConfig,
    handle: OnceCell<DbHandle>,
}

impl CachedDb {
    /// Select a backend from `host` using `config.policy`.
    pub fn new(host: &Host, config: StorageConfig) -> Self {
        let adapter = config.policy.select(host);
        Self {
            adapter,
            config,
            handle: OnceCell::new(),
        }
    }

    /// Build the host described by `config`, then select from it.
    pub fn from_config(config: StorageConfig) -> Self {
        let host = Host::from_config(&config);
        Self::new(&host, config)
    }

    /// Kind of the selected backend.
    pub fn backend_kind(&self) -> BackendKind {
        self.adapter.kind()
    }

    /// Configuration in use.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The cached handle, if `open` has succeeded.
    pub fn handle(&self) -> Option<&DbHandle> {
        self.handle.get()
    }

    /// Whether a handle is cached.
    pub fn is_open(&self) -> bool {
        self.handle.initialized()
    }

    /// Release the cached handle so the next `open` sets up again.
    pub fn close(&mut self) -> Option<DbHandle> {
        let handle = self.handle.take();
        if let Some(handle) = &handle {
            debug!(db = %handle.identity(), "closed");
        }
        handle
    }

    // ── open ────────────────────────────────────────────────────────

    /// Open `name` at `version` with the configured default size hint.
    pub async fn open(&self, name: &str, version: u32) -> Result<DbHandle> {
        self.open_with(name, version, self.config.default_size_hint, Callbacks::new())
            .await
    }

    /// Open with an explicit size hint in bytes.
    pub async fn open_with_size(&self, name: &str, version: u32, size_hint: u64) -> Result<DbHandle> {
        self.open_with(name, version, size_hint, Callbacks::new()).await
    }

    /// Open and notify `callbacks`.
    ///
    /// Resolves immediately with the cached handle when one exists, whatever
    /// name and version are passed.
    pub async fn open_with(
        &self,
        name: &str,
        version: u32,
        size_hint: u64,
        callbacks: Callbacks<DbHandle>,
    ) -> Result<DbHandle> {
        let result = self.open_cached(name, version, size_hint).await;
        callbacks.settle(result)
    }

    async fn open_cached(&self, name: &str, version: u32, size_hint: u64) -> Result<DbHandle> {
        if let Some(handle) = self.handle.get() {
            if handle.identity().name() != name || handle.identity().version() != version {
                debug!(
                    cached = %handle.identity(),
                    requested_name = name,
                    requested_version = version,
                    "already open, returning cached handle"
                );
            }
            return Ok(handle.clone());
        }

        let identity = DbIdentity::new(name, version)?;
        let handle = self
            .handle
            .get_or_try_init(|| self.connect(identity, size_hint))
            .await?;
        Ok(handle.clone())
    }

    async fn connect(&self, identity: DbIdentity, size_hint: u64) -> Result<DbHandle> {
        let cancel = CancellationToken::new();
        let request = OpenRequest::new(identity.clone(), size_hint).with_cancel(cancel.clone());
        let adapter = Arc::clone(&self.adapter);
        let timeout = self.config.open_timeout();

        debug!(db = %identity, backend = %adapter.kind(), "opening");
        let task = tokio::task::spawn_blocking(move || adapter.open(&request));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(Ok(backend))) => {
                debug!(db = %identity, "open");
                Ok(DbHandle::new(identity, backend))
            }
            Ok(Ok(Err(error))) => Err(Error::Open(error)),
            Ok(Err(join)) => Err(Error::Task(join.to_string())),
            Err(_) => {
                cancel.cancel();
                warn!(db = %identity, ?timeout, "open timed out, cancelling");
                Err(Error::Timeout(timeout))
            }
        }
    }

    // ── operations ──────────────────────────────────────────────────

    async fn run<R, F>(&self, op: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&dyn Backend) -> Result<R, StoreError> + Send + 'static,
    {
        let handle = self.handle.get().cloned().ok_or(Error::NotOpen)?;
        let outcome = tokio::task::spawn_blocking(move || op(handle.backend()))
            .await
            .map_err(|join| Error::Task(join.to_string()))?;
        Ok(outcome?)
    }

    /// Serialize `value` to JSON and upsert it at `key`.
    ///
    /// A value that cannot be serialized resolves `Ok(PutOutcome::Skipped)`
    /// and nothing is written.
    pub async fn put<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<PutOutcome> {
        self.put_with(key, value, Callbacks::new()).await
    }

    /// [`put`](Self::put) and notify `callbacks`.
    pub async fn put_with<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        callbacks: Callbacks<PutOutcome>,
    ) -> Result<PutOutcome> {
        let result = match codec::encode(key, value) {
            Some(text) => {
                let key = key.to_string();
                self.run(move |backend| backend.put(&key, &text)).await
            }
            None => {
                // Nothing was written, but the database must still be open.
                self.handle
                    .get()
                    .map(|_| PutOutcome::Skipped)
                    .ok_or(Error::NotOpen)
            }
        };
        callbacks.settle(result)
    }

    /// Read `key` and parse it from JSON.
    ///
    /// Resolves `None` when the key is absent or its content does not parse
    /// as `T`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_with(key, Callbacks::new()).await
    }

    /// [`get`](Self::get) and notify `callbacks`.
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        key: &str,
        callbacks: Callbacks<Option<T>>,
    ) -> Result<Option<T>> {
        let result = self
            .fetch(key)
            .await
            .map(|text| text.and_then(|text| codec::decode(key, &text)));
        callbacks.settle(result)
    }

    /// The stored text at `key`, unparsed. Distinguishes an absent key
    /// (`None`) from empty content (`Some("")`).
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        let result = self.fetch(key).await;
        Callbacks::new().settle(result)
    }

    async fn fetch(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.run(move |backend| backend.get(&key)).await
    }

    /// Delete `key`. Resolves with the number of records removed; an absent
    /// key is `Ok(0)`.
    pub async fn remove(&self, key: &str) -> Result<u64> {
        self.remove_with(key, Callbacks::new()).await
    }

    /// [`remove`](Self::remove) and notify `callbacks`.
    pub async fn remove_with(&self, key: &str, callbacks: Callbacks<u64>) -> Result<u64> {
        let key = key.to_string();
        let result = self.run(move |backend| backend.remove(&key)).await;
        callbacks.settle(result)
    }

    /// Delete every record. Resolves with the number removed.
    pub async fn clear(&self) -> Result<u64> {
        self.clear_with(Callbacks::new()).await
    }

    /// [`clear`](Self::clear) and notify `callbacks`.
    pub async fn clear_with(&self, callbacks: Callbacks<u64>) -> Result<u64> {
        let result = self.run(|backend| backend.clear()).await;
        callbacks.settle(result)
    }
}

impl fmt::Debug for CachedDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedDb")
            .field("backend", &self.adapter.kind())
            .field("handle", &self.handle.get())
            .finish()
    }
}
