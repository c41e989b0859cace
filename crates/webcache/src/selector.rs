use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use webcache_store::{Adapter, BackendKind};

use crate::host::Host;

/// Ordered list of backend kinds to try.
///
/// Selection walks the list and takes the first facility whose capability
/// probe passes. When nothing in the list is available the host's flat store
/// is used, so selection never fails.
///
/// ```
/// use webcache::{BackendKind, Host, SelectionPolicy};
///
/// let host = Host::in_memory();
/// assert_eq!(SelectionPolicy::default().select(&host).kind(), BackendKind::ObjectStore);
/// assert_eq!(SelectionPolicy::flat_first().select(&host).kind(), BackendKind::Flat);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionPolicy {
    order: Vec<BackendKind>,
}

impl SelectionPolicy {
    /// Try the kinds in `order`.
    pub fn new(order: Vec<BackendKind>) -> Self {
        Self { order }
    }

    /// Flat store first. Every host carries a flat store, so the other
    /// backends are never reached under this policy.
    pub fn flat_first() -> Self {
        Self::new(vec![
            BackendKind::Flat,
            BackendKind::ObjectStore,
            BackendKind::Sql,
        ])
    }

    /// The kinds in the order they are tried.
    pub fn order(&self) -> &[BackendKind] {
        &self.order
    }

    /// Pick the adapter for `host`.
    pub fn select(&self, host: &Host) -> Arc<dyn Adapter> {
        for kind in &self.order {
            if let Some(adapter) = host.adapters_of(*kind).find(|adapter| adapter.probe()) {
                debug!(backend = %kind, "selected storage backend");
                return Arc::clone(adapter);
            }
            debug!(backend = %kind, "storage backend unavailable");
        }
        debug!("no preferred backend available, using flat store");
        host.fallback()
    }
}

impl Default for SelectionPolicy {
    /// Most capable first: object store, then SQL, then flat.
    fn default() -> Self {
        Self::new(vec![
            BackendKind::ObjectStore,
            BackendKind::Sql,
            BackendKind::Flat,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webcache_store::{FlatAdapter, Location, SqliteConfig};

    #[test]
    fn default_prefers_object_store() {
        let host = Host::in_memory();
        assert_eq!(
            SelectionPolicy::default().select(&host).kind(),
            BackendKind::ObjectStore
        );
    }

    #[test]
    fn unavailable_kinds_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let host = Host::flat_only()
            .with_object_store(Location::Directory(dir.path().join("gone")))
            .with_sql(Location::InMemory, SqliteConfig::default());

        assert_eq!(
            SelectionPolicy::default().select(&host).kind(),
            BackendKind::Sql
        );
    }

    #[test]
    fn empty_policy_falls_back_to_flat() {
        let host = Host::in_memory();
        let adapter = SelectionPolicy::new(Vec::new()).select(&host);
        assert_eq!(adapter.kind(), BackendKind::Flat);
    }

    #[test]
    fn explicit_order_is_honored() {
        let host = Host::in_memory();
        let policy = SelectionPolicy::new(vec![BackendKind::Sql, BackendKind::ObjectStore]);
        assert_eq!(policy.select(&host).kind(), BackendKind::Sql);
        assert_eq!(policy.order(), &[BackendKind::Sql, BackendKind::ObjectStore]);
    }

    #[test]
    fn flat_first_wins_even_with_capable_backends() {
        let host = Host::in_memory().with_adapter(Arc::new(FlatAdapter::default()));
        assert_eq!(
            SelectionPolicy::flat_first().select(&host).kind(),
            BackendKind::Flat
        );
    }
}
