//! TOML configuration for the facade and the host it builds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use webcache_store::SqliteConfig;

use crate::error::{Error, Result};
use crate::selector::SelectionPolicy;

/// Default bound on how long `open` may take.
pub const DEFAULT_OPEN_TIMEOUT_MS: u64 = 2_000;

/// Default size hint passed to `open`: 10 MiB.
pub const DEFAULT_SIZE_HINT: u64 = 10 * 1024 * 1024;

/// Facade configuration.
///
/// Every field has a default, so a TOML file only lists what it changes:
///
/// ```
/// use webcache::{BackendKind, StorageConfig};
///
/// let config = StorageConfig::from_toml_str(r#"
///     open_timeout_ms = 500
///     policy = ["sql", "flat"]
///
///     [sqlite]
///     journal_mode = "delete"
/// "#).unwrap();
///
/// assert_eq!(config.policy.order(), &[BackendKind::Sql, BackendKind::Flat]);
/// assert_eq!(config.default_size_hint, 10 * 1024 * 1024);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Milliseconds before a pending `open` is cancelled.
    pub open_timeout_ms: u64,
    /// Size hint used when `open` is not given one.
    pub default_size_hint: u64,
    /// Backend preference order.
    pub policy: SelectionPolicy,
    /// Directory for on-disk databases. In memory when unset.
    pub data_dir: Option<PathBuf>,
    /// Byte quota for the flat store. Unlimited when unset.
    pub flat_quota: Option<u64>,
    /// SQLite connection settings.
    pub sqlite: SqliteConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: DEFAULT_OPEN_TIMEOUT_MS,
            default_size_hint: DEFAULT_SIZE_HINT,
            policy: SelectionPolicy::default(),
            data_dir: None,
            flat_quota: None,
            sqlite: SqliteConfig::default(),
        }
    }
}

impl StorageConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// `open_timeout_ms` as a `Duration`.
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webcache_store::{BackendKind, JournalMode};

    #[test]
    fn empty_document_is_default() {
        assert_eq!(StorageConfig::from_toml_str("").unwrap(), StorageConfig::default());
    }

    #[test]
    fn nested_sqlite_settings() {
        let config = StorageConfig::from_toml_str(
            r#"
            data_dir = "/var/lib/app"
            flat_quota = 5242880

            [sqlite]
            journal_mode = "memory"
            busy_timeout_ms = 100
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, Some(PathBuf::from("/var/lib/app")));
        assert_eq!(config.flat_quota, Some(5_242_880));
        assert_eq!(config.sqlite.journal_mode, JournalMode::Memory);
        assert_eq!(config.sqlite.busy_timeout_ms, 100);
        assert_eq!(config.sqlite.page_size, 4096);
        assert!(!config.sqlite.cap_to_size_hint);
        assert_eq!(config.open_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn unknown_backend_kind_is_rejected() {
        let err = StorageConfig::from_toml_str(r#"policy = ["tape"]"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("webcache.toml");
        std::fs::write(&path, "policy = [\"flat\"]\n").unwrap();

        let config = StorageConfig::from_file(&path).unwrap();
        assert_eq!(config.policy.order(), &[BackendKind::Flat]);

        assert!(StorageConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
