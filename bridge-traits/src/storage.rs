//! Storage Abstractions
//!
//! Host-provided persistence: the file area holding downloaded listing
//! images, the key-value settings area holding sync progress, and the
//! credential store holding the partner API password.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::Path;

use crate::error::Result;

/// File area for stored assets
///
/// Relative paths are resolved against the implementation's data directory.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn store_image(fs: &dyn FileSystemAccess, data: Bytes) -> Result<()> {
///     fs.write_file(Path::new("assets/pike-place.jpg"), data).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Whether a file exists at `path`
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Replace the contents of `path`, creating parent directories
    ///
    /// Readers never observe a partially written file.
    async fn write_file(&self, path: &Path, data: Bytes) -> Result<()>;

    /// Remove the file at `path`; a missing file is not an error
    async fn delete_file(&self, path: &Path) -> Result<()>;
}

/// Credential storage (Keychain, Secret Service, Credential Manager)
///
/// Implementations must never log secret values.
#[async_trait]
pub trait SecureStore: Send + Sync {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()>;

    /// `Ok(None)` when nothing is stored under `key`
    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn delete_secret(&self, key: &str) -> Result<()>;
}

/// Durable key-value settings area
///
/// Values are typed: reading a key with a different type than it was
/// written with is an error. Reads observe the latest committed write of the
/// same process.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::SettingsStore;
///
/// async fn save_progress(store: &dyn SettingsStore) -> Result<()> {
///     let mut tx = store.begin_transaction().await?;
///     tx.set_string("sync.status", "running").await?;
///     tx.set_i64("sync.processed", 25).await?;
///     tx.commit().await
/// }
/// ```
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    async fn set_bool(&self, key: &str, value: bool) -> Result<()>;

    async fn get_bool(&self, key: &str) -> Result<Option<bool>>;

    async fn set_i64(&self, key: &str, value: i64) -> Result<()>;

    async fn get_i64(&self, key: &str) -> Result<Option<i64>>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// Start a group of writes that becomes visible all at once
    ///
    /// Dropping the transaction without committing discards its writes.
    async fn begin_transaction(&self) -> Result<Box<dyn SettingsTransaction + Send>>;
}

/// Pending group of settings writes
#[async_trait]
pub trait SettingsTransaction: Send {
    async fn set_string(&mut self, key: &str, value: &str) -> Result<()>;

    async fn set_i64(&mut self, key: &str, value: i64) -> Result<()>;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;
}
