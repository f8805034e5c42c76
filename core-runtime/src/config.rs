//! # Sync Configuration Module
//!
//! Provides configuration management for the listing synchronization engine.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a [`SyncConfig`]
//! instance that holds the remote endpoint, credentials, chunking parameters and
//! local storage locations. It enforces fail-fast validation so that a bad
//! deployment is rejected at bootstrap instead of during the first chunk.
//!
//! ## Required Settings
//!
//! - `api_url` - Remote listing API endpoint
//! - `api_username` - Account used for every remote request
//! - `database_path` - SQLite database holding listings and the page cache
//! - `asset_dir` - Directory where downloaded images are stored
//!
//! ## Optional Settings (with defaults)
//!
//! - `api_password` - Resolved from the [`SecureStore`] key
//!   [`API_PASSWORD_SECRET_KEY`] when absent
//! - `chunk_size` - 25 records per page
//! - `request_timeout` - 300 seconds
//! - `image_base_url` - Media CDN prefix for relative image paths
//! - `cache_key_prefix` - `partners-xml_`
//! - `import_interval` / `stale_interval` - 2 and 7 days
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SyncConfig;
//!
//! let config = SyncConfig::builder()
//!     .api_url("https://api.example.com/listings")
//!     .api_username("partner")
//!     .database_path("/var/lib/listing-sync/listings.db")
//!     .asset_dir("/var/lib/listing-sync/assets")
//!     .chunk_size(50)
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::logging::redact_if_sensitive;
use bridge_traits::SecureStore;
use chrono::Duration as WindowDuration;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Secure store key holding the remote API password.
pub const API_PASSWORD_SECRET_KEY: &str = "listing_api_password";

/// Default records per chunk.
pub const DEFAULT_CHUNK_SIZE: u32 = 25;

/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: u32 = 200;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Default prefix joined with relative media file names.
pub const DEFAULT_IMAGE_BASE_URL: &str = "https://res.cloudinary.com/simpleview/image/upload/";

/// Default prefix of page cache keys.
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "partners-xml_";

const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Configuration for the synchronization engine.
///
/// Use [`SyncConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct SyncConfig {
    /// Remote listing API endpoint
    pub api_url: String,

    /// Remote API account name
    pub api_username: String,

    /// Remote API password; `None` means "look it up in the secure store"
    pub api_password: Option<String>,

    /// Records per chunk (page size)
    pub chunk_size: u32,

    /// Timeout applied to every remote request
    pub request_timeout: Duration,

    /// Prefix for media files that carry no explicit image path
    pub image_base_url: String,

    /// Prefix of every page cache key
    pub cache_key_prefix: String,

    /// Default look-back window of `import_new`
    pub import_interval: WindowDuration,

    /// Default look-back window of `delete_stale`
    pub stale_interval: WindowDuration,

    /// Look-back window of the stale sweep that follows a full import
    pub stale_interval_after_full_import: WindowDuration,

    /// Path to the SQLite database file
    pub database_path: PathBuf,

    /// Directory for stored image files
    pub asset_dir: PathBuf,
}

impl std::fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncConfig")
            .field("api_url", &self.api_url)
            .field(
                "api_username",
                &redact_if_sensitive("api_username", &self.api_username),
            )
            .field(
                "api_password",
                &self.api_password.as_ref().map(|_| "[REDACTED]"),
            )
            .field("chunk_size", &self.chunk_size)
            .field("request_timeout", &self.request_timeout)
            .field("image_base_url", &self.image_base_url)
            .field("cache_key_prefix", &self.cache_key_prefix)
            .field("import_interval", &self.import_interval)
            .field("stale_interval", &self.stale_interval)
            .field("database_path", &self.database_path)
            .field("asset_dir", &self.asset_dir)
            .finish()
    }
}

impl SyncConfig {
    /// Creates a new builder for constructing a `SyncConfig`.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The API URL is an http(s) URL
    /// - The username is not empty
    /// - Chunk size is within `1..=200`
    /// - Request timeout is between 1 second and 30 minutes
    /// - Look-back windows are positive
    /// - Paths are not empty
    pub fn validate(&self) -> Result<()> {
        let url = self.api_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "API URL must start with http:// or https://, got '{}'",
                self.api_url
            )));
        }

        if self.api_username.trim().is_empty() {
            return Err(Error::Config(
                "API username cannot be empty. Use .api_username() to set it.".to_string(),
            ));
        }

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            return Err(Error::Config(format!(
                "Chunk size must be between 1 and {}, got {}",
                MAX_CHUNK_SIZE, self.chunk_size
            )));
        }

        if self.request_timeout < Duration::from_secs(1)
            || self.request_timeout > MAX_REQUEST_TIMEOUT
        {
            return Err(Error::Config(format!(
                "Request timeout must be between 1s and 30min, got {:?}",
                self.request_timeout
            )));
        }

        if self.import_interval <= WindowDuration::zero()
            || self.stale_interval <= WindowDuration::zero()
            || self.stale_interval_after_full_import <= WindowDuration::zero()
        {
            return Err(Error::Config(
                "Import and stale intervals must be positive".to_string(),
            ));
        }

        if self.image_base_url.trim().is_empty() {
            return Err(Error::Config("Image base URL cannot be empty".to_string()));
        }

        if self.database_path.as_os_str().is_empty() {
            return Err(Error::Config("Database path cannot be empty".to_string()));
        }

        if self.asset_dir.as_os_str().is_empty() {
            return Err(Error::Config("Asset directory cannot be empty".to_string()));
        }

        Ok(())
    }

    /// Returns the API password, consulting the secure store when none was
    /// configured explicitly.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CredentialUnavailable`] when no password is configured and
    /// no secure store is available, and [`Error::Config`] when the store holds
    /// no usable value.
    pub async fn resolve_password(&self, secure_store: Option<&dyn SecureStore>) -> Result<String> {
        if let Some(password) = &self.api_password {
            return Ok(password.clone());
        }

        let store = secure_store.ok_or_else(|| Error::CredentialUnavailable {
            key: API_PASSWORD_SECRET_KEY.to_string(),
            hint: "set .api_password() or provide a secure store".to_string(),
        })?;

        let secret = store
            .get_secret(API_PASSWORD_SECRET_KEY)
            .await?
            .ok_or_else(|| {
                Error::Config(format!(
                    "Secure store has no value for '{}'",
                    API_PASSWORD_SECRET_KEY
                ))
            })?;

        let password = String::from_utf8(secret)
            .map_err(|_| Error::Config("Stored API password is not valid UTF-8".to_string()))?;

        debug!(
            key = API_PASSWORD_SECRET_KEY,
            password = %redact_if_sensitive("password", &password),
            "Resolved API password from secure store"
        );
        Ok(password)
    }
}

/// Builder for constructing [`SyncConfig`] instances.
///
/// Call [`build()`](SyncConfigBuilder::build) to validate and create the
/// final config.
#[derive(Default)]
pub struct SyncConfigBuilder {
    api_url: Option<String>,
    api_username: Option<String>,
    api_password: Option<String>,
    chunk_size: Option<u32>,
    request_timeout: Option<Duration>,
    image_base_url: Option<String>,
    cache_key_prefix: Option<String>,
    import_interval: Option<WindowDuration>,
    stale_interval: Option<WindowDuration>,
    stale_interval_after_full_import: Option<WindowDuration>,
    database_path: Option<PathBuf>,
    asset_dir: Option<PathBuf>,
}

impl SyncConfigBuilder {
    /// Sets the remote API endpoint.
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    /// Sets the remote API account name.
    pub fn api_username(mut self, username: impl Into<String>) -> Self {
        self.api_username = Some(username.into());
        self
    }

    /// Sets the remote API password explicitly.
    ///
    /// When omitted, the password is read from the secure store at bootstrap.
    pub fn api_password(mut self, password: impl Into<String>) -> Self {
        self.api_password = Some(password.into());
        self
    }

    /// Sets the number of records per chunk.
    ///
    /// Default: 25
    pub fn chunk_size(mut self, chunk_size: u32) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    /// Sets the remote request timeout.
    ///
    /// Default: 300 seconds
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Sets the prefix used for media files without an explicit path.
    pub fn image_base_url(mut self, url: impl Into<String>) -> Self {
        self.image_base_url = Some(url.into());
        self
    }

    /// Sets the prefix of page cache keys.
    pub fn cache_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.cache_key_prefix = Some(prefix.into());
        self
    }

    /// Sets the default look-back window of `import_new`.
    pub fn import_interval(mut self, interval: WindowDuration) -> Self {
        self.import_interval = Some(interval);
        self
    }

    /// Sets the default look-back window of `delete_stale`.
    pub fn stale_interval(mut self, interval: WindowDuration) -> Self {
        self.stale_interval = Some(interval);
        self
    }

    /// Sets the look-back window of the stale sweep run after a full import.
    pub fn stale_interval_after_full_import(mut self, interval: WindowDuration) -> Self {
        self.stale_interval_after_full_import = Some(interval);
        self
    }

    /// Sets the SQLite database path.
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database_path = Some(path.into());
        self
    }

    /// Sets the directory for stored image files.
    pub fn asset_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.asset_dir = Some(path.into());
        self
    }

    /// Builds the final `SyncConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required field is missing or a value is
    /// out of range.
    pub fn build(self) -> Result<SyncConfig> {
        let api_url = self.api_url.ok_or_else(|| {
            Error::Config("API URL is required. Use .api_url() to set it.".to_string())
        })?;

        let api_username = self.api_username.ok_or_else(|| {
            Error::Config("API username is required. Use .api_username() to set it.".to_string())
        })?;

        let database_path = self.database_path.ok_or_else(|| {
            Error::Config("Database path is required. Use .database_path() to set it.".to_string())
        })?;

        let asset_dir = self.asset_dir.ok_or_else(|| {
            Error::Config("Asset directory is required. Use .asset_dir() to set it.".to_string())
        })?;

        let config = SyncConfig {
            api_url,
            api_username,
            api_password: self.api_password,
            chunk_size: self.chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE),
            request_timeout: self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            image_base_url: self
                .image_base_url
                .unwrap_or_else(|| DEFAULT_IMAGE_BASE_URL.to_string()),
            cache_key_prefix: self
                .cache_key_prefix
                .unwrap_or_else(|| DEFAULT_CACHE_KEY_PREFIX.to_string()),
            import_interval: self.import_interval.unwrap_or_else(|| WindowDuration::days(2)),
            stale_interval: self.stale_interval.unwrap_or_else(|| WindowDuration::days(7)),
            stale_interval_after_full_import: self
                .stale_interval_after_full_import
                .unwrap_or_else(|| WindowDuration::days(30)),
            database_path,
            asset_dir,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::BridgeError;

    struct FixedSecureStore(Option<Vec<u8>>);

    #[async_trait]
    impl SecureStore for FixedSecureStore {
        async fn set_secret(&self, _key: &str, _value: &[u8]) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, BridgeError> {
            assert_eq!(key, API_PASSWORD_SECRET_KEY);
            Ok(self.0.clone())
        }

        async fn delete_secret(&self, _key: &str) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
    }

    fn base_builder() -> SyncConfigBuilder {
        SyncConfig::builder()
            .api_url("https://api.example.com/listings")
            .api_username("partner")
            .database_path("/tmp/listings.db")
            .asset_dir("/tmp/assets")
    }

    #[test]
    fn test_builder_applies_defaults() {
        let config = base_builder().build().unwrap();

        assert_eq!(config.chunk_size, 25);
        assert_eq!(config.request_timeout, Duration::from_secs(300));
        assert_eq!(config.image_base_url, DEFAULT_IMAGE_BASE_URL);
        assert_eq!(config.cache_key_prefix, "partners-xml_");
        assert_eq!(config.import_interval, WindowDuration::days(2));
        assert_eq!(config.stale_interval, WindowDuration::days(7));
        assert_eq!(config.stale_interval_after_full_import, WindowDuration::days(30));
        assert!(config.api_password.is_none());
    }

    #[test]
    fn test_missing_required_fields() {
        let err = SyncConfig::builder().build().unwrap_err();
        assert!(err.to_string().contains("API URL is required"));

        let err = SyncConfig::builder()
            .api_url("https://api.example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("API username is required"));
    }

    #[test]
    fn test_chunk_size_bounds() {
        assert!(base_builder().chunk_size(0).build().is_err());
        assert!(base_builder().chunk_size(201).build().is_err());
        assert!(base_builder().chunk_size(1).build().is_ok());
        assert!(base_builder().chunk_size(200).build().is_ok());
    }

    #[test]
    fn test_rejects_non_http_url() {
        let err = base_builder().api_url("ftp://example.com").build().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_out_of_range_timeout() {
        assert!(base_builder()
            .request_timeout(Duration::from_millis(10))
            .build()
            .is_err());
        assert!(base_builder()
            .request_timeout(Duration::from_secs(3600))
            .build()
            .is_err());
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let config = base_builder().api_password("hunter2").build().unwrap();
        let rendered = format!("{:?}", config);

        assert!(!rendered.contains("hunter2"));
        assert!(!rendered.contains("partner"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[tokio::test]
    async fn test_resolve_password_prefers_explicit_value() {
        let config = base_builder().api_password("explicit").build().unwrap();
        let store = FixedSecureStore(Some(b"stored".to_vec()));

        assert_eq!(config.resolve_password(Some(&store)).await.unwrap(), "explicit");
    }

    #[tokio::test]
    async fn test_resolve_password_from_secure_store() {
        let config = base_builder().build().unwrap();
        let store = FixedSecureStore(Some(b"stored".to_vec()));

        assert_eq!(config.resolve_password(Some(&store)).await.unwrap(), "stored");
    }

    #[tokio::test]
    async fn test_resolve_password_without_store() {
        let config = base_builder().build().unwrap();

        let err = config.resolve_password(None).await.unwrap_err();
        assert!(matches!(err, Error::CredentialUnavailable { .. }));

        let empty = FixedSecureStore(None);
        let err = config.resolve_password(Some(&empty)).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
