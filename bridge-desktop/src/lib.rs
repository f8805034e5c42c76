//! # Desktop Bridges
//!
//! Host capabilities for a desktop or server process.
//!
//! ## Overview
//!
//! | Capability | Implementation | Backed by |
//! |---|---|---|
//! | `HttpClient` | [`ReqwestHttpClient`] | `reqwest` with rustls |
//! | `FileSystemAccess` | [`TokioFileSystem`] | `tokio::fs` under the platform data directory |
//! | `SettingsStore` | [`SqliteSettingsStore`] | A small SQLite database |
//! | `SecureStore` | `KeyringSecureStore` | OS keychain, behind the `secure-store` feature |
//!
//! ```ignore
//! let http = ReqwestHttpClient::new()?;
//! let settings = SqliteSettingsStore::new(data_dir.join("settings.db")).await?;
//! let files = TokioFileSystem::new();
//! ```

mod filesystem;
mod http;
mod settings;

#[cfg(feature = "secure-store")]
mod secure_store;

pub use filesystem::TokioFileSystem;
pub use http::ReqwestHttpClient;
pub use settings::SqliteSettingsStore;

#[cfg(feature = "secure-store")]
pub use secure_store::KeyringSecureStore;
