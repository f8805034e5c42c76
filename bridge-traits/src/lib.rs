//! # Host Bridge Traits
//!
//! Capabilities the listing sync core needs from its host.
//!
//! ## Overview
//!
//! The core never talks to the network, the disk or the settings area
//! directly. Each of those is a trait here, implemented once per host
//! (`bridge-desktop` for desktop processes, in-memory fakes for tests) and
//! handed to the core as `Arc<dyn Trait>`.
//!
//! - [`HttpClient`](http::HttpClient) - Form POSTs to the partner API, image `HEAD`/`GET`
//! - [`FileSystemAccess`](storage::FileSystemAccess) - Stored image files
//! - [`SettingsStore`](storage::SettingsStore) - Durable sync progress
//! - [`SecureStore`](storage::SecureStore) - Partner API password
//! - [`Clock`](time::Clock) - Time source, replaceable in tests
//!
//! Every capability reports failures as [`BridgeError`](error::BridgeError).

pub mod error;
pub mod http;
pub mod storage;
pub mod time;

pub use error::BridgeError;

pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use storage::{FileSystemAccess, SecureStore, SettingsStore, SettingsTransaction};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
