//! # Runtime Support
//!
//! Configuration and logging shared by the listing sync crates.
//!
//! ## Overview
//!
//! [`SyncConfig`] is built once by the host, validated, and handed to the
//! engine; the partner API password may come from it or from a secure
//! store. [`logging`] installs the `tracing` subscriber and provides the
//! redaction helpers every crate uses before logging credentials or paths.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{SyncConfig, SyncConfigBuilder};
pub use error::{Error, Result};
