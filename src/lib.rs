//! Workspace placeholder crate.
//!
//! This crate exposes the feature flags that map onto the individual workspace
//! crates. Host applications can depend on `listing-sync-workspace` and enable
//! `desktop-shims` to get the sync façade wired to the desktop bridges without
//! depending on each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::{CoreDependencies, CoreService};
