//! # Listing Store Module
//!
//! Owns the local listing database and provides repository patterns for
//! data access.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite database schema and migrations
//! - Listings keyed by the remote source's external id, with key/value meta
//! - Classification terms and their links to listings
//! - Stored image assets and the attachments that reference them

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{LibraryError, Result};
pub use models::{
    slugify, Asset, AttachedAsset, AttachmentRole, Listing, ListingDraft, NewAsset, Taxonomy, Term,
};
pub use repositories::{
    AssetRepository, ListingRepository, SqliteAssetRepository, SqliteListingRepository,
    SqliteTermRepository, TermRepository,
};
