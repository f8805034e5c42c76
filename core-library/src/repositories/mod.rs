//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for the local listing store.
//!
//! ## Architecture
//!
//! - Traits define the interface for each repository
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `ListingRepository` - Listings keyed by external id, plus their meta fields
//! - `TermRepository` - Type, category and region classification
//! - `AssetRepository` - Stored images and their cover/secondary attachments

pub mod asset;
pub mod listing;
pub mod term;

pub use asset::{AssetRepository, SqliteAssetRepository};
pub use listing::{ListingRepository, SqliteListingRepository};
pub use term::{SqliteTermRepository, TermRepository};
