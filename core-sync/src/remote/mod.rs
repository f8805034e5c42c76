//! Remote partner listing source: wire types, client and cached access.

pub mod client;
pub mod source;
pub mod types;

pub use client::{parse_response, RemoteQuery, RemoteSourceClient, SourcePage};
pub use source::CachedSource;
pub use types::{AmenityItem, MediaItem, RemoteRecord, SocialItem, TagItem};
