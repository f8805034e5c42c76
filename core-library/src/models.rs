//! Domain models for the local listing store
//!
//! This module contains the persisted entities with validation and database mapping.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

// =============================================================================
// Listings
// =============================================================================

/// A listing stored locally, mirrored from one remote record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Listing {
    /// Local identifier
    pub id: i64,
    /// Identifier of the record in the remote source
    pub external_id: i64,
    /// Display name
    pub title: String,
    /// URL-safe name including the listing type suffix
    pub slug: String,
    /// Long description
    pub content: String,
    /// Creation timestamp (Unix epoch seconds)
    pub created_at: i64,
    /// Last modification timestamp (Unix epoch seconds)
    pub updated_at: i64,
}

/// Field values written when creating or updating a listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub external_id: i64,
    pub title: String,
    pub slug: String,
    pub content: String,
}

impl ListingDraft {
    /// Validate draft data
    pub fn validate(&self) -> Result<(), String> {
        if self.external_id <= 0 {
            return Err("Listing external id must be positive".to_string());
        }

        if self.title.trim().is_empty() {
            return Err("Listing title cannot be empty".to_string());
        }

        if self.slug.is_empty() {
            return Err("Listing slug cannot be empty".to_string());
        }

        Ok(())
    }
}

// =============================================================================
// Terms
// =============================================================================

/// Classification axes a listing can be filed under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Taxonomy {
    /// Partner type (Visitors Guide, Membership Directory, ...)
    ListingType,
    /// Category, with sub-categories as children
    Category,
    /// Geographic region
    Region,
}

impl Taxonomy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Taxonomy::ListingType => "listing_type",
            Taxonomy::Category => "listing_category",
            Taxonomy::Region => "listing_region",
        }
    }
}

impl fmt::Display for Taxonomy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A term within one taxonomy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Term {
    pub id: i64,
    pub taxonomy: String,
    pub slug: String,
    pub name: String,
    pub parent_id: Option<i64>,
}

// =============================================================================
// Assets
// =============================================================================

/// A stored image file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Asset {
    pub id: i64,
    /// Listing the file was first stored for
    pub parent_listing_id: Option<i64>,
    /// Normalized file name used as the dedup key
    pub file_name: String,
    /// Location of the stored bytes
    pub file_path: String,
    pub title: String,
    /// Declared MIME type of the stored copy
    pub content_type: Option<String>,
    /// Size in bytes of the stored copy
    pub byte_length: Option<i64>,
    /// URL the file was fetched from
    pub source_url: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Values needed to record a freshly stored file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAsset {
    pub parent_listing_id: Option<i64>,
    pub file_name: String,
    pub file_path: String,
    pub title: String,
    pub content_type: Option<String>,
    pub byte_length: Option<i64>,
    pub source_url: String,
}

impl NewAsset {
    /// Validate asset data
    pub fn validate(&self) -> Result<(), String> {
        if self.file_name.is_empty() {
            return Err("Asset file name cannot be empty".to_string());
        }

        if self.file_path.is_empty() {
            return Err("Asset file path cannot be empty".to_string());
        }

        if matches!(self.byte_length, Some(len) if len < 0) {
            return Err("Asset byte length cannot be negative".to_string());
        }

        Ok(())
    }
}

/// How an asset is referenced by a listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum AttachmentRole {
    /// The listing's primary image
    Cover,
    /// Additional gallery image
    Secondary,
}

impl AttachmentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentRole::Cover => "cover",
            AttachmentRole::Secondary => "secondary",
        }
    }
}

/// An asset together with its attachment to one listing
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AttachedAsset {
    #[sqlx(flatten)]
    pub asset: Asset,
    pub role: AttachmentRole,
    pub position: i64,
}

// =============================================================================
// Helpers
// =============================================================================

/// Lower-case `value` and replace every run of characters outside
/// `[a-z0-9]` with a single `-`, trimming dashes at both ends.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut pending_dash = false;

    for c in value.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Pike Place Market"), "pike-place-market");
        assert_eq!(slugify("  Joe's Café & Bar!! "), "joe-s-caf-bar");
        assert_eq!(slugify("---"), "");
        assert_eq!(slugify("Hotel 1000"), "hotel-1000");
    }

    #[test]
    fn test_listing_draft_validation() {
        let draft = ListingDraft {
            external_id: 42,
            title: "Space Needle".to_string(),
            slug: "space-needle".to_string(),
            content: String::new(),
        };
        assert!(draft.validate().is_ok());

        let missing_title = ListingDraft {
            title: "  ".to_string(),
            ..draft.clone()
        };
        assert!(missing_title.validate().is_err());

        let bad_id = ListingDraft {
            external_id: 0,
            ..draft
        };
        assert!(bad_id.validate().is_err());
    }

    #[test]
    fn test_new_asset_validation() {
        let asset = NewAsset {
            parent_listing_id: Some(1),
            file_name: "photo.jpg".to_string(),
            file_path: "/assets/photo.jpg".to_string(),
            title: "photo".to_string(),
            content_type: Some("image/jpeg".to_string()),
            byte_length: Some(10),
            source_url: "https://img.example.com/photo.jpg".to_string(),
        };
        assert!(asset.validate().is_ok());

        let negative = NewAsset {
            byte_length: Some(-1),
            ..asset
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_taxonomy_names() {
        assert_eq!(Taxonomy::ListingType.as_str(), "listing_type");
        assert_eq!(Taxonomy::Category.to_string(), "listing_category");
        assert_eq!(AttachmentRole::Secondary.as_str(), "secondary");
    }
}
