//! Listing repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{Listing, ListingDraft};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};
use std::collections::HashMap;

/// Listing repository interface for data access operations
#[async_trait]
pub trait ListingRepository: Send + Sync {
    /// Whether the listing tables exist and can be written
    async fn is_available(&self) -> Result<bool>;

    /// Map of external id to local id for every stored listing
    ///
    /// When an external id appears more than once the oldest local row wins.
    async fn existing_ids(&self) -> Result<HashMap<i64, i64>>;

    /// All local ids carrying `external_id` (duplicates are possible)
    async fn find_ids_by_external(&self, external_id: i64) -> Result<Vec<i64>>;

    /// Find a listing by its local id
    async fn find_by_id(&self, id: i64) -> Result<Option<Listing>>;

    /// Insert a new listing and return it
    ///
    /// # Errors
    /// Returns error if draft validation fails or a database error occurs
    async fn insert(&self, draft: &ListingDraft, now: i64) -> Result<Listing>;

    /// Overwrite the fields of an existing listing
    ///
    /// # Errors
    /// Returns `NotFound` if no listing has id `id`
    async fn update(&self, id: i64, draft: &ListingDraft, now: i64) -> Result<()>;

    /// Delete a listing by local id
    ///
    /// # Returns
    /// - `Ok(true)` if the listing was deleted
    /// - `Ok(false)` if it was not found
    async fn delete(&self, id: i64) -> Result<bool>;

    /// First `limit` listings ordered by title
    async fn list_by_title(&self, limit: i64) -> Result<Vec<Listing>>;

    /// Count stored listings
    async fn count(&self) -> Result<i64>;

    /// Replace every meta field of a listing with `fields`
    async fn replace_meta(&self, listing_id: i64, fields: &[(String, String)]) -> Result<()>;

    /// Read every meta field of a listing
    async fn meta(&self, listing_id: i64) -> Result<HashMap<String, String>>;

    /// Delete meta rows whose listing no longer exists
    async fn prune_orphaned_meta(&self) -> Result<u64>;
}

/// SQLite implementation of ListingRepository
pub struct SqliteListingRepository {
    pool: SqlitePool,
}

impl SqliteListingRepository {
    /// Create a new SqliteListingRepository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn validate_draft(draft: &ListingDraft) -> Result<()> {
    draft.validate().map_err(|e| LibraryError::InvalidInput {
        field: "Listing".to_string(),
        message: e,
    })
}

#[async_trait]
impl ListingRepository for SqliteListingRepository {
    async fn is_available(&self) -> Result<bool> {
        let (count,): (i64,) = query_as(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ('listings', 'listing_meta')",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(count == 2)
    }

    async fn existing_ids(&self) -> Result<HashMap<i64, i64>> {
        let rows: Vec<(i64, i64)> =
            query_as("SELECT external_id, id FROM listings ORDER BY id DESC")
                .fetch_all(&self.pool)
                .await?;

        // Descending order lets the oldest row overwrite newer duplicates.
        Ok(rows.into_iter().collect())
    }

    async fn find_ids_by_external(&self, external_id: i64) -> Result<Vec<i64>> {
        let rows: Vec<(i64,)> = query_as("SELECT id FROM listings WHERE external_id = ? ORDER BY id")
            .bind(external_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<Listing>> {
        let listing = query_as::<_, Listing>("SELECT * FROM listings WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(listing)
    }

    async fn insert(&self, draft: &ListingDraft, now: i64) -> Result<Listing> {
        validate_draft(draft)?;

        let listing = query_as::<_, Listing>(
            r#"
            INSERT INTO listings (external_id, title, slug, content, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(draft.external_id)
        .bind(&draft.title)
        .bind(&draft.slug)
        .bind(&draft.content)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(listing)
    }

    async fn update(&self, id: i64, draft: &ListingDraft, now: i64) -> Result<()> {
        validate_draft(draft)?;

        let result = query(
            r#"
            UPDATE listings
            SET external_id = ?, title = ?, slug = ?, content = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(draft.external_id)
        .bind(&draft.title)
        .bind(&draft.slug)
        .bind(&draft.content)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "Listing".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = query("DELETE FROM listings WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_by_title(&self, limit: i64) -> Result<Vec<Listing>> {
        let listings =
            query_as::<_, Listing>("SELECT * FROM listings ORDER BY title ASC, id ASC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;

        Ok(listings)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = query_as("SELECT COUNT(*) as count FROM listings")
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;

        Ok(count)
    }

    async fn replace_meta(&self, listing_id: i64, fields: &[(String, String)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM listing_meta WHERE listing_id = ?")
            .bind(listing_id)
            .execute(&mut *tx)
            .await?;

        for (key, value) in fields {
            query(
                r#"
                INSERT INTO listing_meta (listing_id, meta_key, meta_value)
                VALUES (?, ?, ?)
                ON CONFLICT(listing_id, meta_key) DO UPDATE SET meta_value = excluded.meta_value
                "#,
            )
            .bind(listing_id)
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn meta(&self, listing_id: i64) -> Result<HashMap<String, String>> {
        let rows: Vec<(String, String)> =
            query_as("SELECT meta_key, meta_value FROM listing_meta WHERE listing_id = ?")
                .bind(listing_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().collect())
    }

    async fn prune_orphaned_meta(&self) -> Result<u64> {
        let result = query(
            "DELETE FROM listing_meta WHERE listing_id NOT IN (SELECT id FROM listings)",
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
