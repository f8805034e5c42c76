//! Asset repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{Asset, AttachedAsset, AttachmentRole, NewAsset};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

/// Asset repository interface for stored images and their attachments
#[async_trait]
pub trait AssetRepository: Send + Sync {
    /// Find an asset by its ID
    async fn find_by_id(&self, id: i64) -> Result<Option<Asset>>;

    /// Most recently stored asset with the given normalized file name
    async fn find_latest_by_file_name(&self, file_name: &str) -> Result<Option<Asset>>;

    /// Record a freshly stored file
    ///
    /// # Errors
    /// Returns error if validation fails or a database error occurs
    async fn insert(&self, asset: &NewAsset, now: i64) -> Result<Asset>;

    /// Record new content written over an existing asset's file
    ///
    /// # Errors
    /// Returns `NotFound` if the asset does not exist
    async fn update_content(
        &self,
        id: i64,
        content_type: Option<&str>,
        byte_length: Option<i64>,
        source_url: &str,
        now: i64,
    ) -> Result<()>;

    /// Assets attached to a listing, cover first then secondary by position
    async fn attachments_for_listing(&self, listing_id: i64) -> Result<Vec<AttachedAsset>>;

    /// Replace a listing's attachments with `cover` and the ordered `secondary` ids
    async fn set_attachments(
        &self,
        listing_id: i64,
        cover: Option<i64>,
        secondary: &[i64],
    ) -> Result<()>;

    /// Number of listings other than `listing_id` that reference the asset
    async fn other_references(&self, asset_id: i64, listing_id: i64) -> Result<i64>;

    /// Delete an asset row (attachments follow by cascade)
    async fn delete(&self, id: i64) -> Result<bool>;

    /// Count stored assets
    async fn count(&self) -> Result<i64>;
}

/// SQLite implementation of AssetRepository
pub struct SqliteAssetRepository {
    pool: SqlitePool,
}

impl SqliteAssetRepository {
    /// Create a new SqliteAssetRepository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AssetRepository for SqliteAssetRepository {
    async fn find_by_id(&self, id: i64) -> Result<Option<Asset>> {
        let asset = query_as::<_, Asset>("SELECT * FROM assets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(asset)
    }

    async fn find_latest_by_file_name(&self, file_name: &str) -> Result<Option<Asset>> {
        let asset = query_as::<_, Asset>(
            "SELECT * FROM assets WHERE file_name = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(file_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(asset)
    }

    async fn insert(&self, asset: &NewAsset, now: i64) -> Result<Asset> {
        asset.validate().map_err(|e| LibraryError::InvalidInput {
            field: "Asset".to_string(),
            message: e,
        })?;

        let stored = query_as::<_, Asset>(
            r#"
            INSERT INTO assets (
                parent_listing_id, file_name, file_path, title,
                content_type, byte_length, source_url, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(asset.parent_listing_id)
        .bind(&asset.file_name)
        .bind(&asset.file_path)
        .bind(&asset.title)
        .bind(&asset.content_type)
        .bind(asset.byte_length)
        .bind(&asset.source_url)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn update_content(
        &self,
        id: i64,
        content_type: Option<&str>,
        byte_length: Option<i64>,
        source_url: &str,
        now: i64,
    ) -> Result<()> {
        let result = query(
            r#"
            UPDATE assets
            SET content_type = ?, byte_length = ?, source_url = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(content_type)
        .bind(byte_length)
        .bind(source_url)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LibraryError::NotFound {
                entity_type: "Asset".to_string(),
                id: id.to_string(),
            });
        }

        Ok(())
    }

    async fn attachments_for_listing(&self, listing_id: i64) -> Result<Vec<AttachedAsset>> {
        let attached = query_as::<_, AttachedAsset>(
            r#"
            SELECT a.*, aa.role, aa.position
            FROM asset_attachments aa
            INNER JOIN assets a ON a.id = aa.asset_id
            WHERE aa.listing_id = ?
            ORDER BY CASE aa.role WHEN 'cover' THEN 0 ELSE 1 END, aa.position
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(attached)
    }

    async fn set_attachments(
        &self,
        listing_id: i64,
        cover: Option<i64>,
        secondary: &[i64],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        query("DELETE FROM asset_attachments WHERE listing_id = ?")
            .bind(listing_id)
            .execute(&mut *tx)
            .await?;

        let ordered = cover
            .map(|id| (id, AttachmentRole::Cover))
            .into_iter()
            .chain(secondary.iter().map(|id| (*id, AttachmentRole::Secondary)));

        for (position, (asset_id, role)) in ordered.enumerate() {
            query(
                r#"
                INSERT OR IGNORE INTO asset_attachments (listing_id, asset_id, role, position)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(listing_id)
            .bind(asset_id)
            .bind(role)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn other_references(&self, asset_id: i64, listing_id: i64) -> Result<i64> {
        let (count,): (i64,) = query_as(
            r#"
            SELECT COUNT(DISTINCT listing_id) FROM asset_attachments
            WHERE asset_id = ? AND listing_id != ?
            "#,
        )
        .bind(asset_id)
        .bind(listing_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn delete(&self, id: i64) -> Result<bool> {
        let result = query("DELETE FROM assets WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = query_as("SELECT COUNT(*) as count FROM assets")
            .fetch_one(&self.pool)
            .await
            .map(|row: (i64,)| row.0)?;

        Ok(count)
    }
}
