//! Term repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{slugify, Taxonomy, Term};
use async_trait::async_trait;
use sqlx::{query, query_as, SqlitePool};

/// Term repository interface for classification data
#[async_trait]
pub trait TermRepository: Send + Sync {
    /// Find or create the term named `name` in `taxonomy`
    ///
    /// # Errors
    /// Returns `InvalidInput` when `name` has no slug-able characters
    async fn ensure(&self, taxonomy: Taxonomy, name: &str, parent_id: Option<i64>) -> Result<Term>;

    /// Replace the listing's terms within `taxonomy` by `term_ids`
    async fn assign(&self, listing_id: i64, taxonomy: Taxonomy, term_ids: &[i64]) -> Result<()>;

    /// Terms attached to a listing across all taxonomies
    async fn terms_for_listing(&self, listing_id: i64) -> Result<Vec<Term>>;

    /// Delete terms that no listing uses and that have no child terms left
    ///
    /// # Returns
    /// Number of deleted terms
    async fn prune_empty(&self) -> Result<u64>;
}

/// SQLite implementation of TermRepository
pub struct SqliteTermRepository {
    pool: SqlitePool,
}

impl SqliteTermRepository {
    /// Create a new SqliteTermRepository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TermRepository for SqliteTermRepository {
    async fn ensure(&self, taxonomy: Taxonomy, name: &str, parent_id: Option<i64>) -> Result<Term> {
        let slug = slugify(name);
        if slug.is_empty() {
            return Err(LibraryError::InvalidInput {
                field: "Term".to_string(),
                message: format!("Term name '{}' produces an empty slug", name),
            });
        }

        query(
            r#"
            INSERT INTO terms (taxonomy, slug, name, parent_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(taxonomy, slug) DO NOTHING
            "#,
        )
        .bind(taxonomy.as_str())
        .bind(&slug)
        .bind(name.trim())
        .bind(parent_id)
        .execute(&self.pool)
        .await?;

        let term = query_as::<_, Term>("SELECT * FROM terms WHERE taxonomy = ? AND slug = ?")
            .bind(taxonomy.as_str())
            .bind(&slug)
            .fetch_one(&self.pool)
            .await?;

        Ok(term)
    }

    async fn assign(&self, listing_id: i64, taxonomy: Taxonomy, term_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        query(
            r#"
            DELETE FROM listing_terms
            WHERE listing_id = ?
              AND term_id IN (SELECT id FROM terms WHERE taxonomy = ?)
            "#,
        )
        .bind(listing_id)
        .bind(taxonomy.as_str())
        .execute(&mut *tx)
        .await?;

        for term_id in term_ids {
            query("INSERT OR IGNORE INTO listing_terms (listing_id, term_id) VALUES (?, ?)")
                .bind(listing_id)
                .bind(term_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn terms_for_listing(&self, listing_id: i64) -> Result<Vec<Term>> {
        let terms = query_as::<_, Term>(
            r#"
            SELECT t.* FROM terms t
            INNER JOIN listing_terms lt ON lt.term_id = t.id
            WHERE lt.listing_id = ?
            ORDER BY t.taxonomy, t.name
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(terms)
    }

    async fn prune_empty(&self) -> Result<u64> {
        let mut total = 0;

        // Each pass frees parents whose last child was removed by the previous one.
        loop {
            let result = query(
                r#"
                DELETE FROM terms
                WHERE id NOT IN (SELECT term_id FROM listing_terms)
                  AND id NOT IN (SELECT parent_id FROM terms WHERE parent_id IS NOT NULL)
                "#,
            )
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                break;
            }
            total += result.rows_affected();
        }

        Ok(total)
    }
}
