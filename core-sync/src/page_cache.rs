//! # Page Cache
//!
//! Stores raw remote responses, zlib-compressed, keyed by a deterministic
//! string derived from the query.
//!
//! ## Keys
//!
//! | Query | Key |
//! |-------|-----|
//! | page chunk | `<prefix><YYYY-MM-DD>_<page:03>` (day of the fetch) |
//! | changed since | `<prefix>changed_<YYYY-MM-DD>` |
//! | stale since | `<prefix>stale_<YYYY-MM-DD>` |
//!
//! Equal queries within the same day map to the same key, so replaying a
//! phase after a crash reuses the already-fetched page. Entries are removed
//! only in bulk.

use crate::{Result, SyncError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use sqlx::{query, query_as, SqlitePool};
use std::io::{Read, Write};
use tracing::{debug, warn};

const CREATE_PAGE_CACHE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS page_cache (
        cache_key TEXT PRIMARY KEY,
        payload BLOB NOT NULL,
        last_updated INTEGER NOT NULL
    )
"#;

// ============================================================================
// Keys
// ============================================================================

/// Builds cache keys under a fixed prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Key of page `page` fetched on `epoch`
    pub fn page(&self, epoch: NaiveDate, page: u32) -> String {
        format!("{}{}_{:03}", self.prefix, epoch.format("%Y-%m-%d"), page)
    }

    /// Key of the changed-since query for `since`
    pub fn changed(&self, since: NaiveDate) -> String {
        format!("{}changed_{}", self.prefix, since.format("%Y-%m-%d"))
    }

    /// Key of the invalid-since query for `since`
    pub fn stale(&self, since: NaiveDate) -> String {
        format!("{}stale_{}", self.prefix, since.format("%Y-%m-%d"))
    }
}

// ============================================================================
// Cache
// ============================================================================

/// One cached response, decompressed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPage {
    pub cache_key: String,
    pub payload: Bytes,
    pub last_updated: i64,
}

/// Storage contract for cached responses
#[async_trait]
pub trait PageCache: Send + Sync {
    /// Cached response for `key`
    ///
    /// A payload that cannot be decompressed is reported as absent.
    async fn get(&self, key: &str) -> Result<Option<CachedPage>>;

    /// Store `raw_payload` under `key`, replacing any previous entry
    async fn put(&self, key: &str, raw_payload: &[u8], now: i64) -> Result<()>;

    /// Remove every entry, returning how many were removed
    async fn purge_all(&self) -> Result<u64>;

    async fn count(&self) -> Result<u64>;
}

/// SQLite implementation of [`PageCache`]
pub struct SqlitePageCache {
    pool: SqlitePool,
}

impl SqlitePageCache {
    /// Create the cache, creating its table if needed
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        query(CREATE_PAGE_CACHE_TABLE).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl PageCache for SqlitePageCache {
    async fn get(&self, key: &str) -> Result<Option<CachedPage>> {
        let row: Option<(Vec<u8>, i64)> =
            query_as("SELECT payload, last_updated FROM page_cache WHERE cache_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        let Some((compressed, last_updated)) = row else {
            return Ok(None);
        };

        match decompress(&compressed) {
            Ok(payload) => {
                debug!(cache_key = key, bytes = payload.len(), "Page cache hit");
                Ok(Some(CachedPage {
                    cache_key: key.to_string(),
                    payload: Bytes::from(payload),
                    last_updated,
                }))
            }
            Err(e) => {
                warn!(cache_key = key, error = %e, "Discarding undecodable cache entry");
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, raw_payload: &[u8], now: i64) -> Result<()> {
        let compressed = compress(raw_payload)?;

        query(
            r#"
            INSERT INTO page_cache (cache_key, payload, last_updated)
            VALUES (?, ?, ?)
            ON CONFLICT(cache_key) DO UPDATE SET
                payload = excluded.payload,
                last_updated = excluded.last_updated
            "#,
        )
        .bind(key)
        .bind(&compressed)
        .bind(now)
        .execute(&self.pool)
        .await?;

        debug!(
            cache_key = key,
            raw_bytes = raw_payload.len(),
            stored_bytes = compressed.len(),
            "Cached page"
        );
        Ok(())
    }

    async fn purge_all(&self) -> Result<u64> {
        let result = query("DELETE FROM page_cache").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let (count,): (i64,) = query_as("SELECT COUNT(*) FROM page_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

fn compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| SyncError::Cache(format!("Compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| SyncError::Cache(format!("Compression failed: {}", e)))
}

fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::create_test_pool;

    async fn cache() -> (SqlitePageCache, SqlitePool) {
        let pool = create_test_pool().await.unwrap();
        (SqlitePageCache::new(pool.clone()).await.unwrap(), pool)
    }

    #[test]
    fn test_keys_are_deterministic() {
        let keys = CacheKeys::new("partners-xml_");
        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();

        assert_eq!(keys.page(day, 7), "partners-xml_2024-02-29_007");
        assert_eq!(keys.page(day, 7), keys.page(day, 7));
        assert_ne!(keys.page(day, 7), keys.page(day, 8));
        assert_eq!(keys.changed(day), "partners-xml_changed_2024-02-29");
        assert_eq!(keys.stale(day), "partners-xml_stale_2024-02-29");
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let (cache, _) = cache().await;
        let payload = br#"{"REQUESTSTATUS":{"HASERRORS":0,"RESULTS":1}}"#;

        cache.put("k1", payload, 100).await.unwrap();
        let hit = cache.get("k1").await.unwrap().unwrap();

        assert_eq!(hit.payload.as_ref(), payload);
        assert_eq!(hit.last_updated, 100);
        assert!(cache.get("k2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_replaces_existing_entry() {
        let (cache, _) = cache().await;

        cache.put("k", b"first", 1).await.unwrap();
        cache.put("k", b"second", 2).await.unwrap();

        assert_eq!(cache.count().await.unwrap(), 1);
        assert_eq!(cache.get("k").await.unwrap().unwrap().payload.as_ref(), b"second");
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_a_miss() {
        let (cache, pool) = cache().await;

        sqlx::query("INSERT INTO page_cache (cache_key, payload, last_updated) VALUES (?, ?, 0)")
            .bind("broken")
            .bind(vec![0u8, 1, 2, 3])
            .execute(&pool)
            .await
            .unwrap();

        assert!(cache.get("broken").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_all() {
        let (cache, _) = cache().await;
        cache.put("a", b"1", 0).await.unwrap();
        cache.put("b", b"2", 0).await.unwrap();

        assert_eq!(cache.purge_all().await.unwrap(), 2);
        assert_eq!(cache.count().await.unwrap(), 0);
    }
}
