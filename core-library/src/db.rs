//! # Listing Database
//!
//! Opens the SQLite file that holds listings, terms and stored assets.
//!
//! ## Overview
//!
//! [`create_pool`] opens (or creates) the database, applies the embedded
//! migrations and proves the connection with a trivial query. File
//! databases run in WAL mode so status reads do not block a running import.
//! Foreign keys are always on: meta rows, term links and asset attachments
//! all cascade from their listing.
//!
//! ```rust,ignore
//! let pool = create_pool(DatabaseConfig::new("listings.db")).await?;
//! ```
//!
//! Tests use [`create_test_pool`], an in-memory database behind a single
//! connection.

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const MEMORY_URL: &str = "sqlite::memory:";

/// Where the listing database lives and how many connections it may use
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    /// How long a caller waits for a free connection
    pub acquire_timeout: Duration,
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        Self {
            database_url: format!("sqlite:{}", database_path.into().display()),
            max_connections: 4,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
        }
    }

    /// A private in-memory database
    ///
    /// Limited to one connection, since each in-memory connection would
    /// otherwise see its own empty database.
    pub fn in_memory() -> Self {
        Self {
            database_url: MEMORY_URL.to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    fn is_memory(&self) -> bool {
        self.database_url == MEMORY_URL
    }
}

/// Open the listing database and bring its schema up to date
///
/// # Errors
///
/// [`LibraryError::Database`] when the file cannot be opened or queried,
/// [`LibraryError::Migration`] when the schema cannot be applied.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    let journal = if config.is_memory() {
        SqliteJournalMode::Memory
    } else {
        SqliteJournalMode::Wal
    };

    let options = SqliteConnectOptions::from_str(&config.database_url)?
        .create_if_missing(true)
        .journal_mode(journal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(config.busy_timeout);

    // In-memory connections must never be recycled
    let (max_lifetime, idle_timeout) = if config.is_memory() {
        (None, None)
    } else {
        (Some(Duration::from_secs(1800)), Some(Duration::from_secs(600)))
    };

    let pool = SqlitePoolOptions::new()
        .min_connections(1)
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .max_lifetime(max_lifetime)
        .idle_timeout(idle_timeout)
        .connect_with(options)
        .await
        .map_err(|e| {
            warn!(url = %config.database_url, error = %e, "Cannot open listing database");
            LibraryError::Database(e)
        })?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| LibraryError::Migration(e.to_string()))?;

    sqlx::query("SELECT 1").execute(&pool).await?;

    info!(url = %config.database_url, max_connections = config.max_connections, "Listing database ready");
    Ok(pool)
}

/// In-memory listing database with the schema applied
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    debug!("Opening in-memory listing database");
    create_pool(DatabaseConfig::in_memory()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_schema_tables_exist() {
        let pool = create_test_pool().await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(name,)| name.as_str()).collect();

        for table in [
            "asset_attachments",
            "assets",
            "listing_meta",
            "listing_terms",
            "listings",
            "terms",
        ] {
            assert!(names.contains(&table), "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn test_foreign_keys_are_enforced() {
        let pool = create_test_pool().await.unwrap();

        let (enabled,): (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_file_database_uses_wal() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::new(dir.path().join("listings.db")).max_connections(2);
        assert_eq!(
            config.database_url,
            format!("sqlite:{}", dir.path().join("listings.db").display())
        );

        let pool = create_pool(config).await.unwrap();
        let (mode,): (String,) = sqlx::query_as("PRAGMA journal_mode")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        pool.close().await;
    }
}
