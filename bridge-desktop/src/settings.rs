//! Settings area in a SQLite file

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{SettingsStore, SettingsTransaction},
};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions},
    Executor, Sqlite, Transaction,
};
use std::path::PathBuf;
use tracing::{debug, warn};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        kind TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

const UPSERT: &str = r#"
    INSERT INTO settings (key, value, kind, updated_at)
    VALUES (?1, ?2, ?3, strftime('%s', 'now'))
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        kind = excluded.kind,
        updated_at = excluded.updated_at
"#;

/// Type tag stored beside every value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Text,
    Integer,
    Flag,
}

impl Kind {
    fn as_str(&self) -> &'static str {
        match self {
            Kind::Text => "text",
            Kind::Integer => "integer",
            Kind::Flag => "flag",
        }
    }
}

fn db_error(context: &str) -> impl Fn(sqlx::Error) -> BridgeError + '_ {
    move |e| BridgeError::DatabaseError(format!("{}: {}", context, e))
}

async fn write<'e, E>(executor: E, key: &str, value: &str, kind: Kind) -> Result<()>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(UPSERT)
        .bind(key)
        .bind(value)
        .bind(kind.as_str())
        .execute(executor)
        .await
        .map_err(db_error("write setting"))?;
    Ok(())
}

/// [`SettingsStore`] kept in its own SQLite database
pub struct SqliteSettingsStore {
    pool: SqlitePool,
}

impl SqliteSettingsStore {
    /// Open (or create) the settings database at `db_path`
    pub async fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(db_error("open settings database"))?;

        debug!(path = ?db_path, "Opened settings store");
        Self::with_pool(pool).await
    }

    /// Settings store that lives only as long as the process
    ///
    /// One connection, so every statement sees the same database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error("open in-memory settings"))?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(db_error("create settings table"))?;
        Ok(Self { pool })
    }

    async fn read(&self, key: &str, kind: Kind) -> Result<Option<String>> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT value, kind FROM settings WHERE key = ?1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error("read setting"))?;

        match row {
            None => Ok(None),
            Some((value, stored)) if stored == kind.as_str() => Ok(Some(value)),
            Some((_, stored)) => {
                warn!(key, expected = kind.as_str(), stored = %stored, "Setting read with wrong type");
                Err(BridgeError::OperationFailed(format!(
                    "setting '{}' holds a {} value, not {}",
                    key,
                    stored,
                    kind.as_str()
                )))
            }
        }
    }
}

#[async_trait]
impl SettingsStore for SqliteSettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        write(&self.pool, key, value, Kind::Text).await
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        self.read(key, Kind::Text).await
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        write(&self.pool, key, if value { "1" } else { "0" }, Kind::Flag).await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.read(key, Kind::Flag).await?.map(|raw| raw == "1"))
    }

    async fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        write(&self.pool, key, &value.to_string(), Kind::Integer).await
    }

    async fn get_i64(&self, key: &str) -> Result<Option<i64>> {
        self.read(key, Kind::Integer)
            .await?
            .map(|raw| {
                raw.parse().map_err(|e| {
                    BridgeError::OperationFailed(format!("setting '{}' is not an integer: {}", key, e))
                })
            })
            .transpose()
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM settings WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(db_error("delete setting"))?;
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn SettingsTransaction + Send>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(db_error("begin settings transaction"))?;
        Ok(Box::new(SqliteSettingsTransaction { tx }))
    }
}

/// Writes buffered in an open SQLite transaction
struct SqliteSettingsTransaction {
    tx: Transaction<'static, Sqlite>,
}

#[async_trait]
impl SettingsTransaction for SqliteSettingsTransaction {
    async fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        write(&mut *self.tx, key, value, Kind::Text).await
    }

    async fn set_i64(&mut self, key: &str, value: i64) -> Result<()> {
        write(&mut *self.tx, key, &value.to_string(), Kind::Integer).await
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(db_error("commit settings transaction"))
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx
            .rollback()
            .await
            .map_err(db_error("roll back settings transaction"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_typed_values() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        store.set_string("sync.method", "import/update").await.unwrap();
        store.set_bool("sync.cancel_requested", true).await.unwrap();
        store.set_i64("sync.processed", 42).await.unwrap();

        assert_eq!(
            store.get_string("sync.method").await.unwrap().as_deref(),
            Some("import/update")
        );
        assert_eq!(store.get_bool("sync.cancel_requested").await.unwrap(), Some(true));
        assert_eq!(store.get_i64("sync.processed").await.unwrap(), Some(42));
        assert_eq!(store.get_i64("sync.missing").await.unwrap(), None);

        // Reading with the wrong type is refused
        assert!(store.get_string("sync.processed").await.is_err());

        store.delete("sync.method").await.unwrap();
        store.delete("sync.method").await.unwrap();
        assert_eq!(store.get_string("sync.method").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_commit_publishes_all_writes() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set_string("sync.status", "running").await.unwrap();
        tx.set_i64("sync.processed", 25).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(
            store.get_string("sync.status").await.unwrap().as_deref(),
            Some("running")
        );
        assert_eq!(store.get_i64("sync.processed").await.unwrap(), Some(25));
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = SqliteSettingsStore::in_memory().await.unwrap();
        store.set_i64("sync.processed", 10).await.unwrap();

        let mut tx = store.begin_transaction().await.unwrap();
        tx.set_i64("sync.processed", 50).await.unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get_i64("sync.processed").await.unwrap(), Some(10));
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("settings.db");

        {
            let store = SqliteSettingsStore::new(path.clone()).await.unwrap();
            store.set_i64("sync.last_import_time", 1_700_000_000).await.unwrap();
        }

        let store = SqliteSettingsStore::new(path).await.unwrap();
        assert_eq!(
            store.get_i64("sync.last_import_time").await.unwrap(),
            Some(1_700_000_000)
        );
    }
}
