//! # Run State Store
//!
//! Durable persistence of [`RunState`], the last-run snapshot, the
//! cancellation flag and the last import time, on top of the host's
//! [`SettingsStore`].
//!
//! Every read goes to the settings store; nothing is cached in memory, so a
//! read always observes the latest write of the same process. The counters of
//! one `RunState` are written inside a single settings transaction.

use crate::run_state::{LastRunRecord, RunState, RunStatus};
use crate::Result;
use async_trait::async_trait;
use bridge_traits::storage::SettingsStore;
use std::sync::Arc;
use tracing::{debug, warn};

const KEY_STATUS: &str = "sync.status";
const KEY_METHOD: &str = "sync.method";
const KEY_TIMESTAMP: &str = "sync.timestamp";
const KEY_PROCESSED: &str = "sync.processed";
const KEY_ADDED: &str = "sync.added";
const KEY_DELETED: &str = "sync.deleted";
const KEY_TOTAL: &str = "sync.total";
const KEY_PAGE: &str = "sync.page";
const KEY_LAST_RUN: &str = "sync.last_run";
const KEY_CANCEL_REQUESTED: &str = "sync.cancel_requested";
const KEY_LAST_IMPORT: &str = "sync.last_import_time";

/// Persistence contract for engine progress
#[async_trait]
pub trait RunStateStore: Send + Sync {
    /// Current run state; defaults (`Free`, zero counters) on first use
    async fn load(&self) -> Result<RunState>;

    /// Replace the stored run state atomically
    async fn save(&self, state: &RunState) -> Result<()>;

    /// Latest last-run snapshot, if any action ever ran
    async fn last_run(&self) -> Result<Option<LastRunRecord>>;

    async fn save_last_run(&self, record: &LastRunRecord) -> Result<()>;

    /// Record an external cancellation request
    async fn request_cancel(&self) -> Result<()>;

    async fn cancel_requested(&self) -> Result<bool>;

    async fn clear_cancel(&self) -> Result<()>;

    /// Unix timestamp of the last phase start or end
    async fn last_import_time(&self) -> Result<Option<i64>>;

    async fn set_last_import_time(&self, timestamp: i64) -> Result<()>;
}

/// [`RunStateStore`] backed by the host settings area
pub struct SettingsRunStateStore {
    settings: Arc<dyn SettingsStore>,
}

impl SettingsRunStateStore {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        Self { settings }
    }

    async fn get_u64(&self, key: &str) -> Result<u64> {
        let value = self.settings.get_i64(key).await?.unwrap_or(0);
        Ok(u64::try_from(value).unwrap_or(0))
    }
}

#[async_trait]
impl RunStateStore for SettingsRunStateStore {
    async fn load(&self) -> Result<RunState> {
        let status = match self.settings.get_string(KEY_STATUS).await? {
            Some(raw) => raw.parse::<RunStatus>()?,
            None => RunStatus::Free,
        };

        Ok(RunState {
            status,
            method: self
                .settings
                .get_string(KEY_METHOD)
                .await?
                .unwrap_or_default(),
            timestamp: self.settings.get_i64(KEY_TIMESTAMP).await?.unwrap_or(0),
            processed: self.get_u64(KEY_PROCESSED).await?,
            added: self.get_u64(KEY_ADDED).await?,
            deleted: self.get_u64(KEY_DELETED).await?,
            total: self.get_u64(KEY_TOTAL).await?,
            current_page: u32::try_from(self.get_u64(KEY_PAGE).await?).unwrap_or(u32::MAX),
        })
    }

    async fn save(&self, state: &RunState) -> Result<()> {
        let mut tx = self.settings.begin_transaction().await?;

        let written = async {
            tx.set_string(KEY_STATUS, state.status.as_str()).await?;
            tx.set_string(KEY_METHOD, &state.method).await?;
            tx.set_i64(KEY_TIMESTAMP, state.timestamp).await?;
            tx.set_i64(KEY_PROCESSED, clamp(state.processed)).await?;
            tx.set_i64(KEY_ADDED, clamp(state.added)).await?;
            tx.set_i64(KEY_DELETED, clamp(state.deleted)).await?;
            tx.set_i64(KEY_TOTAL, clamp(state.total)).await?;
            tx.set_i64(KEY_PAGE, i64::from(state.current_page)).await?;
            Ok::<_, bridge_traits::BridgeError>(())
        }
        .await;

        match written {
            Ok(()) => {
                tx.commit().await?;
                debug!(
                    status = %state.status,
                    method = %state.method,
                    processed = state.processed,
                    total = state.total,
                    "Run state saved"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Run state write failed, rolling back");
                tx.rollback().await?;
                Err(e.into())
            }
        }
    }

    async fn last_run(&self) -> Result<Option<LastRunRecord>> {
        match self.settings.get_string(KEY_LAST_RUN).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save_last_run(&self, record: &LastRunRecord) -> Result<()> {
        let raw = serde_json::to_string(record)?;
        self.settings.set_string(KEY_LAST_RUN, &raw).await?;
        Ok(())
    }

    async fn request_cancel(&self) -> Result<()> {
        self.settings.set_bool(KEY_CANCEL_REQUESTED, true).await?;
        Ok(())
    }

    async fn cancel_requested(&self) -> Result<bool> {
        Ok(self
            .settings
            .get_bool(KEY_CANCEL_REQUESTED)
            .await?
            .unwrap_or(false))
    }

    async fn clear_cancel(&self) -> Result<()> {
        self.settings.delete(KEY_CANCEL_REQUESTED).await?;
        Ok(())
    }

    async fn last_import_time(&self) -> Result<Option<i64>> {
        Ok(self.settings.get_i64(KEY_LAST_IMPORT).await?)
    }

    async fn set_last_import_time(&self, timestamp: i64) -> Result<()> {
        self.settings.set_i64(KEY_LAST_IMPORT, timestamp).await?;
        Ok(())
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionKind;
    use bridge_desktop::SqliteSettingsStore;
    use chrono::NaiveDate;

    async fn store() -> SettingsRunStateStore {
        let settings = SqliteSettingsStore::in_memory().await.unwrap();
        SettingsRunStateStore::new(Arc::new(settings))
    }

    #[tokio::test]
    async fn test_defaults_on_first_use() {
        let store = store().await;

        let state = store.load().await.unwrap();
        assert_eq!(state, RunState::default());
        assert!(store.last_run().await.unwrap().is_none());
        assert!(!store.cancel_requested().await.unwrap());
        assert!(store.last_import_time().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_is_consistent() {
        let store = store().await;
        let state = RunState {
            status: RunStatus::FreeCanceled,
            method: "import/update".to_string(),
            timestamp: 1_700_000_000,
            processed: 12,
            added: 10,
            deleted: 1,
            total: 40,
            current_page: 1,
        };

        store.save(&state).await.unwrap();
        assert_eq!(store.load().await.unwrap(), state);
    }

    #[tokio::test]
    async fn test_last_run_snapshot_persisted() {
        let store = store().await;
        let record = LastRunRecord {
            action: ActionKind::DeleteStale,
            fetch_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            listing_id: None,
            page: 0,
            processed: 3,
            added: 0,
            deleted: 2,
        };

        store.save_last_run(&record).await.unwrap();
        assert_eq!(store.last_run().await.unwrap(), Some(record));
    }

    #[tokio::test]
    async fn test_cancel_flag_lifecycle() {
        let store = store().await;

        store.request_cancel().await.unwrap();
        store.request_cancel().await.unwrap();
        assert!(store.cancel_requested().await.unwrap());

        store.clear_cancel().await.unwrap();
        assert!(!store.cancel_requested().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_status_is_rejected() {
        let settings = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
        settings.set_string(KEY_STATUS, "sleeping").await.unwrap();

        let store = SettingsRunStateStore::new(settings);
        assert!(store.load().await.is_err());
    }
}
