//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, filesystem,
//! settings, secure storage, clock) into the listing sync engine and exposes
//! the operations a host calls: running one phase, cancelling, resuming and
//! the status queries. Desktop hosts typically enable the `desktop-shims`
//! feature, which depends on `bridge-desktop`.
//!
//! ```rust,ignore
//! use core_service::{CoreDependencies, CoreService};
//! use core_sync::PhaseParams;
//!
//! # async fn example(config: core_runtime::config::SyncConfig, deps: CoreDependencies) -> core_service::Result<()> {
//! let core = CoreService::bootstrap(config, deps).await?;
//!
//! let status = core.run_phase_json("import_all", PhaseParams::hard()).await;
//! println!("{}", status);
//! # Ok(())
//! # }
//! ```

pub mod driver;
pub mod error;

pub use driver::{ContinuationDriver, DriveOutcome};
pub use error::{CoreError, Result};
pub use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};

use std::sync::Arc;

use bridge_traits::{
    http::HttpClient,
    storage::{FileSystemAccess, SecureStore, SettingsStore},
    time::{Clock, SystemClock},
};
use chrono::NaiveDate;
use core_library::{create_pool, DatabaseConfig};
use core_runtime::config::SyncConfig;
use core_sync::{
    ActionKind, EngineDependencies, FetchError, LastRunRecord, PhaseParams, StatusReport,
    SyncEngine, SyncError,
};
use serde_json::{json, Value};
use sqlx::SqlitePool;
use tracing::{info, warn};

/// Reported by [`CoreService::fetch_running_action`] when nothing ever ran
pub const NO_ACTION: &str = "NONE";

/// Aggregated handle to all bridge dependencies the core requires.
pub struct CoreDependencies {
    pub http_client: Arc<dyn HttpClient>,
    pub filesystem: Arc<dyn FileSystemAccess>,
    pub settings_store: Arc<dyn SettingsStore>,
    pub secure_store: Option<Arc<dyn SecureStore>>,
    pub clock: Arc<dyn Clock>,
}

impl CoreDependencies {
    /// Construct a dependency bundle from explicit bridge handles.
    pub fn new(
        http_client: Arc<dyn HttpClient>,
        filesystem: Arc<dyn FileSystemAccess>,
        settings_store: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            http_client,
            filesystem,
            settings_store,
            secure_store: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_secure_store(mut self, secure_store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(secure_store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    engine: Arc<SyncEngine>,
    driver: ContinuationDriver,
}

impl CoreService {
    /// Open the library database named by `config` and build the service
    pub async fn bootstrap(config: SyncConfig, deps: CoreDependencies) -> Result<Self> {
        let pool = create_pool(DatabaseConfig::new(config.database_path.clone())).await?;
        Self::with_pool(config, deps, pool).await
    }

    /// Build the service on an already opened library database
    ///
    /// A run left `Running` by a crashed process is released so it can be
    /// resumed.
    pub async fn with_pool(
        config: SyncConfig,
        deps: CoreDependencies,
        pool: SqlitePool,
    ) -> Result<Self> {
        config.validate()?;
        let password = config
            .resolve_password(deps.secure_store.as_deref())
            .await?;

        let engine = SyncEngine::new(
            &config,
            password,
            EngineDependencies {
                http: deps.http_client,
                file_system: deps.filesystem,
                settings: deps.settings_store,
                clock: deps.clock,
                db_pool: pool,
            },
        )
        .await
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
        let engine = Arc::new(engine);

        let recovered = engine.recover().await?;
        info!(status = %recovered.status, "Core service ready");

        Ok(Self {
            driver: ContinuationDriver::new(engine.clone()),
            engine,
        })
    }

    pub fn engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.engine)
    }

    pub fn driver(&self) -> &ContinuationDriver {
        &self.driver
    }

    // ========================================================================
    // Phase entrypoints
    // ========================================================================

    /// Run one invocation of `action`
    pub async fn run_phase(&self, action: &str, params: PhaseParams) -> Result<StatusReport> {
        Ok(self.engine.run_phase(action, params).await?)
    }

    /// Run one invocation and render the outcome as a status object
    ///
    /// Failures become `{"status": "error", "message": ...}`.
    pub async fn run_phase_json(&self, action: &str, params: PhaseParams) -> Value {
        let outcome = self.run_phase(action, params).await;
        status_json(outcome)
    }

    /// Request cancellation of the running action
    pub async fn cancel(&self) -> Result<StatusReport> {
        Ok(self.engine.cancel().await?)
    }

    /// Continue the action recorded in the last-run snapshot
    pub async fn resume(&self) -> Result<StatusReport> {
        Ok(self.engine.resume().await?)
    }

    /// Release a run left behind by a crashed process
    pub async fn recover(&self) -> Result<StatusReport> {
        Ok(self.engine.recover().await?)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub async fn fetch_status(&self) -> Result<StatusReport> {
        Ok(self.engine.status().await?)
    }

    /// Name of the action in the last-run snapshot, or `NONE`
    pub async fn fetch_running_action(&self) -> Result<String> {
        let name = self
            .engine
            .last_run()
            .await?
            .map(|snapshot: LastRunRecord| snapshot.action.name())
            .unwrap_or(NO_ACTION);
        Ok(name.to_string())
    }

    pub async fn fetch_local_count(&self) -> Result<u64> {
        Ok(self.engine.local_count().await?)
    }

    // ========================================================================
    // Composite operations
    // ========================================================================

    /// Delete every local listing, then import the full source
    pub async fn reset_all(&self) -> Result<DriveOutcome> {
        let deleted = self
            .driver
            .drive(ActionKind::ResetAll, PhaseParams::hard())
            .await?;
        if !deleted.is_completed() {
            return Ok(deleted);
        }

        self.driver
            .drive(ActionKind::ResetAll, PhaseParams::soft())
            .await
    }

    /// Remove stale listings, then import changed ones
    ///
    /// Both stages share `since` when given and otherwise use their own
    /// default windows. A stage whose window is empty is skipped.
    pub async fn scheduled_import(&self, since: Option<NaiveDate>) -> Result<DriveOutcome> {
        let with_since = |params: PhaseParams| match since {
            Some(date) => params.with_date(date.format("%Y-%m-%d").to_string()),
            None => params,
        };

        match self
            .driver
            .drive(ActionKind::DeleteStale, with_since(PhaseParams::hard()))
            .await
        {
            Ok(outcome) if !outcome.is_completed() => return Ok(outcome),
            Ok(_) => {}
            Err(e) if is_empty_window(&e) => info!("No stale listings to remove"),
            Err(e) => return Err(e),
        }

        match self
            .driver
            .drive(ActionKind::ImportChanged, with_since(PhaseParams::soft()))
            .await
        {
            Err(e) if is_empty_window(&e) => {
                info!("No changed listings to import");
                Ok(DriveOutcome::Completed(self.fetch_status().await?))
            }
            other => other,
        }
    }

    /// Drop every cached page
    pub async fn scheduled_invalidate_cache(&self) -> Result<DriveOutcome> {
        self.driver
            .drive(ActionKind::DeleteCache, PhaseParams::hard())
            .await
    }
}

fn is_empty_window(error: &CoreError) -> bool {
    matches!(error, CoreError::Sync(SyncError::Fetch(FetchError::Empty)))
}

/// Status object for a phase outcome
pub fn status_json(outcome: Result<StatusReport>) -> Value {
    match outcome {
        Ok(report) => serde_json::to_value(&report).unwrap_or_else(|e| {
            warn!(error = %e, "Could not encode status report");
            json!({ "status": "error", "message": e.to_string() })
        }),
        Err(e) => json!({ "status": "error", "message": e.message() }),
    }
}

/// Build a service backed by the desktop bridges
///
/// Settings live next to the library database in `settings.db`.
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(config: SyncConfig) -> Result<CoreService> {
    use bridge_desktop::{ReqwestHttpClient, SqliteSettingsStore, TokioFileSystem};

    let http = ReqwestHttpClient::new()
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;
    let settings_path = config.database_path.with_file_name("settings.db");
    let settings = SqliteSettingsStore::new(settings_path)
        .await
        .map_err(|e| CoreError::InitializationFailed(e.to_string()))?;

    #[allow(unused_mut)]
    let mut deps = CoreDependencies::new(
        Arc::new(http),
        Arc::new(TokioFileSystem::new()),
        Arc::new(settings),
    );

    #[cfg(feature = "secure-store")]
    {
        deps = deps.with_secure_store(Arc::new(bridge_desktop::KeyringSecureStore::new()));
    }

    CoreService::bootstrap(config, deps).await
}
