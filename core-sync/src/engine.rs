//! # Sync Engine
//!
//! The resumable state machine that drives every import and delete action in
//! chunks.
//!
//! ## Overview
//!
//! Each call to [`SyncEngine::run`] is one *invocation*: it handles at most one
//! chunk of records and returns a [`StatusReport`]. A caller reaches the end of
//! an action by invoking it again (usually with `init = resume`) until
//! `processed >= total`. [`crate::progress::continuation`] encodes that rule.
//!
//! ## Invocation lifecycle
//!
//! 1. **Preflight**: the listing store must be reachable and the stored status
//!    must accept a new run (`Free`, `FreeCanceled` or `Error`). Parameters are
//!    resolved, the counters are initialised according to the init mode and the
//!    status moves to `Running` (`Busy` for `delete_cache`).
//! 2. **Phase**: the action fetches its window through the page cache and
//!    applies records one at a time. State is saved after every record, and a
//!    pending cancellation request is honoured before the fetch and before each
//!    record.
//! 3. **Postflight**: the last-run snapshot is captured and the status returns
//!    to `Free`.
//!
//! Any error after preflight leaves the status at `Error` with the counters as
//! they were at the failure, so the next resume replays from the last saved
//! record.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_sync::{EngineDependencies, PhaseParams, SyncEngine};
//!
//! # async fn example(config: core_runtime::config::SyncConfig, deps: EngineDependencies) -> core_sync::Result<()> {
//! let engine = SyncEngine::new(&config, "secret", deps).await?;
//!
//! let mut report = engine.run_phase("import_all", PhaseParams::hard()).await?;
//! while report.processed < report.total {
//!     report = engine.run_phase("import_all", PhaseParams::resume()).await?;
//! }
//! # Ok(())
//! # }
//! ```

use crate::{
    action::{ActionKind, InitMode, PhaseParams, ResetStage, SyncAction},
    applier::RecordApplier,
    assets::AssetReconciler,
    context::RunContext,
    page_cache::{CacheKeys, PageCache, SqlitePageCache},
    progress::{cursor_for_page, next_cursor, page_of_offset},
    remote::{CachedSource, RemoteRecord, RemoteSourceClient},
    run_state::{LastRunRecord, RunState, RunStatus, StatusReport},
    state_store::{RunStateStore, SettingsRunStateStore},
    Result, SyncError,
};
use bridge_traits::{
    http::HttpClient,
    storage::{FileSystemAccess, SettingsStore},
    time::Clock,
};
use chrono::{DateTime, Duration as WindowDuration, NaiveDate};
use core_library::repositories::{
    AssetRepository, ListingRepository, SqliteAssetRepository, SqliteListingRepository,
    SqliteTermRepository, TermRepository,
};
use core_runtime::config::SyncConfig;
use sqlx::SqlitePool;
use std::borrow::Cow;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

/// Phase labels stored in `RunState::method`
pub mod method {
    pub const IMPORT_FETCH: &str = "import/fetch";
    pub const IMPORT_UPDATE: &str = "import/update";
    pub const IMPORT_UPDATE_IMAGES: &str = "import/update_images";
    pub const DELETE_FETCH: &str = "delete/fetch";
    pub const DELETE_PURGE: &str = "delete/purge";
    pub const DELETE_PRUNE: &str = "delete/prune";
    pub const DELETE_META: &str = "delete/meta";
    pub const DELETE_CLEANUP: &str = "delete/cleanup";
    pub const CACHE_CREATE: &str = "cache/create";
    pub const CACHE_DELETE: &str = "cache/delete";
}

/// Tunables the engine reads from [`SyncConfig`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub chunk_size: u32,
    pub import_interval: WindowDuration,
    pub stale_interval: WindowDuration,
    pub stale_interval_after_full_import: WindowDuration,
}

impl From<&SyncConfig> for EngineSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            import_interval: config.import_interval,
            stale_interval: config.stale_interval,
            stale_interval_after_full_import: config.stale_interval_after_full_import,
        }
    }
}

/// Host capabilities and storage the engine is built from
#[derive(Clone)]
pub struct EngineDependencies {
    pub http: Arc<dyn HttpClient>,
    pub file_system: Arc<dyn FileSystemAccess>,
    pub settings: Arc<dyn SettingsStore>,
    pub clock: Arc<dyn Clock>,
    pub db_pool: SqlitePool,
}

/// How an invocation's phase ended
enum PhaseEnd {
    Finished(RunState),
    Canceled(RunState),
}

/// Whether an import must fetch the full record before applying it
#[derive(Debug, Clone, Copy)]
enum Hydration {
    Always,
    IfPartial,
    Never,
}

/// What to do with each record of a fetched window
#[derive(Debug, Clone, Copy)]
enum RecordMode {
    Import(Hydration),
    Images,
    Stale,
}

/// The chunked synchronization state machine
pub struct SyncEngine {
    settings: EngineSettings,
    store: Arc<dyn RunStateStore>,
    source: CachedSource,
    cache: Arc<dyn PageCache>,
    listings: Arc<dyn ListingRepository>,
    terms: Arc<dyn TermRepository>,
    reconciler: Arc<AssetReconciler>,
    applier: RecordApplier,
    clock: Arc<dyn Clock>,
    /// Serialises the status check-and-set of preflight, cancel and recover
    gate: Mutex<()>,
}

impl SyncEngine {
    /// Build the engine and everything it owns from configuration
    ///
    /// # Arguments
    ///
    /// * `config` - Validated sync configuration
    /// * `api_password` - Resolved partner API password
    /// * `deps` - Host capabilities and the library database pool
    pub async fn new(
        config: &SyncConfig,
        api_password: impl Into<String>,
        deps: EngineDependencies,
    ) -> Result<Self> {
        let listings: Arc<dyn ListingRepository> =
            Arc::new(SqliteListingRepository::new(deps.db_pool.clone()));
        let terms: Arc<dyn TermRepository> =
            Arc::new(SqliteTermRepository::new(deps.db_pool.clone()));
        let assets: Arc<dyn AssetRepository> =
            Arc::new(SqliteAssetRepository::new(deps.db_pool.clone()));
        let cache: Arc<dyn PageCache> = Arc::new(SqlitePageCache::new(deps.db_pool.clone()).await?);

        let settings = EngineSettings::from(config);

        let client = RemoteSourceClient::from_config(deps.http.clone(), config, api_password);
        let source = CachedSource::new(
            client,
            cache.clone(),
            CacheKeys::new(config.cache_key_prefix.clone()),
            deps.clock.clone(),
            settings.chunk_size,
        );

        let reconciler = Arc::new(AssetReconciler::new(
            assets,
            deps.http.clone(),
            deps.file_system.clone(),
            deps.clock.clone(),
            config.asset_dir.clone(),
            config.image_base_url.clone(),
            config.request_timeout,
        ));

        let applier = RecordApplier::new(
            listings.clone(),
            terms.clone(),
            reconciler.clone(),
            deps.clock.clone(),
        );

        let store: Arc<dyn RunStateStore> = Arc::new(SettingsRunStateStore::new(deps.settings));

        info!(chunk_size = settings.chunk_size, "Sync engine ready");

        Ok(Self {
            settings,
            store,
            source,
            cache,
            listings,
            terms,
            reconciler,
            applier,
            clock: deps.clock,
            gate: Mutex::new(()),
        })
    }

    pub fn chunk_size(&self) -> u32 {
        self.settings.chunk_size
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Run one invocation of the action named `action_name`
    pub async fn run_phase(&self, action_name: &str, params: PhaseParams) -> Result<StatusReport> {
        let kind: ActionKind = action_name.parse()?;
        self.run(kind, params).await
    }

    /// Run one invocation of `kind`
    pub async fn run(&self, kind: ActionKind, params: PhaseParams) -> Result<StatusReport> {
        let mut ctx = RunContext::new();
        let span = info_span!("sync_phase", run_id = %ctx.run_id(), action = kind.name());

        async move {
            let (action, state) = self.preflight(kind, &params).await?;
            info!(%action, init = ?params.init, page = ?params.page, "Phase started");

            match self.execute(&mut ctx, &action, &params, state).await {
                Ok(end) => self.postflight(&action, end).await,
                Err(e) => {
                    self.abort(&e).await;
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Request cancellation of the running action
    ///
    /// While `Running` the request is stored and observed at the next record
    /// boundary. A `Free` engine whose last action stopped early is marked
    /// `FreeCanceled` directly. In every other state this is a no-op.
    #[instrument(skip(self))]
    pub async fn cancel(&self) -> Result<StatusReport> {
        let _gate = self.gate.lock().await;
        let state = self.store.load().await?;

        match state.status {
            RunStatus::Running => {
                self.store.request_cancel().await?;
                info!(method = %state.method, "Cancellation requested");
                Ok(StatusReport::from(&state))
            }
            RunStatus::Free if !state.is_exhausted() => {
                let canceled = state.cancel(self.clock.unix_timestamp())?;
                self.store.save(&canceled).await?;
                info!("Unfinished action marked canceled");
                Ok(StatusReport::from(&canceled))
            }
            _ => Ok(StatusReport::from(&state)),
        }
    }

    /// Invoke the action recorded in the last-run snapshot with `init = resume`
    pub async fn resume(&self) -> Result<StatusReport> {
        let snapshot = self
            .store
            .last_run()
            .await?
            .ok_or_else(|| SyncError::MissingParameter {
                action: "resume".to_string(),
                parameter: "last_run".to_string(),
            })?;

        self.run(snapshot.action, PhaseParams::resume()).await
    }

    /// Current persisted run state
    pub async fn status(&self) -> Result<StatusReport> {
        Ok(StatusReport::from(&self.store.load().await?))
    }

    pub async fn last_run(&self) -> Result<Option<LastRunRecord>> {
        self.store.last_run().await
    }

    /// Number of listings in the local store
    pub async fn local_count(&self) -> Result<u64> {
        let count = self.listings.count().await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Release a `Running`/`Busy` status left behind by a crashed process
    ///
    /// Must only be called at startup, before any invocation of this process
    /// is in flight. The last-run snapshot is kept so the action can resume.
    #[instrument(skip(self))]
    pub async fn recover(&self) -> Result<StatusReport> {
        let _gate = self.gate.lock().await;
        let state = self.store.load().await?;

        if !state.status.is_active() {
            return Ok(StatusReport::from(&state));
        }

        warn!(
            status = %state.status,
            method = %state.method,
            processed = state.processed,
            "Releasing run state left by an interrupted process"
        );
        let released = state.cancel(self.clock.unix_timestamp())?;
        self.store.save(&released).await?;
        self.store.clear_cancel().await?;

        Ok(StatusReport::from(&released))
    }

    // ========================================================================
    // Preflight and postflight
    // ========================================================================

    async fn preflight(&self, kind: ActionKind, params: &PhaseParams) -> Result<(SyncAction, RunState)> {
        if !self.listings.is_available().await? {
            return Err(SyncError::Preflight(
                "listing store is not available".to_string(),
            ));
        }

        let _gate = self.gate.lock().await;
        let state = self.store.load().await?;
        if !state.status.accepts_new_run() {
            return Err(SyncError::Preflight(format!(
                "engine is {} ({})",
                state.status, state.method
            )));
        }

        let snapshot = self.store.last_run().await?;
        let same_action = snapshot.as_ref().filter(|s| s.action == kind);
        let action = self
            .resolve(kind, params, snapshot.as_ref(), &state)
            .await?;

        let initialized = match (params.init, same_action) {
            (InitMode::Hard, _) => state.clone().reset_counters(),
            (InitMode::Soft, _) => state.clone().carry_over(),
            (InitMode::Resume, Some(snapshot)) => state.clone().restore_from(snapshot),
            (InitMode::Resume, None) => state.clone().reset_counters(),
        };

        let now = self.clock.unix_timestamp();
        let claim = |state: RunState| match &action {
            SyncAction::DeleteCache => state.occupy(method::CACHE_DELETE, now),
            _ => state.start(initial_method(&action), now),
        };
        let held = claim(state)?;
        let started = claim(initialized)?;

        // Stored counters stay as they were until the phase has its records
        self.store.clear_cancel().await?;
        self.store.save(&held).await?;
        self.store.save_last_run(&capture(&action, &started)).await?;

        Ok((action, started))
    }

    async fn resolve(
        &self,
        kind: ActionKind,
        params: &PhaseParams,
        snapshot: Option<&LastRunRecord>,
        state: &RunState,
    ) -> Result<SyncAction> {
        let same_action = snapshot.filter(|s| s.action == kind);

        let action = match kind {
            ActionKind::ImportChanged => SyncAction::ImportChanged {
                since: self.resolve_date(kind, params, snapshot).await?,
            },
            ActionKind::DeleteStale => SyncAction::DeleteStale {
                since: self.resolve_date(kind, params, snapshot).await?,
            },
            ActionKind::ImportSingle => {
                let listing_id = params
                    .listing_id
                    .or_else(|| same_action.and_then(|s| s.listing_id))
                    .ok_or_else(|| missing(kind, "listing_id"))?;
                SyncAction::ImportSingle { listing_id }
            }
            ActionKind::ImportAll => SyncAction::ImportAll,
            ActionKind::ImportImages => SyncAction::ImportImages,
            ActionKind::DeleteAll => SyncAction::DeleteAll,
            ActionKind::ResetAll => SyncAction::ResetAll {
                stage: match params.init {
                    InitMode::Hard => ResetStage::Delete,
                    InitMode::Soft => ResetStage::Import,
                    InitMode::Resume if state.method.starts_with("import") => ResetStage::Import,
                    InitMode::Resume => ResetStage::Delete,
                },
            },
            ActionKind::BuildCache => SyncAction::BuildCache,
            ActionKind::DeleteCache => SyncAction::DeleteCache,
        };

        Ok(action)
    }

    /// Date window of a date-windowed action
    ///
    /// An explicit date wins. A resumed run reuses the date of its snapshot.
    /// A fresh run looks back from now by the configured interval, or further
    /// if the last import happened before that.
    async fn resolve_date(
        &self,
        kind: ActionKind,
        params: &PhaseParams,
        snapshot: Option<&LastRunRecord>,
    ) -> Result<NaiveDate> {
        if let Some(date) = params.parsed_date()? {
            return Ok(date);
        }

        if params.init == InitMode::Resume {
            if let Some(date) = snapshot
                .filter(|s| s.action == kind)
                .and_then(|s| s.fetch_date)
            {
                return Ok(date);
            }
        }

        let interval = match kind {
            ActionKind::DeleteStale
                if snapshot.map(|s| s.action) == Some(ActionKind::ImportAll) =>
            {
                self.settings.stale_interval_after_full_import
            }
            ActionKind::DeleteStale => self.settings.stale_interval,
            _ => self.settings.import_interval,
        };

        let window_start = (self.clock.now() - interval).date_naive();
        let last_import = self
            .store
            .last_import_time()
            .await?
            .and_then(|ts| DateTime::from_timestamp(ts, 0))
            .map(|t| t.date_naive());

        Ok(match last_import {
            Some(date) => date.min(window_start),
            None => window_start,
        })
    }

    async fn postflight(&self, action: &SyncAction, end: PhaseEnd) -> Result<StatusReport> {
        let state = match end {
            PhaseEnd::Canceled(state) => return Ok(StatusReport::from(&state)),
            PhaseEnd::Finished(state) => state,
        };

        // A request that arrived after the last record still counts
        if state.status == RunStatus::Running {
            if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
                return Ok(StatusReport::from(&canceled));
            }
        }

        let now = self.clock.unix_timestamp();
        let state = state.complete(now)?;
        self.store.save(&state).await?;
        self.store.save_last_run(&capture(action, &state)).await?;
        if action.imports_listings() {
            self.store.set_last_import_time(now).await?;
        }

        info!(
            processed = state.processed,
            added = state.added,
            deleted = state.deleted,
            total = state.total,
            page = state.current_page,
            "Phase finished"
        );
        Ok(StatusReport::from(&state))
    }

    async fn abort(&self, error: &SyncError) {
        error!(error = %error, retryable = error.is_retryable(), "Phase failed");

        if let Err(e) = self.record_failure().await {
            error!(error = %e, "Could not record failed phase");
        }
    }

    async fn record_failure(&self) -> Result<()> {
        let state = self.store.load().await?;
        if !state.status.is_active() {
            return Ok(());
        }

        // The snapshot from preflight is kept so a resume replays this invocation
        let failed = state.fail(self.clock.unix_timestamp())?;
        self.store.save(&failed).await
    }

    /// Stop the phase if a cancellation request is pending
    async fn cancel_if_requested(
        &self,
        action: &SyncAction,
        state: &RunState,
    ) -> Result<Option<RunState>> {
        if !self.store.cancel_requested().await? {
            return Ok(None);
        }

        let canceled = state.clone().cancel(self.clock.unix_timestamp())?;
        self.store.save(&canceled).await?;
        self.store.save_last_run(&capture(action, &canceled)).await?;
        self.store.clear_cancel().await?;

        info!(processed = canceled.processed, "Cancellation observed, run stopped");
        Ok(Some(canceled))
    }

    // ========================================================================
    // Phases
    // ========================================================================

    async fn execute(
        &self,
        ctx: &mut RunContext,
        action: &SyncAction,
        params: &PhaseParams,
        state: RunState,
    ) -> Result<PhaseEnd> {
        match *action {
            SyncAction::ImportChanged { since } => self.import_changed(ctx, action, since, state).await,
            SyncAction::ImportSingle { listing_id } => {
                self.import_single(ctx, action, listing_id, state).await
            }
            SyncAction::ImportAll | SyncAction::ResetAll { stage: ResetStage::Import } => {
                self.import_paged(ctx, action, params.page, state, RecordMode::Import(Hydration::IfPartial))
                    .await
            }
            SyncAction::ImportImages => {
                self.import_paged(ctx, action, params.page, state, RecordMode::Images)
                    .await
            }
            SyncAction::DeleteAll | SyncAction::ResetAll { stage: ResetStage::Delete } => {
                self.delete_all(action, state).await
            }
            SyncAction::DeleteStale { since } => self.delete_stale(ctx, action, since, state).await,
            SyncAction::BuildCache => self.build_cache(action, params.page, state).await,
            SyncAction::DeleteCache => self.delete_cache(state).await,
        }
    }

    /// One page of the full listing set, resuming inside a partial page
    async fn import_paged(
        &self,
        ctx: &mut RunContext,
        action: &SyncAction,
        page_override: Option<u32>,
        state: RunState,
        mode: RecordMode,
    ) -> Result<PhaseEnd> {
        let chunk = self.settings.chunk_size;
        let cursor = match page_override {
            Some(page) => cursor_for_page(page, state.processed, chunk),
            None => next_cursor(state.current_page, state.processed, chunk),
        };

        if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
            return Ok(PhaseEnd::Canceled(canceled));
        }

        let page = self.source.listings_page(cursor.page).await?;
        let label = match mode {
            RecordMode::Images => method::IMPORT_UPDATE_IMAGES,
            _ => method::IMPORT_UPDATE,
        };
        let state = state
            .with_total(page.total)
            .with_page(cursor.page)
            .with_method(label, self.clock.unix_timestamp());
        self.store.save(&state).await?;

        debug!(
            page = cursor.page,
            offset = cursor.offset,
            records = page.records.len(),
            total = page.total,
            "Fetched listing page"
        );

        let start = cursor.offset.min(page.records.len());
        self.apply_records(ctx, action, state, &page.records[start..], mode)
            .await
    }

    /// One chunk of the listings changed since `since`
    async fn import_changed(
        &self,
        ctx: &mut RunContext,
        action: &SyncAction,
        since: NaiveDate,
        state: RunState,
    ) -> Result<PhaseEnd> {
        if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
            return Ok(PhaseEnd::Canceled(canceled));
        }

        let changed = self.source.changed_since(since).await?;
        let (state, window) = self.date_window(state, &changed.records, method::IMPORT_UPDATE);
        self.store.save(&state).await?;

        self.apply_records(ctx, action, state, window, RecordMode::Import(Hydration::Always))
            .await
    }

    async fn import_single(
        &self,
        ctx: &mut RunContext,
        action: &SyncAction,
        listing_id: i64,
        state: RunState,
    ) -> Result<PhaseEnd> {
        if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
            return Ok(PhaseEnd::Canceled(canceled));
        }

        let record = self.source.listing(listing_id).await?;
        let state = RunState {
            processed: 0,
            total: 1,
            current_page: 1,
            ..state
        }
        .with_method(method::IMPORT_UPDATE, self.clock.unix_timestamp());
        self.store.save(&state).await?;

        self.apply_records(
            ctx,
            action,
            state,
            std::slice::from_ref(&record),
            RecordMode::Import(Hydration::Never),
        )
        .await
    }

    /// One chunk of the listings invalidated since `since`, then pruning
    async fn delete_stale(
        &self,
        ctx: &mut RunContext,
        action: &SyncAction,
        since: NaiveDate,
        state: RunState,
    ) -> Result<PhaseEnd> {
        if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
            return Ok(PhaseEnd::Canceled(canceled));
        }

        let invalid = self.source.invalid_since(since).await?;
        let (state, window) = self.date_window(state, &invalid.records, method::DELETE_PRUNE);
        self.store.save(&state).await?;

        match self
            .apply_records(ctx, action, state, window, RecordMode::Stale)
            .await?
        {
            PhaseEnd::Finished(state) => Ok(PhaseEnd::Finished(self.prune(state).await?)),
            canceled => Ok(canceled),
        }
    }

    /// One chunk of local listings in title order, then pruning
    async fn delete_all(&self, action: &SyncAction, state: RunState) -> Result<PhaseEnd> {
        if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
            return Ok(PhaseEnd::Canceled(canceled));
        }

        let batch = self
            .listings
            .list_by_title(i64::from(self.settings.chunk_size))
            .await?;
        let remaining = u64::try_from(self.listings.count().await?).unwrap_or(0);
        let total = remaining + state.processed;
        let page = state.current_page + 1;

        let mut state = state
            .with_total(total)
            .with_page(page)
            .with_method(method::DELETE_PURGE, self.clock.unix_timestamp());
        self.store.save(&state).await?;

        for listing in batch {
            if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
                return Ok(PhaseEnd::Canceled(canceled));
            }

            let deleted = match self.purge_listing(listing.id).await {
                Ok(deleted) => deleted,
                Err(e) => {
                    warn!(listing_id = listing.id, error = %e, "Could not delete listing");
                    0
                }
            };

            state = state.record(false, deleted, self.clock.unix_timestamp());
            self.store.save(&state).await?;
        }

        Ok(PhaseEnd::Finished(self.prune(state).await?))
    }

    /// Warm one page of the page cache
    ///
    /// Counters are in pages: `processed` and `added` are the page just
    /// cached, `total` the number of pages in the source.
    async fn build_cache(
        &self,
        action: &SyncAction,
        page_override: Option<u32>,
        state: RunState,
    ) -> Result<PhaseEnd> {
        if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
            return Ok(PhaseEnd::Canceled(canceled));
        }

        let page = page_override.unwrap_or(state.current_page + 1).max(1);
        let fetched = self.source.listings_page(page).await?;
        let pages = fetched
            .total
            .div_ceil(u64::from(self.settings.chunk_size));

        let state = RunState {
            processed: u64::from(page),
            added: u64::from(page),
            total: pages,
            current_page: page,
            ..state
        }
        .with_method(method::CACHE_CREATE, self.clock.unix_timestamp());
        self.store.save(&state).await?;

        debug!(page, pages, "Cached listing page");
        Ok(PhaseEnd::Finished(state))
    }

    /// Drop every cached page while the engine is `Busy`
    async fn delete_cache(&self, state: RunState) -> Result<PhaseEnd> {
        let count = self.cache.count().await?;
        let state = RunState {
            processed: count,
            total: count,
            ..state
        };
        self.store.save(&state).await?;

        let purged = self.cache.purge_all().await?;
        debug!(count, purged, "Purged page cache");

        Ok(PhaseEnd::Finished(RunState {
            deleted: count,
            ..state
        }))
    }

    // ========================================================================
    // Record handling
    // ========================================================================

    /// Position a date-windowed invocation at its first unhandled record
    fn date_window<'a>(
        &self,
        state: RunState,
        records: &'a [RemoteRecord],
        label: &str,
    ) -> (RunState, &'a [RemoteRecord]) {
        let chunk = self.settings.chunk_size;
        let total = records.len() as u64;
        let start = state.processed.min(total) as usize;
        let end = (start + chunk as usize).min(records.len());

        let state = state
            .with_total(total)
            .with_page(page_of_offset(start as u64, chunk))
            .with_method(label, self.clock.unix_timestamp());

        (state, &records[start..end])
    }

    /// Apply `records` in order, saving state after each one
    ///
    /// A record that fails is logged and still counted as processed.
    async fn apply_records(
        &self,
        ctx: &mut RunContext,
        action: &SyncAction,
        mut state: RunState,
        records: &[RemoteRecord],
        mode: RecordMode,
    ) -> Result<PhaseEnd> {
        for record in records {
            if let Some(canceled) = self.cancel_if_requested(action, &state).await? {
                return Ok(PhaseEnd::Canceled(canceled));
            }

            let (added, deleted) = match mode {
                RecordMode::Import(hydration) => (self.import_record(ctx, record, hydration).await, 0),
                RecordMode::Images => (self.import_record_images(ctx, record).await, 0),
                RecordMode::Stale => (false, self.delete_record(record).await),
            };

            state = state.record(added, deleted, self.clock.unix_timestamp());
            self.store.save(&state).await?;
        }

        Ok(PhaseEnd::Finished(state))
    }

    async fn import_record(&self, ctx: &mut RunContext, record: &RemoteRecord, hydration: Hydration) -> bool {
        let record = match self.hydrate(record, hydration).await {
            Ok(record) => record,
            Err(e) => {
                warn!(external_id = ?record.listing_id, error = %e, "Could not fetch full listing, skipping");
                return false;
            }
        };

        match self.applier.apply(ctx, &record).await {
            Ok(_) => true,
            Err(e) => {
                warn!(external_id = ?record.listing_id, error = %e, "Record skipped");
                false
            }
        }
    }

    async fn import_record_images(&self, ctx: &mut RunContext, record: &RemoteRecord) -> bool {
        if record.field("PHOTOFILE").is_none() {
            debug!(external_id = ?record.listing_id, "No photo declared, skipping images");
            return false;
        }

        let record = match self.hydrate(record, Hydration::IfPartial).await {
            Ok(record) => record,
            Err(e) => {
                warn!(external_id = ?record.listing_id, error = %e, "Could not fetch full listing, skipping");
                return false;
            }
        };

        match self.applier.apply_images(ctx, &record).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(external_id = ?record.listing_id, error = %e, "Images skipped");
                false
            }
        }
    }

    async fn hydrate<'a>(
        &self,
        record: &'a RemoteRecord,
        hydration: Hydration,
    ) -> Result<Cow<'a, RemoteRecord>> {
        let wanted = match hydration {
            Hydration::Always => true,
            Hydration::IfPartial => record.needs_hydration(),
            Hydration::Never => false,
        };
        if !wanted {
            return Ok(Cow::Borrowed(record));
        }

        let external_id = record
            .listing_id
            .ok_or_else(|| SyncError::InvalidRecord("record has no LISTINGID".to_string()))?;
        Ok(Cow::Owned(self.source.listing(external_id).await?))
    }

    /// Delete every local copy of an invalidated remote record
    async fn delete_record(&self, record: &RemoteRecord) -> u64 {
        let Some(external_id) = record.listing_id else {
            warn!("Invalidated record has no LISTINGID, skipping");
            return 0;
        };

        match self.remove_by_external(external_id).await {
            Ok(deleted) => deleted,
            Err(e) => {
                warn!(external_id, error = %e, "Could not delete listing");
                0
            }
        }
    }

    async fn remove_by_external(&self, external_id: i64) -> Result<u64> {
        let mut deleted = 0;
        for listing_id in self.listings.find_ids_by_external(external_id).await? {
            deleted += self.purge_listing(listing_id).await?;
        }
        Ok(deleted)
    }

    async fn purge_listing(&self, listing_id: i64) -> Result<u64> {
        self.reconciler.release_listing(listing_id).await?;
        Ok(u64::from(self.listings.delete(listing_id).await?))
    }

    /// Remove empty terms and orphaned meta after deletions
    async fn prune(&self, state: RunState) -> Result<RunState> {
        let state = state.with_method(method::DELETE_META, self.clock.unix_timestamp());
        self.store.save(&state).await?;
        let terms = self.terms.prune_empty().await?;

        let state = state.with_method(method::DELETE_CLEANUP, self.clock.unix_timestamp());
        self.store.save(&state).await?;
        let meta = self.listings.prune_orphaned_meta().await?;

        debug!(terms, meta, "Pruned empty terms and orphaned meta");
        Ok(state)
    }
}

fn initial_method(action: &SyncAction) -> &'static str {
    match action {
        SyncAction::ImportChanged { .. }
        | SyncAction::ImportSingle { .. }
        | SyncAction::ImportAll
        | SyncAction::ImportImages
        | SyncAction::ResetAll {
            stage: ResetStage::Import,
        } => method::IMPORT_FETCH,
        SyncAction::DeleteAll
        | SyncAction::DeleteStale { .. }
        | SyncAction::ResetAll {
            stage: ResetStage::Delete,
        } => method::DELETE_FETCH,
        SyncAction::BuildCache => method::CACHE_CREATE,
        SyncAction::DeleteCache => method::CACHE_DELETE,
    }
}

fn capture(action: &SyncAction, state: &RunState) -> LastRunRecord {
    LastRunRecord::capture(action.kind(), action.fetch_date(), action.listing_id(), state)
}

fn missing(kind: ActionKind, parameter: &str) -> SyncError {
    SyncError::MissingParameter {
        action: kind.name().to_string(),
        parameter: parameter.to_string(),
    }
}
