//! # Listing Sync Engine
//!
//! Resumable, chunked synchronization of partner listings from the remote
//! listing API into the local listing store.
//!
//! ## Overview
//!
//! Every action runs as a series of short invocations. Each invocation handles
//! at most one chunk of records, persists its progress after every record and
//! returns a status report. An interrupted action resumes from the last saved
//! record without duplicating listings or assets.
//!
//! ## Components
//!
//! - **Actions** (`action`): Action names, init modes and resolved actions
//! - **Run State** (`run_state`): Status machine, counters and last-run snapshot
//! - **Run State Store** (`state_store`): Durable progress in the settings area
//! - **Page Cache** (`page_cache`): Compressed raw responses keyed by request
//! - **Remote Source** (`remote`): Partner API client and its wire types
//! - **Asset Reconciler** (`assets`): Image download, dedup and attachment
//! - **Record Applier** (`applier`): Listing upsert with meta and terms
//! - **Sync Engine** (`engine`): Preflight, phases, cancellation and postflight
//! - **Progress** (`progress`): Chunk arithmetic and continuation rules

pub mod action;
pub mod applier;
pub mod assets;
pub mod context;
pub mod engine;
pub mod error;
pub mod page_cache;
pub mod progress;
pub mod remote;
pub mod run_state;
pub mod state_store;

pub use action::{ActionKind, InitMode, PhaseParams, ResetStage, SyncAction};
pub use applier::{ApplyOutcome, ListingType, RecordApplier};
pub use assets::{AssetReconciler, ReconcileOutcome};
pub use context::RunContext;
pub use engine::{EngineDependencies, EngineSettings, SyncEngine};
pub use error::{FetchError, Result, SyncError};
pub use page_cache::{CacheKeys, PageCache, SqlitePageCache};
pub use progress::{continuation, Continuation, PageCursor};
pub use remote::{CachedSource, RemoteQuery, RemoteRecord, RemoteSourceClient, SourcePage};
pub use run_state::{LastRunRecord, RunState, RunStatus, StatusReport};
pub use state_store::{RunStateStore, SettingsRunStateStore};
