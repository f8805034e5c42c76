//! Integration tests for the core service façade

use async_trait::async_trait;
use bridge_desktop::{SqliteSettingsStore, TokioFileSystem};
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    http::{HttpClient, HttpRequest, HttpResponse},
    storage::SettingsStore,
    time::ManualClock,
};
use chrono::{NaiveDate, TimeZone, Utc};
use core_library::create_test_pool;
use core_runtime::config::SyncConfig;
use core_service::{CoreDependencies, CoreError, CoreService, DriveOutcome};
use core_sync::{PhaseParams, RunState, RunStateStore, RunStatus, SettingsRunStateStore};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

const API_URL: &str = "https://partners.example.com/api";

/// Partner API serving a fixed listing set
#[derive(Default)]
struct FakePartnerApi {
    listings: Mutex<Vec<Value>>,
    changed: Mutex<Vec<Value>>,
    invalid: Mutex<Vec<Value>>,
}

impl FakePartnerApi {
    fn collection(action: &str, records: &[Value]) -> Value {
        let wrapper = match action {
            "getChangedListings" => "CHANGEDLISTINGS",
            "getInvalidListings" => "INVALIDLISTINGS",
            _ => "LISTINGS",
        };
        json!({
            "REQUESTSTATUS": { "HASERRORS": 0, "RESULTS": records.len() },
            wrapper: { "LISTING": records }
        })
    }
}

#[async_trait]
impl HttpClient for FakePartnerApi {
    async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse> {
        let body = request.body.unwrap_or_default();
        let form: HashMap<String, String> = serde_urlencoded::from_bytes(&body)
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;
        let action = form.get("action").cloned().unwrap_or_default();
        let args: Value = serde_json::from_str(form.get("args").map(String::as_str).unwrap_or("{}"))
            .map_err(|e| BridgeError::OperationFailed(e.to_string()))?;

        let document = match action.as_str() {
            "getListings" => {
                let listings = self.listings.lock().await;
                let page = args["pagenum"].as_u64().unwrap_or(1).max(1) as usize;
                let size = args["pagesize"].as_u64().unwrap_or(25) as usize;
                let slice: Vec<Value> = listings
                    .iter()
                    .skip((page - 1) * size)
                    .take(size)
                    .cloned()
                    .collect();
                json!({
                    "REQUESTSTATUS": { "HASERRORS": 0, "RESULTS": listings.len() },
                    "LISTINGS": { "LISTING": slice }
                })
            }
            "getListing" => {
                let id = args["LISTINGID"].as_i64();
                let listings = self.listings.lock().await;
                let found = listings.iter().find(|l| l["LISTINGID"].as_i64() == id);
                json!({
                    "REQUESTSTATUS": { "HASERRORS": 0, "RESULTS": 1 },
                    "LISTING": found.cloned().unwrap_or(Value::Null)
                })
            }
            "getChangedListings" => Self::collection(&action, &self.changed.lock().await),
            "getInvalidListings" => Self::collection(&action, &self.invalid.lock().await),
            _ => json!({ "REQUESTSTATUS": { "HASERRORS": 1 } }),
        };

        Ok(HttpResponse::new(200, document.to_string()))
    }
}

struct Harness {
    _dir: TempDir,
    api: Arc<FakePartnerApi>,
    store: SettingsRunStateStore,
    core: CoreService,
}

fn config(dir: &TempDir, chunk_size: u32) -> SyncConfig {
    SyncConfig::builder()
        .api_url(API_URL)
        .api_username("partner")
        .api_password("secret")
        .chunk_size(chunk_size)
        .database_path(dir.path().join("library.db"))
        .asset_dir(dir.path().join("assets"))
        .build()
        .unwrap()
}

async fn dependencies(
    dir: &TempDir,
    api: Arc<FakePartnerApi>,
    settings: Arc<dyn SettingsStore>,
) -> CoreDependencies {
    CoreDependencies::new(
        api,
        Arc::new(TokioFileSystem::with_data_directory(dir.path().to_path_buf())),
        settings,
    )
    .with_clock(Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap(),
    )))
}

async fn harness(chunk_size: u32) -> Harness {
    let dir = TempDir::new().unwrap();
    let api = Arc::new(FakePartnerApi::default());
    let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    let deps = dependencies(&dir, api.clone(), settings.clone()).await;

    let core = CoreService::with_pool(config(&dir, chunk_size), deps, create_test_pool().await.unwrap())
        .await
        .unwrap();

    Harness {
        _dir: dir,
        api,
        store: SettingsRunStateStore::new(settings),
        core,
    }
}

fn listing(id: i64, company: &str) -> Value {
    json!({ "LISTINGID": id, "COMPANY": company, "TYPENAME": "Visitors", "REGION": "Downtown" })
}

async fn seed(api: &FakePartnerApi) {
    *api.listings.lock().await = vec![
        listing(1, "Alpha Cafe"),
        listing(2, "Bravo Hotel"),
        listing(3, "Charlie Tours"),
    ];
}

#[tokio::test]
async fn test_status_object_for_phase() {
    let h = harness(2).await;
    seed(&h.api).await;

    let status = h.core.run_phase_json("import_all", PhaseParams::hard()).await;
    assert_eq!(status["status"], "free");
    assert_eq!(status["processed"], 2);
    assert_eq!(status["total"], 3);
    assert_eq!(status["page"], 1);

    let error = h.core.run_phase_json("import_everything", PhaseParams::hard()).await;
    assert_eq!(error["status"], "error");
    assert!(error["message"].as_str().unwrap().contains("import_everything"));
}

#[tokio::test]
async fn test_running_action_and_local_count() {
    let h = harness(25).await;
    seed(&h.api).await;

    assert_eq!(h.core.fetch_running_action().await.unwrap(), "NONE");
    assert_eq!(h.core.fetch_local_count().await.unwrap(), 0);

    h.core.run_phase("import_all", PhaseParams::hard()).await.unwrap();

    assert_eq!(h.core.fetch_running_action().await.unwrap(), "import_all");
    assert_eq!(h.core.fetch_local_count().await.unwrap(), 3);
    assert_eq!(h.core.fetch_status().await.unwrap().status, RunStatus::Free);
}

#[tokio::test]
async fn test_busy_engine_reports_error_object() {
    let h = harness(25).await;
    seed(&h.api).await;

    let running = RunState {
        status: RunStatus::Running,
        method: "import/update".to_string(),
        ..RunState::default()
    };
    h.store.save(&running).await.unwrap();

    let status = h.core.run_phase_json("import_all", PhaseParams::hard()).await;
    assert_eq!(status["status"], "error");
    assert_eq!(h.core.fetch_status().await.unwrap().status, RunStatus::Running);
}

#[tokio::test]
async fn test_bootstrap_releases_interrupted_run() {
    let dir = TempDir::new().unwrap();
    let api = Arc::new(FakePartnerApi::default());
    let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());

    let store = SettingsRunStateStore::new(settings.clone());
    store
        .save(&RunState {
            status: RunStatus::Running,
            processed: 4,
            total: 10,
            ..RunState::default()
        })
        .await
        .unwrap();

    let deps = dependencies(&dir, api, settings).await;
    let core = CoreService::with_pool(config(&dir, 2), deps, create_test_pool().await.unwrap())
        .await
        .unwrap();

    let status = core.fetch_status().await.unwrap();
    assert_eq!(status.status, RunStatus::FreeCanceled);
    assert_eq!(status.processed, 4);
}

#[tokio::test]
async fn test_bootstrap_without_password_source_fails() {
    let dir = TempDir::new().unwrap();
    let api = Arc::new(FakePartnerApi::default());
    let settings: Arc<dyn SettingsStore> = Arc::new(SqliteSettingsStore::in_memory().await.unwrap());
    let deps = dependencies(&dir, api, settings).await;

    let config = SyncConfig {
        api_password: None,
        ..config(&dir, 2)
    };
    let result = CoreService::with_pool(config, deps, create_test_pool().await.unwrap()).await;

    assert!(matches!(result, Err(CoreError::Runtime(_))));
}

#[tokio::test]
async fn test_reset_all_deletes_then_imports() {
    let h = harness(2).await;
    seed(&h.api).await;
    h.core.run_phase("import_all", PhaseParams::hard()).await.unwrap();
    assert_eq!(h.core.fetch_local_count().await.unwrap(), 2);

    let outcome = h.core.reset_all().await.unwrap();

    assert!(outcome.is_completed());
    let report = outcome.into_report();
    assert_eq!((report.processed, report.total), (3, 3));
    assert_eq!(report.deleted, 2);
    assert_eq!(report.added, 3);
    assert_eq!(h.core.fetch_local_count().await.unwrap(), 3);
    assert_eq!(h.core.fetch_running_action().await.unwrap(), "reset_all");
}

#[tokio::test]
async fn test_scheduled_import_skips_empty_stale_window() {
    let h = harness(2).await;
    seed(&h.api).await;
    *h.api.changed.lock().await = vec![json!({ "LISTINGID": 1 }), json!({ "LISTINGID": 3 })];

    let since = NaiveDate::from_ymd_opt(2024, 5, 1);
    let outcome = h.core.scheduled_import(since).await.unwrap();

    let DriveOutcome::Completed(report) = outcome else {
        panic!("scheduled import halted");
    };
    assert_eq!(report.status, RunStatus::Free);
    assert_eq!((report.processed, report.added), (2, 2));
    assert_eq!(h.core.fetch_local_count().await.unwrap(), 2);
    assert_eq!(h.core.fetch_running_action().await.unwrap(), "import_new");
}

#[tokio::test]
async fn test_scheduled_invalidate_cache() {
    let h = harness(2).await;
    seed(&h.api).await;
    h.core.run_phase("import_all", PhaseParams::hard()).await.unwrap();

    let outcome = h.core.scheduled_invalidate_cache().await.unwrap();
    assert!(outcome.is_completed());
    assert_eq!(outcome.report().deleted, 1);
}
