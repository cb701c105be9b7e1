//! Headless sync agent: restores local drafts and queue, then keeps them
//! synchronized with the configured server.

use fieldsync::database::{self, SqliteStore};
use fieldsync::models::SurveySchema;
use fieldsync::services::{
    ConnectivityHandle, DraftRegistry, PhotoQueue, ReachabilityProbe, RetryPolicy,
    SyncOrchestrator, WebDavTransport,
};
use fieldsync::storage::KeyValueStore;
use fieldsync::{logging, AppError, EngineConfig};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

const DEFAULT_CONFIG_PATH: &str = "./data/fieldsync.toml";

fn main() {
    logging::init();

    if let Err(e) = run() {
        log::error!("fieldsync-agent failed: {}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}

fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("FIELDSYNC_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn load_schema() -> Result<SurveySchema, AppError> {
    match std::env::var_os("FIELDSYNC_SCHEMA") {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            SurveySchema::from_toml(&content)
        }
        None => Ok(SurveySchema::default()),
    }
}

fn run() -> Result<(), AppError> {
    let config = EngineConfig::load(&config_path())?;
    let server = config
        .server
        .clone()
        .ok_or_else(|| AppError::Config("missing [server] section".to_string()))?;
    let schema = Arc::new(load_schema()?);

    let db_path = config
        .database_path
        .clone()
        .unwrap_or_else(database::default_database_path);
    log::info!("Opening database at {:?}", db_path);
    let storage: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&db_path)?);

    let drafts = Arc::new(Mutex::new(DraftRegistry::load_all(schema, storage.clone())));
    let queue = Arc::new(Mutex::new(PhotoQueue::load(
        RetryPolicy::from(&config.queue),
        storage,
    )));
    let transport = Arc::new(WebDavTransport::new(server.clone())?);
    let orchestrator = SyncOrchestrator::new(drafts, queue, transport, &config);
    orchestrator.reconcile();

    let (handle, connectivity) = ConnectivityHandle::new(false);
    let probe = ReachabilityProbe::new(&server, config.sync.probe_interval(), handle)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let mut status = orchestrator.subscribe();
        let report_status = async {
            while status.changed().await.is_ok() {
                let snapshot = status.borrow_and_update().clone();
                log::info!(
                    "Status {}: {} pending, {} uploading, {} failed, storage {:.1}%",
                    snapshot.status,
                    snapshot.pending_count,
                    snapshot.uploading_count,
                    snapshot.failed_count,
                    snapshot.storage_percent_used
                );
                if snapshot.storage_nearly_full {
                    log::warn!("Local photo storage is nearly full");
                }
            }
        };

        tokio::join!(probe.run(), orchestrator.run(connectivity), report_status);
    });

    Ok(())
}
