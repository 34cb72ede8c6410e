// uesearch - per-workspace code search service for Unreal Engine source
// trees. Root library module: the durable store, the in-memory query
// index, the ingest pipeline, the external-engine driver, and the HTTP
// API that ties them together.

pub mod analytics;
pub mod config;
pub mod error;
pub mod grep;
pub mod http_server;
pub mod http_types;
pub mod ingest;
pub mod memory_index;
pub mod mirror;
pub mod observability;
pub mod query_pool;
pub mod scoring;
pub mod services;
pub mod store;
pub mod trigram;
pub mod types;
pub mod zoekt;

// Re-export key types
pub use analytics::AnalyticsSink;
pub use config::Config;
pub use error::{ApiError, StoreError};
pub use http_server::{build_router, AppState};
pub use http_types::{IngestRequest, IngestResponse};
pub use ingest::IngestService;
pub use memory_index::MemoryIndex;
pub use mirror::MirrorMaintainer;
pub use observability::{init_logging, init_logging_with_level};
pub use query_pool::QueryPool;
pub use store::Store;
pub use zoekt::ZoektDriver;

use anyhow::{Context, Result};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use services::{AssetService, SearchService, StatsService};

/// Wire every subsystem in startup order: store open/migrate, memory
/// index load, mirror bootstrap, external engine, query pool, services.
pub async fn build_state(config: Config) -> Result<AppState> {
    let config = Arc::new(config);
    let store = Arc::new(Store::open(&config.data.db_path)?);

    let index = Arc::new(MemoryIndex::new());
    {
        let store = store.clone();
        let loaded = tokio::task::spawn_blocking(move || store.load_all())
            .await
            .context("memory index load task")??;
        index.load(&loaded);
    }

    let mirror = Arc::new(MirrorMaintainer::new(&config.data.mirror_dir));
    {
        let content_files = store.content_file_count()?;
        if !mirror.is_bootstrapped(content_files) {
            let mirror = mirror.clone();
            let store = store.clone();
            tokio::task::spawn_blocking(move || mirror.bootstrap(&store))
                .await
                .context("mirror bootstrap task")??;
        }
    }

    let zoekt = if config.zoekt.enabled {
        let driver = Arc::new(ZoektDriver::new(
            &config.zoekt,
            &config.data.index_dir,
            mirror.root(),
        )?);
        if let Err(err) = driver.clone().start().await {
            // the supervisor keeps restarting it; /grep degrades to the
            // internal scanner meanwhile
            warn!(error = %err, "external engine unhealthy at startup");
        }
        driver.clone().trigger_reindex().await;
        Some(driver)
    } else {
        info!("external engine disabled, /grep uses the internal scanner");
        None
    };

    let pool = QueryPool::new(
        store.clone(),
        config.service.query_pool_size,
        config.service.query_queue_limit,
        Duration::from_millis(config.service.query_timeout_ms),
    )?;

    let ingest = Arc::new(IngestService::new(
        store.clone(),
        index.clone(),
        mirror.clone(),
        zoekt.clone(),
    ));
    let analytics = AnalyticsSink::start(store.clone());
    let search = Arc::new(SearchService::new(index.clone(), pool.clone()));
    let assets = Arc::new(AssetService::new(index.clone()));
    let stats = Arc::new(StatsService::new(
        store.clone(),
        pool.clone(),
        config.clone(),
    ));

    Ok(AppState {
        config,
        store,
        index,
        pool,
        mirror,
        zoekt,
        ingest,
        analytics,
        search,
        assets,
        stats,
        stop_watcher: Arc::new(AtomicBool::new(false)),
    })
}

/// Run the service until ctrl-c, then shut down the external engine and
/// the query pool.
pub async fn run_service(config: Config) -> Result<()> {
    let host = config.service.host.clone();
    let port = config.service.port;
    let state = build_state(config).await?;

    let listener = tokio::net::TcpListener::bind((host.as_str(), port))
        .await
        .with_context(|| format!("binding {host}:{port}"))?;
    info!(host = %host, port = port, "uesearch serving");

    let zoekt = state.zoekt.clone();
    let pool = state.pool.clone();
    let app = build_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("http server")?;

    if let Some(zoekt) = zoekt {
        zoekt.shutdown().await;
    }
    pool.shutdown().await;
    Ok(())
}
