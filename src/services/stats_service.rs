// Cached stats, per-language status, and the /summary projection.

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::error::ApiError;
use crate::query_pool::QueryPool;
use crate::store::{self, Store};
use crate::types::{IndexStats, IndexStatus};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub generated_at: String,
    pub stats: IndexStats,
    pub projects: Vec<String>,
    pub languages: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_build: Option<serde_json::Value>,
    pub statuses: Vec<IndexStatus>,
}

pub struct StatsService {
    store: Arc<Store>,
    pool: Arc<QueryPool>,
    config: Arc<Config>,
}

impl StatsService {
    pub fn new(store: Arc<Store>, pool: Arc<QueryPool>, config: Arc<Config>) -> Self {
        Self {
            store,
            pool,
            config,
        }
    }

    /// Row-count aggregates with a short in-process TTL, recomputed
    /// through the pool and invalidated by every ingest.
    pub async fn stats(&self) -> Result<IndexStats, ApiError> {
        if let Some(cached) = self.store.cached_stats() {
            return Ok(cached);
        }
        let stats = self
            .pool
            .run(|conn| store::read::compute_stats(conn))
            .await?;
        self.store.cache_stats(stats.clone());
        Ok(stats)
    }

    pub async fn statuses(&self) -> Result<Vec<IndexStatus>, ApiError> {
        self.pool.run(|conn| store::read::index_status(conn)).await
    }

    pub async fn summary(&self) -> Result<Summary, ApiError> {
        let stats = self.stats().await?;
        let statuses = self.statuses().await?;
        let last_build = self
            .pool
            .run(|conn| store::read::meta(conn, "last_build"))
            .await?
            .and_then(|raw| serde_json::from_str(&raw).ok());
        let languages = stats.by_language.keys().cloned().collect();
        Ok(Summary {
            generated_at: chrono::Utc::now().to_rfc3339(),
            stats,
            projects: self.config.project_names(),
            languages,
            last_build,
            statuses,
        })
    }
}
