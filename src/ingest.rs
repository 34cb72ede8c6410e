// Ingest service: the only path that mutates durable state. One writer at
// a time; store mutations commit in a single transaction per batch, and
// only then are the mirror, the memory index, and the (debounced) external
// reindex updated. Replaying a batch is a no-op.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{ApiError, StoreError};
use crate::http_types::{IngestRequest, IngestResponse};
use crate::memory_index::MemoryIndex;
use crate::mirror::MirrorMaintainer;
use crate::store::{BatchOutcome, Store};
use crate::zoekt::ZoektDriver;

/// Upper bound on one batch, matching what the watcher sends.
const MAX_BATCH_FILES: usize = 5_000;

pub struct IngestService {
    store: Arc<Store>,
    index: Arc<MemoryIndex>,
    mirror: Arc<MirrorMaintainer>,
    zoekt: Option<Arc<ZoektDriver>>,
    /// Serializes concurrent ingest requests (FIFO on the async mutex).
    write_lock: Mutex<()>,
}

impl IngestService {
    pub fn new(
        store: Arc<Store>,
        index: Arc<MemoryIndex>,
        mirror: Arc<MirrorMaintainer>,
        zoekt: Option<Arc<ZoektDriver>>,
    ) -> Self {
        Self {
            store,
            index,
            mirror,
            zoekt,
            write_lock: Mutex::new(()),
        }
    }

    pub async fn apply(&self, request: IngestRequest) -> Result<IngestResponse, ApiError> {
        validate(&request)?;
        let _writer = self.write_lock.lock().await;
        let started = Instant::now();

        let outcome = self.commit(Arc::new(request)).await?;

        // post-commit: the memory index patch makes the batch visible to
        // queries in submission order
        self.index.ingest_diff(
            &outcome.removed_file_ids,
            &outcome.added_files,
            &outcome.removed_asset_ids,
            &outcome.added_assets,
        );
        self.update_mirror(&outcome).await;
        if outcome.content_changed {
            if let Some(zoekt) = &self.zoekt {
                zoekt.clone().trigger_reindex().await;
            }
        }

        let response = IngestResponse {
            ok: true,
            files_upserted: outcome.files_upserted,
            assets_upserted: outcome.assets_upserted,
            deleted: outcome.deleted,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            files = response.files_upserted,
            assets = response.assets_upserted,
            deleted = response.deleted,
            duration_ms = response.duration_ms,
            "ingest batch applied"
        );
        Ok(response)
    }

    /// Run the transactional store mutation on a blocking thread, retrying
    /// once when the store reports a transient failure.
    async fn commit(&self, request: Arc<IngestRequest>) -> Result<BatchOutcome, ApiError> {
        let store = self.store.clone();
        let req = request.clone();
        let first = tokio::task::spawn_blocking(move || store.apply_batch(&req))
            .await
            .map_err(|err| ApiError::Internal(format!("ingest worker failed: {err}")))?;
        match first {
            Err(StoreError::Unavailable(msg)) => {
                warn!(error = %msg, "ingest transaction rolled back, retrying once");
                let store = self.store.clone();
                tokio::task::spawn_blocking(move || store.apply_batch(&request))
                    .await
                    .map_err(|err| ApiError::Internal(format!("ingest worker failed: {err}")))?
                    .map_err(ApiError::from)
            }
            other => other.map_err(ApiError::from),
        }
    }

    async fn update_mirror(&self, outcome: &BatchOutcome) {
        let mirror = self.mirror.clone();
        let writes = outcome.mirror_writes.clone();
        let deletes = outcome.mirror_deletes.clone();
        let result = tokio::task::spawn_blocking(move || {
            for path in &deletes {
                if let Err(err) = mirror.delete_file(path) {
                    warn!(path = %path, error = %err, "mirror delete failed");
                }
            }
            for (path, content) in &writes {
                if let Err(err) = mirror.update_file(path, content) {
                    warn!(path = %path, error = %err, "mirror write failed");
                }
            }
        })
        .await;
        if let Err(err) = result {
            // the mirror is advisory; a failed update is repaired by the
            // next bootstrap
            warn!(error = %err, "mirror update task failed");
        }
    }
}

fn validate(request: &IngestRequest) -> Result<(), ApiError> {
    if request.files.len() > MAX_BATCH_FILES {
        return Err(ApiError::bad_request(format!(
            "batch exceeds {MAX_BATCH_FILES} files"
        )));
    }
    for file in &request.files {
        if file.path.trim().is_empty() {
            return Err(ApiError::bad_request("file path must not be empty"));
        }
        if file.relative_path.trim().is_empty() {
            return Err(ApiError::bad_request("relativePath must not be empty"));
        }
        if file.project.trim().is_empty() {
            return Err(ApiError::bad_request("project must not be empty"));
        }
        if file.language.stores_content() && file.content.is_none() {
            return Err(ApiError::bad_request(format!(
                "content missing for source file {}",
                file.path
            )));
        }
    }
    for asset in &request.assets {
        if asset.path.trim().is_empty() || asset.name.trim().is_empty() {
            return Err(ApiError::bad_request("asset path and name must not be empty"));
        }
    }
    for delete in &request.deletes {
        if delete.path.trim().is_empty() {
            return Err(ApiError::bad_request("delete path must not be empty"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_types::IngestFile;
    use crate::types::Language;

    #[test]
    fn test_validate_rejects_empty_paths() {
        let request = IngestRequest {
            files: vec![IngestFile {
                path: "".into(),
                relative_path: "A.h".into(),
                project: "Game".into(),
                language: Language::Cpp,
                content: Some("x".into()),
                mtime: 0,
                types: vec![],
                members: vec![],
            }],
            ..Default::default()
        };
        assert!(validate(&request).is_err());
    }

    #[test]
    fn test_validate_requires_content_for_source() {
        let request = IngestRequest {
            files: vec![IngestFile {
                path: "/src/A.h".into(),
                relative_path: "A.h".into(),
                project: "Game".into(),
                language: Language::Cpp,
                content: None,
                mtime: 0,
                types: vec![],
                members: vec![],
            }],
            ..Default::default()
        };
        assert!(validate(&request).is_err());
    }

    #[test]
    fn test_validate_allows_content_language_without_content() {
        let request = IngestRequest {
            files: vec![IngestFile {
                path: "/Game/Content/BP_Player.uasset".into(),
                relative_path: "Content/BP_Player.uasset".into(),
                project: "Game".into(),
                language: Language::Content,
                content: None,
                mtime: 0,
                types: vec![],
                members: vec![],
            }],
            ..Default::default()
        };
        assert!(validate(&request).is_ok());
    }
}
