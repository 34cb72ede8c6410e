// MCP tool-call analytics sink: append-only, fed through a bounded queue
// so a slow disk never backpressures the bridge. Records age out after the
// retention window; the aggregation projection is served through the
// query pool.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::store::Store;

const QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub tool: String,
    /// Digest of the arguments; the raw arguments are never stored.
    #[serde(default)]
    pub args_digest: Option<String>,
    /// Raw arguments, digested here when no digest was provided.
    #[serde(default)]
    pub args: Option<serde_json::Value>,
    pub duration_ms: i64,
    #[serde(default)]
    pub result_bytes: i64,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallAggregate {
    pub tool: String,
    pub calls: u64,
    pub mean_duration_ms: f64,
    pub total_result_bytes: u64,
}

#[derive(Clone)]
pub struct AnalyticsSink {
    tx: mpsc::Sender<ToolCallRecord>,
}

impl AnalyticsSink {
    /// Start the writer task. Dropped records are logged, never blocked on.
    pub fn start(store: Arc<Store>) -> Self {
        let (tx, mut rx) = mpsc::channel::<ToolCallRecord>(QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let store = store.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let digest = record.args_digest.clone().unwrap_or_else(|| {
                        let raw = record
                            .args
                            .as_ref()
                            .map(|v| v.to_string())
                            .unwrap_or_default();
                        format!("{:x}", md5::compute(raw.as_bytes()))
                    });
                    store.insert_tool_call(
                        &record.tool,
                        &digest,
                        record.duration_ms,
                        record.result_bytes,
                        record.session_id.as_deref(),
                    )
                })
                .await;
                match result {
                    Ok(Ok(())) => {}
                    Ok(Err(err)) => warn!(error = %err, "tool-call insert failed"),
                    Err(err) => warn!(error = %err, "tool-call writer task failed"),
                }
            }
            debug!("analytics sink drained");
        });
        Self { tx }
    }

    /// Enqueue a record; a full queue drops it (analytics are best-effort).
    pub fn record(&self, record: ToolCallRecord) {
        if let Err(err) = self.tx.try_send(record) {
            warn!(error = %err, "analytics queue full, dropping record");
        }
    }
}
