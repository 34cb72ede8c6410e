// HTTP API: request validation and translation only; execution lives in
// the services, the grep engine, and the ingest pipeline. All endpoints
// speak camelCase JSON and share the same query-parameter coercion rules
// ("true"/"false" become booleans, decimal strings become integers,
// absent parameters take documented defaults).

use axum::{
    extract::{Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use once_cell::sync::Lazy;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::analytics::{AnalyticsSink, ToolCallRecord};
use crate::config::Config;
use crate::error::ApiError;
use crate::grep::{self, AbortOnDrop, GrepContext, GrepRequest};
use crate::http_types::IngestRequest;
use crate::ingest::IngestService;
use crate::memory_index::MemoryIndex;
use crate::mirror::MirrorMaintainer;
use crate::observability::process_rss_bytes;
use crate::query_pool::QueryPool;
use crate::services::search_service::{
    ExplainTypeOptions, FindMemberOptions, FindTypeOptions, DEFAULT_EXPLAIN_CHILDREN,
    DEFAULT_EXPLAIN_FUNCTIONS, DEFAULT_EXPLAIN_PROPERTIES,
};
use crate::services::{AssetService, SearchService, StatsService};
use crate::store::{self, Store};
use crate::types::{Language, MemberKind, TypeKind};
use crate::zoekt::ZoektDriver;

const MAX_BATCH_QUERIES: usize = 10;
const DEFAULT_GREP_MAX_RESULTS: usize = 100;

static SERVER_START_TIME: Lazy<Instant> = Lazy::new(Instant::now);

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<Store>,
    pub index: Arc<MemoryIndex>,
    pub pool: Arc<QueryPool>,
    pub mirror: Arc<MirrorMaintainer>,
    pub zoekt: Option<Arc<ZoektDriver>>,
    pub ingest: Arc<IngestService>,
    pub analytics: AnalyticsSink,
    pub search: Arc<SearchService>,
    pub assets: Arc<AssetService>,
    pub stats: Arc<StatsService>,
    pub stop_watcher: Arc<AtomicBool>,
}

type Params = HashMap<String, String>;
type ApiResult = Result<Json<Value>, ApiError>;

/// Create the HTTP server with all routes configured.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/stats", get(stats))
        .route("/summary", get(summary))
        .route("/find-type", get(find_type))
        .route("/find-member", get(find_member))
        .route("/find-children", get(find_children))
        .route("/find-file", get(find_file))
        .route("/browse-module", get(browse_module))
        .route("/list-modules", get(list_modules))
        .route("/find-asset", get(find_asset))
        .route("/browse-assets", get(browse_assets))
        .route("/list-asset-folders", get(list_asset_folders))
        .route("/asset-stats", get(asset_stats))
        .route("/grep", get(grep_handler))
        .route("/explain-type", get(explain_type))
        .route("/batch", post(batch))
        .route("/refresh", post(refresh))
        .route("/internal/ingest", post(internal_ingest))
        .route("/internal/mcp-tool-call", post(mcp_tool_call))
        .route("/internal/mcp-tool-stats", get(mcp_tool_stats))
        .route("/internal/stop-watcher", post(stop_watcher))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

// ---------------------------------------------------------------------------
// Query-parameter coercion
// ---------------------------------------------------------------------------

fn qp_str<'a>(params: &'a Params, key: &str) -> Option<&'a str> {
    params.get(key).map(|s| s.as_str()).filter(|s| !s.is_empty())
}

fn require_str<'a>(params: &'a Params, key: &str) -> Result<&'a str, ApiError> {
    qp_str(params, key)
        .ok_or_else(|| ApiError::bad_request(format!("missing required parameter: {key}")))
}

fn qp_bool(params: &Params, key: &str, default: bool) -> Result<bool, ApiError> {
    match qp_str(params, key) {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ApiError::bad_request(format!(
            "parameter {key} must be \"true\" or \"false\", got {other:?}"
        ))),
    }
}

fn qp_usize(params: &Params, key: &str, default: usize) -> Result<usize, ApiError> {
    match qp_str(params, key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| {
            ApiError::bad_request(format!("parameter {key} must be an integer, got {raw:?}"))
        }),
    }
}

fn qp_u32(params: &Params, key: &str, default: u32) -> Result<u32, ApiError> {
    Ok(qp_usize(params, key, default as usize)? as u32)
}

fn qp_language(params: &Params) -> Result<Option<Language>, ApiError> {
    qp_str(params, "language")
        .map(|raw| Language::parse(raw).map_err(|e| ApiError::bad_request(e.to_string())))
        .transpose()
}

fn qp_project(state: &AppState, params: &Params) -> Result<Option<String>, ApiError> {
    let Some(project) = qp_str(params, "project") else {
        return Ok(None);
    };
    if !state.config.projects.is_empty() && !state.config.has_project(project) {
        return Err(ApiError::bad_request(format!("unknown project: {project}")));
    }
    Ok(Some(project.to_string()))
}

fn qp_type_kind(params: &Params) -> Result<Option<TypeKind>, ApiError> {
    qp_str(params, "kind")
        .map(|raw| TypeKind::parse(raw).map_err(|e| ApiError::bad_request(e.to_string())))
        .transpose()
}

fn qp_member_kind(params: &Params) -> Result<Option<MemberKind>, ApiError> {
    qp_str(params, "memberKind")
        .map(|raw| MemberKind::parse(raw).map_err(|e| ApiError::bad_request(e.to_string())))
        .transpose()
}

/// Wrap memory-index results with the not-yet-loaded hint.
fn with_hints(state: &AppState, mut body: Value) -> Value {
    if !state.index.snapshot().loaded {
        body["hints"] = json!(["index still loading"]);
    }
    body
}

// ---------------------------------------------------------------------------
// Liveness, status, stats
// ---------------------------------------------------------------------------

/// Never touches the store: a stalled ingest or grep must not take
/// /health down with it.
async fn health(State(state): State<AppState>) -> Json<Value> {
    let snapshot = state.index.snapshot();
    Json(json!({
        "status": "ok",
        "uptimeSeconds": SERVER_START_TIME.elapsed().as_secs(),
        "memoryBytes": process_rss_bytes(),
        "memoryIndex": {
            "loaded": snapshot.loaded,
            "files": snapshot.file_count(),
            "types": snapshot.type_count(),
            "members": snapshot.member_count(),
            "assets": snapshot.asset_count(),
        },
    }))
}

async fn status(State(state): State<AppState>) -> ApiResult {
    let statuses = state.stats.statuses().await?;
    let refresh_requested = state
        .pool
        .run(|conn| store::read::meta(conn, "refresh_requested"))
        .await?
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok());
    Ok(Json(json!({
        "statuses": statuses,
        "stopWatcher": state.stop_watcher.load(Ordering::Acquire),
        "refreshRequested": refresh_requested,
    })))
}

async fn stats(State(state): State<AppState>) -> ApiResult {
    let stats = state.stats.stats().await?;
    Ok(Json(serde_json::to_value(stats).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

async fn summary(State(state): State<AppState>) -> ApiResult {
    let summary = state.stats.summary().await?;
    Ok(Json(serde_json::to_value(summary).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

// ---------------------------------------------------------------------------
// Type / member / file / module queries
// ---------------------------------------------------------------------------

async fn find_type(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let body = run_find_type(&state, &params).await?;
    Ok(Json(with_hints(&state, body)))
}

async fn run_find_type(state: &AppState, params: &Params) -> Result<Value, ApiError> {
    let name = require_str(params, "name")?;
    let opts = FindTypeOptions {
        fuzzy: qp_bool(params, "fuzzy", false)?,
        project: qp_project(state, params)?,
        language: qp_language(params)?,
        kind: qp_type_kind(params)?,
        limit: qp_usize(params, "limit", 0)?,
        context_lines: qp_u32(params, "contextLines", 0)?,
    };
    let results = state.search.find_types(name, &opts).await?;
    Ok(json!({ "results": results }))
}

async fn find_member(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let body = run_find_member(&state, &params).await?;
    Ok(Json(with_hints(&state, body)))
}

async fn run_find_member(state: &AppState, params: &Params) -> Result<Value, ApiError> {
    let name = require_str(params, "name")?;
    let opts = FindMemberOptions {
        fuzzy: qp_bool(params, "fuzzy", false)?,
        project: qp_project(state, params)?,
        language: qp_language(params)?,
        containing_type: qp_str(params, "containingType").map(|s| s.to_string()),
        member_kind: qp_member_kind(params)?,
        limit: qp_usize(params, "limit", 0)?,
        include_signatures: qp_bool(params, "includeSignatures", false)?,
        context_lines: qp_u32(params, "contextLines", 0)?,
    };
    let results = state.search.find_members(name, &opts).await?;
    Ok(json!({ "results": results }))
}

async fn find_children(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let body = run_find_children(&state, &params)?;
    Ok(Json(with_hints(&state, body)))
}

fn run_find_children(state: &AppState, params: &Params) -> Result<Value, ApiError> {
    let name = require_str(params, "name")?;
    let recursive = qp_bool(params, "recursive", false)?;
    let results = state.search.find_children(
        name,
        recursive,
        qp_project(state, params)?,
        qp_language(params)?,
        qp_usize(params, "limit", 0)?,
    );
    Ok(json!({ "root": name, "recursive": recursive, "children": results }))
}

async fn find_file(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let body = run_find_file(&state, &params)?;
    Ok(Json(with_hints(&state, body)))
}

fn run_find_file(state: &AppState, params: &Params) -> Result<Value, ApiError> {
    let name = require_str(params, "name")?;
    let results = state.search.find_files(
        name,
        qp_project(state, params)?,
        qp_language(params)?,
        qp_usize(params, "limit", 0)?,
    );
    Ok(json!({ "results": results }))
}

async fn browse_module(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let body = run_browse_module(&state, &params)?;
    Ok(Json(with_hints(&state, body)))
}

fn run_browse_module(state: &AppState, params: &Params) -> Result<Value, ApiError> {
    let module = require_str(params, "module")?;
    let (types, files) = state.search.browse_module(module);
    Ok(json!({ "module": module, "types": types, "files": files }))
}

async fn list_modules(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let body = run_list_modules(&state, &params)?;
    Ok(Json(with_hints(&state, body)))
}

fn run_list_modules(state: &AppState, params: &Params) -> Result<Value, ApiError> {
    let parent = qp_str(params, "parent").unwrap_or("");
    let depth = qp_usize(params, "depth", 1)?;
    let children = state.search.list_modules(parent, depth);
    Ok(json!({ "parent": parent, "children": children }))
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

async fn find_asset(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let body = run_find_asset(&state, &params)?;
    Ok(Json(with_hints(&state, body)))
}

fn run_find_asset(state: &AppState, params: &Params) -> Result<Value, ApiError> {
    let name = require_str(params, "name")?;
    // assets default to fuzzy, unlike types
    let fuzzy = qp_bool(params, "fuzzy", true)?;
    let project = qp_project(state, params)?;
    let results = state.assets.find(
        name,
        fuzzy,
        project.as_deref(),
        qp_str(params, "class"),
        qp_usize(params, "limit", 0)?,
    );
    Ok(json!({ "results": results }))
}

async fn browse_assets(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let folder = require_str(&params, "folder")?;
    let recursive = qp_bool(&params, "recursive", false)?;
    let results = state
        .assets
        .browse(folder, recursive, qp_usize(&params, "limit", 0)?);
    Ok(Json(with_hints(
        &state,
        json!({ "folder": folder, "results": results }),
    )))
}

async fn list_asset_folders(
    State(state): State<AppState>,
    Query(params): Query<Params>,
) -> ApiResult {
    let parent = qp_str(&params, "parent").unwrap_or("/");
    let folders = state.assets.list_folders(parent);
    Ok(Json(with_hints(
        &state,
        json!({ "parent": parent, "folders": folders }),
    )))
}

async fn asset_stats(State(state): State<AppState>) -> ApiResult {
    let stats = state.assets.stats();
    Ok(Json(serde_json::to_value(stats).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

// ---------------------------------------------------------------------------
// Grep and explain-type
// ---------------------------------------------------------------------------

async fn grep_handler(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let pattern = require_str(&params, "pattern")?;
    let request = GrepRequest {
        pattern: pattern.to_string(),
        project: qp_project(&state, &params)?,
        language: qp_language(&params)?,
        case_sensitive: qp_bool(&params, "caseSensitive", false)?,
        context_lines: qp_u32(&params, "contextLines", 0)?,
        max_results: qp_usize(&params, "maxResults", DEFAULT_GREP_MAX_RESULTS)?,
        timeout: Duration::from_millis(state.config.service.grep_timeout_ms),
    };
    let ctx = GrepContext {
        store: state.store.clone(),
        index: state.index.clone(),
        zoekt: state.zoekt.clone(),
        mirror_prefix: state.mirror.path_prefix(),
    };
    // if the client disconnects this future is dropped and the guard
    // aborts the scan worker
    let (guard, abort) = AbortOnDrop::new();
    let response = grep::run(ctx, request, abort).await?;
    guard.disarm();
    Ok(Json(serde_json::to_value(response).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

async fn explain_type(State(state): State<AppState>, Query(params): Query<Params>) -> ApiResult {
    let name = require_str(&params, "name")?;
    let opts = ExplainTypeOptions {
        project: qp_project(&state, &params)?,
        language: qp_language(&params)?,
        max_functions: qp_usize(&params, "maxFunctions", DEFAULT_EXPLAIN_FUNCTIONS)?,
        max_properties: qp_usize(&params, "maxProperties", DEFAULT_EXPLAIN_PROPERTIES)?,
        max_children: qp_usize(&params, "maxChildren", DEFAULT_EXPLAIN_CHILDREN)?,
        recursive: qp_bool(&params, "recursive", false)?,
        context_lines: qp_u32(&params, "contextLines", 0)?,
    };
    let response = state.search.explain_type(name, &opts).await?;
    let body = serde_json::to_value(response).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(with_hints(&state, body)))
}

// ---------------------------------------------------------------------------
// Batch
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BatchBody {
    #[serde(default)]
    queries: Vec<BatchQuery>,
}

#[derive(Debug, Deserialize)]
struct BatchQuery {
    method: String,
    #[serde(default)]
    params: HashMap<String, Value>,
}

/// The closed set of inner query kinds /batch can dispatch.
#[derive(Debug, Clone, Copy)]
enum BatchMethod {
    FindType,
    FindMember,
    FindChildren,
    FindFile,
    BrowseModule,
    ListModules,
    FindAsset,
}

impl BatchMethod {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "find-type" => Some(Self::FindType),
            "find-member" => Some(Self::FindMember),
            "find-children" => Some(Self::FindChildren),
            "find-file" => Some(Self::FindFile),
            "browse-module" => Some(Self::BrowseModule),
            "list-modules" => Some(Self::ListModules),
            "find-asset" => Some(Self::FindAsset),
            _ => None,
        }
    }
}

async fn batch(State(state): State<AppState>, Json(body): Json<BatchBody>) -> ApiResult {
    if body.queries.is_empty() {
        return Err(ApiError::bad_request("batch requires at least one query"));
    }
    if body.queries.len() > MAX_BATCH_QUERIES {
        return Err(ApiError::bad_request(format!(
            "batch is limited to {MAX_BATCH_QUERIES} queries"
        )));
    }
    let prefix = state.mirror.path_prefix();
    let mut results = Vec::with_capacity(body.queries.len());
    // inner queries run in sequence; one failure never affects siblings
    for query in &body.queries {
        let outcome = run_batch_query(&state, query).await;
        results.push(match outcome {
            Ok(mut value) => {
                strip_path_prefix(&mut value, &prefix);
                json!({ "ok": true, "result": value })
            }
            Err(err) => json!({ "ok": false, "error": err.to_string() }),
        });
    }
    Ok(Json(with_hints(&state, json!({ "results": results }))))
}

async fn run_batch_query(state: &AppState, query: &BatchQuery) -> Result<Value, ApiError> {
    let method = BatchMethod::parse(&query.method)
        .ok_or_else(|| ApiError::bad_request(format!("unknown batch method: {}", query.method)))?;
    let params = coerce_batch_params(&query.params);
    match method {
        BatchMethod::FindType => run_find_type(state, &params).await,
        BatchMethod::FindMember => run_find_member(state, &params).await,
        BatchMethod::FindChildren => run_find_children(state, &params),
        BatchMethod::FindFile => run_find_file(state, &params),
        BatchMethod::BrowseModule => run_browse_module(state, &params),
        BatchMethod::ListModules => run_list_modules(state, &params),
        BatchMethod::FindAsset => run_find_asset(state, &params),
    }
}

/// Inner-query params arrive as JSON values; flatten them to the string
/// space the shared coercion helpers expect.
fn coerce_batch_params(raw: &HashMap<String, Value>) -> Params {
    let mut params = Params::new();
    for (key, value) in raw {
        let coerced = match value {
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Null => continue,
            other => other.to_string(),
        };
        params.insert(key.clone(), coerced);
    }
    params
}

/// Batch results carry project-relative paths: the indexed prefix is
/// stripped from every path-bearing field.
fn strip_path_prefix(value: &mut Value, prefix: &str) {
    if prefix.is_empty() {
        return;
    }
    match value {
        Value::Object(map) => {
            for (key, child) in map.iter_mut() {
                if key == "path" || key == "implementationPath" {
                    if let Value::String(s) = child {
                        if let Some(stripped) = s.strip_prefix(prefix) {
                            *s = stripped.to_string();
                        }
                    }
                } else {
                    strip_path_prefix(child, prefix);
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                strip_path_prefix(item, prefix);
            }
        }
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Control endpoints
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RefreshBody {
    language: Option<String>,
}

async fn refresh(
    State(state): State<AppState>,
    body: Option<Json<RefreshBody>>,
) -> ApiResult {
    let language = match body.and_then(|Json(b)| b.language) {
        Some(raw) => Some(
            Language::parse(&raw)
                .map_err(|e| ApiError::bad_request(e.to_string()))?
                .as_str()
                .to_string(),
        ),
        None => None,
    };
    let request = json!({
        "language": language.clone().unwrap_or_else(|| "all".to_string()),
        "requestedAt": chrono::Utc::now().to_rfc3339(),
    });
    let store = state.store.clone();
    tokio::task::spawn_blocking(move || {
        store.set_meta("refresh_requested", &request.to_string())
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))??;
    info!(language = language.as_deref().unwrap_or("all"), "rebuild requested");
    Ok(Json(json!({ "ok": true })))
}

async fn internal_ingest(
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> ApiResult {
    let response = state.ingest.apply(request).await?;
    Ok(Json(serde_json::to_value(response).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

async fn mcp_tool_call(
    State(state): State<AppState>,
    Json(record): Json<ToolCallRecord>,
) -> ApiResult {
    if record.tool.trim().is_empty() {
        return Err(ApiError::bad_request("tool must not be empty"));
    }
    state.analytics.record(record);
    Ok(Json(json!({ "ok": true })))
}

async fn mcp_tool_stats(State(state): State<AppState>) -> ApiResult {
    let rows = state
        .pool
        .run(|conn| store::read::tool_call_stats(conn))
        .await?;
    let tools: Vec<Value> = rows
        .into_iter()
        .map(|(tool, calls, mean_duration_ms, total_result_bytes)| {
            json!({
                "tool": tool,
                "calls": calls,
                "meanDurationMs": mean_duration_ms,
                "totalResultBytes": total_result_bytes,
            })
        })
        .collect();
    Ok(Json(json!({ "tools": tools })))
}

/// Sets a flag the watcher polls on its next heartbeat (via /status).
async fn stop_watcher(State(state): State<AppState>) -> ApiResult {
    state.stop_watcher.store(true, Ordering::Release);
    Ok(Json(json!({ "ok": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qp_bool_coercion() {
        let mut params = Params::new();
        params.insert("fuzzy".into(), "true".into());
        assert!(qp_bool(&params, "fuzzy", false).unwrap());
        params.insert("fuzzy".into(), "false".into());
        assert!(!qp_bool(&params, "fuzzy", true).unwrap());
        assert!(qp_bool(&params, "absent", true).unwrap());
        params.insert("fuzzy".into(), "yes".into());
        assert!(qp_bool(&params, "fuzzy", false).is_err());
    }

    #[test]
    fn test_qp_usize_coercion() {
        let mut params = Params::new();
        params.insert("limit".into(), "25".into());
        assert_eq!(qp_usize(&params, "limit", 10).unwrap(), 25);
        assert_eq!(qp_usize(&params, "absent", 10).unwrap(), 10);
        params.insert("limit".into(), "abc".into());
        assert!(qp_usize(&params, "limit", 10).is_err());
    }

    #[test]
    fn test_batch_method_is_closed() {
        assert!(BatchMethod::parse("find-type").is_some());
        assert!(BatchMethod::parse("find-asset").is_some());
        assert!(BatchMethod::parse("grep").is_none());
        assert!(BatchMethod::parse("drop-tables").is_none());
    }

    #[test]
    fn test_strip_path_prefix() {
        let mut value = json!({
            "results": [
                { "path": "/ws/Game/Actor.h", "implementationPath": "/ws/Game/Actor.cpp" },
                { "path": "/elsewhere/Other.h" }
            ]
        });
        strip_path_prefix(&mut value, "/ws/");
        assert_eq!(value["results"][0]["path"], "Game/Actor.h");
        assert_eq!(value["results"][0]["implementationPath"], "Game/Actor.cpp");
        assert_eq!(value["results"][1]["path"], "/elsewhere/Other.h");
    }

    #[test]
    fn test_coerce_batch_params() {
        let mut raw = HashMap::new();
        raw.insert("name".to_string(), json!("AActor"));
        raw.insert("contextLines".to_string(), json!(5));
        raw.insert("fuzzy".to_string(), json!(true));
        raw.insert("skip".to_string(), Value::Null);
        let params = coerce_batch_params(&raw);
        assert_eq!(params.get("name").unwrap(), "AActor");
        assert_eq!(params.get("contextLines").unwrap(), "5");
        assert_eq!(params.get("fuzzy").unwrap(), "true");
        assert!(!params.contains_key("skip"));
    }
}
