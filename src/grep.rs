// Full-text grep: trigram-driven candidate selection plus an in-process
// regex scan, with the external engine as the fast path when it is up.
// The scan runs on a dedicated blocking worker, checks an abort flag
// between chunks (client disconnect), and returns partial results with
// `timedOut: true` when it exceeds its budget.

use rayon::prelude::*;
use regex::RegexBuilder;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::http_types::{GrepMatch, GrepResponse};
use crate::memory_index::MemoryIndex;
use crate::store::{self, Store};
use crate::trigram::{pattern_to_trigrams, split_alternation};
use crate::types::Language;
use crate::zoekt::{language_extension_regex, ZoektDriver, ZoektSearchOpts};

/// Files regex-scanned per abort/deadline check.
const SCAN_CHUNK: usize = 32;
/// Per-file match cap, so one generated file cannot drown the response.
const MAX_MATCHES_PER_FILE: usize = 50;

#[derive(Debug, Clone)]
pub struct GrepRequest {
    pub pattern: String,
    pub project: Option<String>,
    pub language: Option<Language>,
    pub case_sensitive: bool,
    pub context_lines: u32,
    pub max_results: usize,
    pub timeout: Duration,
}

pub struct GrepContext {
    pub store: Arc<Store>,
    pub index: Arc<MemoryIndex>,
    pub zoekt: Option<Arc<ZoektDriver>>,
    pub mirror_prefix: String,
}

pub async fn run(
    ctx: GrepContext,
    request: GrepRequest,
    abort: Arc<AtomicBool>,
) -> Result<GrepResponse, ApiError> {
    let started = Instant::now();
    // validate the pattern up front so both paths reject it identically
    let regex = RegexBuilder::new(&request.pattern)
        .case_insensitive(!request.case_sensitive)
        .build()
        .map_err(|err| ApiError::bad_request(format!("invalid regex: {err}")))?;

    if let Some(zoekt) = ctx.zoekt.as_ref().filter(|z| z.is_healthy()) {
        match zoekt_search(&ctx, zoekt, &request).await {
            Ok(mut response) => {
                response.duration_ms = started.elapsed().as_millis() as u64;
                return Ok(response);
            }
            Err(err) => {
                warn!(error = %err, "zoekt search failed, falling back to internal scan");
            }
        }
    }

    let store = ctx.store.clone();
    let response = tokio::task::spawn_blocking(move || {
        internal_scan(&store, &request, regex, &abort)
    })
    .await
    .map_err(|err| ApiError::Internal(format!("grep worker failed: {err}")))??;

    let mut response = response;
    response.duration_ms = started.elapsed().as_millis() as u64;
    Ok(response)
}

async fn zoekt_search(
    ctx: &GrepContext,
    zoekt: &Arc<ZoektDriver>,
    request: &GrepRequest,
) -> anyhow::Result<GrepResponse> {
    let snapshot = ctx.index.snapshot();
    let opts = ZoektSearchOpts {
        case_sensitive: request.case_sensitive,
        max_docs: request.max_results,
        context_lines: request.context_lines as usize,
        total_max_matches: request.max_results.max(1) * 2,
        extension_regex: request.language.and_then(language_extension_regex),
        path_prefix: request.project.as_ref().and_then(|project| {
            project_mirror_prefix(&snapshot, project, &ctx.mirror_prefix)
        }),
    };
    let raw = zoekt.search(&request.pattern, &opts).await?;

    let mut results = Vec::with_capacity(raw.len());
    let mut files = BTreeSet::new();
    for mut hit in raw {
        // engine paths are mirror-relative; rebase and join back to the
        // indexed file for project/language
        let absolute = format!("{}{}", ctx.mirror_prefix, hit.path.trim_start_matches('/'));
        if let Some(file) = snapshot.file_by_path(&absolute) {
            if request
                .project
                .as_deref()
                .map(|p| p != file.project)
                .unwrap_or(false)
            {
                continue;
            }
            if request.language.map(|l| l != file.language).unwrap_or(false) {
                continue;
            }
            hit.project = file.project.clone();
            hit.language = file.language.as_str().to_string();
        }
        hit.path = absolute;
        files.insert(hit.path.clone());
        results.push(hit);
        if results.len() >= request.max_results {
            break;
        }
    }
    Ok(GrepResponse {
        files_searched: files.len(),
        total_files: snapshot.file_count(),
        timed_out: false,
        search_engine: "zoekt".to_string(),
        duration_ms: 0,
        results,
    })
}

/// Mirror-relative prefix shared by a project's files, for the engine's
/// path constraint. Any file of the project serves as the witness.
fn project_mirror_prefix(
    snapshot: &crate::memory_index::Snapshot,
    project: &str,
    mirror_prefix: &str,
) -> Option<String> {
    let witness = snapshot.project_witness_path(project)?;
    let relative = witness.strip_prefix(mirror_prefix)?;
    let first = relative.split('/').next()?;
    if first.is_empty() {
        None
    } else {
        Some(format!("{first}/"))
    }
}

fn internal_scan(
    store: &Store,
    request: &GrepRequest,
    regex: regex::Regex,
    abort: &AtomicBool,
) -> Result<GrepResponse, ApiError> {
    let deadline = Instant::now() + request.timeout;
    let conn = store.open_read_connection().map_err(ApiError::from)?;

    let candidates = select_candidates(&conn, request)?;
    let total_files = count_content_files(&conn)?;

    let mut results: Vec<GrepMatch> = Vec::new();
    let mut files_searched = 0usize;
    let mut timed_out = false;

    for chunk in candidates.chunks(SCAN_CHUNK) {
        if abort.load(Ordering::Acquire) {
            debug!("grep aborted by client");
            break;
        }
        if Instant::now() >= deadline {
            timed_out = true;
            break;
        }
        // fetch sequentially (connection is not Sync), scan in parallel
        let mut fetched = Vec::with_capacity(chunk.len());
        for &file_id in chunk {
            if let Some(file) = store::read::file_by_id(&conn, file_id).map_err(ApiError::from)? {
                if let Some(content) =
                    store::read::file_content(&conn, file_id).map_err(ApiError::from)?
                {
                    fetched.push((file, content));
                }
            }
        }
        let chunk_matches: Vec<Vec<GrepMatch>> = fetched
            .par_iter()
            .map(|(file, content)| scan_file(file, content, &regex, request.context_lines))
            .collect();
        files_searched += fetched.len();
        for file_matches in chunk_matches {
            for m in file_matches {
                if results.len() >= request.max_results {
                    break;
                }
                results.push(m);
            }
        }
        if results.len() >= request.max_results {
            break;
        }
    }

    Ok(GrepResponse {
        results,
        files_searched,
        total_files,
        timed_out,
        search_engine: "internal".to_string(),
        duration_ms: 0,
    })
}

/// Alternation-aware candidate selection. Each top-level branch is reduced
/// to its required trigrams independently and the per-branch candidate
/// sets are unioned; a branch with no required trigrams forces a full
/// scan of stored content.
fn select_candidates(conn: &Connection, request: &GrepRequest) -> Result<Vec<i64>, ApiError> {
    let project = request.project.as_deref();
    let branches = split_alternation(&request.pattern);
    let mut candidates: BTreeSet<i64> = BTreeSet::new();
    for branch in &branches {
        let required = pattern_to_trigrams(branch, true);
        if required.is_empty() {
            // unindexable branch: fall back to everything with content
            return store::read::all_file_ids(conn, project, request.language, true)
                .map_err(ApiError::from);
        }
        let trigrams: Vec<u32> = required.into_iter().collect();
        let ids = store::read::trigram_candidates(conn, &trigrams, project, request.language)
            .map_err(ApiError::from)?;
        candidates.extend(ids);
    }
    Ok(candidates.into_iter().collect())
}

fn count_content_files(conn: &Connection) -> Result<usize, ApiError> {
    conn.query_row("SELECT COUNT(*) FROM file_content", [], |row| {
        row.get::<_, i64>(0)
    })
    .map(|v| v as usize)
    .map_err(|err| ApiError::Internal(err.to_string()))
}

fn scan_file(
    file: &crate::types::FileRecord,
    content: &str,
    regex: &regex::Regex,
    context_lines: u32,
) -> Vec<GrepMatch> {
    let lines: Vec<&str> = content.lines().collect();
    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if !regex.is_match(line) {
            continue;
        }
        let n = context_lines as usize;
        let before = lines[idx.saturating_sub(n)..idx]
            .iter()
            .map(|l| l.to_string())
            .collect();
        let after = lines[(idx + 1).min(lines.len())..(idx + 1 + n).min(lines.len())]
            .iter()
            .map(|l| l.to_string())
            .collect();
        out.push(GrepMatch {
            path: file.path.clone(),
            project: file.project.clone(),
            language: file.language.as_str().to_string(),
            line: (idx + 1) as u32,
            text: line.to_string(),
            before,
            after,
        });
        if out.len() >= MAX_MATCHES_PER_FILE {
            break;
        }
    }
    out
}

/// Sets the abort flag when the request future is dropped (client
/// disconnect); the scan worker polls the flag between chunks.
pub struct AbortOnDrop {
    flag: Arc<AtomicBool>,
    disarmed: bool,
}

impl AbortOnDrop {
    pub fn new() -> (Self, Arc<AtomicBool>) {
        let flag = Arc::new(AtomicBool::new(false));
        (
            Self {
                flag: flag.clone(),
                disarmed: false,
            },
            flag,
        )
    }

    /// Call on normal completion so the flag stays clear.
    pub fn disarm(mut self) {
        self.disarmed = true;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.disarmed {
            self.flag.store(true, Ordering::Release);
        }
    }
}
