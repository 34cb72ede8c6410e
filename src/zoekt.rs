// External full-text engine driver: supervises the zoekt webserver over
// the mirror, throttles reindexing, and translates grep queries to its
// JSON RPC. The engine is optional; when it is down, /grep transparently
// falls back to the internal scanner.

use anyhow::{anyhow, bail, Context, Result};
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::ZoektConfig;
use crate::http_types::GrepMatch;

const HEALTH_PROBE_INTERVAL: Duration = Duration::from_millis(500);
const HEALTH_PROBE_BUDGET: Duration = Duration::from_secs(10);
const RPC_TIMEOUT: Duration = Duration::from_secs(10);
const RESTART_BACKOFF_BASE: Duration = Duration::from_secs(1);
const RESTART_BACKOFF_CAP: Duration = Duration::from_secs(30);
const MAX_RESTART_ATTEMPTS: u32 = 5;
const WEBSERVER_KILL_GRACE: Duration = Duration::from_secs(2);
const INDEXER_KILL_GRACE: Duration = Duration::from_secs(1);

pub struct ZoektDriver {
    config: ZoektConfig,
    index_dir: PathBuf,
    mirror_root: PathBuf,
    webserver_bin: PathBuf,
    indexer_bin: PathBuf,
    client: reqwest::Client,
    base_url: String,
    healthy: AtomicBool,
    auto_restart: AtomicBool,
    indexing: AtomicBool,
    webserver_pid: AtomicI32,
    indexer_pid: AtomicI32,
    reindex_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

#[derive(Debug, Clone, Default)]
pub struct ZoektSearchOpts {
    pub case_sensitive: bool,
    pub max_docs: usize,
    pub context_lines: usize,
    pub total_max_matches: usize,
    /// Language constraint as a file-extension regex, e.g. `\.(h|cpp)$`.
    pub extension_regex: Option<String>,
    /// Project constraint as a mirror-relative path prefix.
    pub path_prefix: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ZoektQuery {
    q: String,
    opts: ZoektQueryOpts,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ZoektQueryOpts {
    max_doc_display_count: usize,
    num_context_lines: usize,
    total_max_match_count: usize,
}

#[derive(Debug, Deserialize)]
struct ZoektResponse {
    #[serde(rename = "Result")]
    result: Option<ZoektResult>,
    #[serde(rename = "Error")]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ZoektResult {
    #[serde(rename = "Files", default)]
    files: Option<Vec<ZoektFile>>,
}

#[derive(Debug, Deserialize)]
struct ZoektFile {
    #[serde(rename = "FileName")]
    file_name: String,
    #[serde(rename = "LineMatches", default)]
    line_matches: Vec<ZoektLineMatch>,
}

#[derive(Debug, Deserialize)]
struct ZoektLineMatch {
    #[serde(rename = "LineNumber")]
    line_number: u32,
    #[serde(rename = "Line", default)]
    line: Option<String>,
    #[serde(rename = "Before", default)]
    before: Option<String>,
    #[serde(rename = "After", default)]
    after: Option<String>,
}

impl ZoektDriver {
    /// Resolve binaries and prepare directories. Fails when the engine is
    /// enabled but its binaries cannot be found.
    pub fn new(config: &ZoektConfig, index_dir: &Path, mirror_root: &Path) -> Result<Self> {
        let webserver_bin = find_binary("zoekt-webserver", config.binary_dir.as_deref())?;
        let indexer_bin = find_binary("zoekt-index", config.binary_dir.as_deref())?;
        std::fs::create_dir_all(index_dir)
            .with_context(|| format!("creating index dir {}", index_dir.display()))?;
        Ok(Self {
            config: config.clone(),
            index_dir: index_dir.to_path_buf(),
            mirror_root: mirror_root.to_path_buf(),
            webserver_bin,
            indexer_bin,
            client: reqwest::Client::new(),
            base_url: format!("http://127.0.0.1:{}", config.web_port),
            healthy: AtomicBool::new(false),
            auto_restart: AtomicBool::new(true),
            indexing: AtomicBool::new(false),
            webserver_pid: AtomicI32::new(0),
            indexer_pid: AtomicI32::new(0),
            reindex_task: Mutex::new(None),
        })
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Start the webserver, wait for health, and install the supervisor
    /// that restarts it with capped exponential backoff.
    pub async fn start(self: Arc<Self>) -> Result<()> {
        let child = self.spawn_webserver()?;
        let driver = Arc::clone(&self);
        tokio::spawn(async move {
            driver.supervise(child).await;
        });
        self.wait_healthy().await
    }

    fn spawn_webserver(&self) -> Result<Child> {
        let child = Command::new(&self.webserver_bin)
            .arg("-listen")
            .arg(format!("127.0.0.1:{}", self.config.web_port))
            .arg("-index")
            .arg(&self.index_dir)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.webserver_bin.display()))?;
        if let Some(pid) = child.id() {
            self.webserver_pid.store(pid as i32, Ordering::Release);
        }
        info!(port = self.config.web_port, "zoekt webserver started");
        Ok(child)
    }

    async fn supervise(self: Arc<Self>, mut child: Child) {
        let mut attempts: u32 = 0;
        loop {
            let status = child.wait().await;
            self.healthy.store(false, Ordering::Release);
            if !self.auto_restart.load(Ordering::Acquire) {
                debug!("zoekt webserver exited during shutdown");
                return;
            }
            attempts += 1;
            if attempts > MAX_RESTART_ATTEMPTS {
                warn!("zoekt webserver gave up after {MAX_RESTART_ATTEMPTS} restarts");
                return;
            }
            let backoff = RESTART_BACKOFF_BASE
                .saturating_mul(2u32.saturating_pow(attempts - 1))
                .min(RESTART_BACKOFF_CAP);
            warn!(
                ?status,
                attempt = attempts,
                backoff_ms = backoff.as_millis() as u64,
                "zoekt webserver exited unexpectedly, restarting"
            );
            tokio::time::sleep(backoff).await;
            match self.spawn_webserver() {
                Ok(next) => {
                    child = next;
                    if self.wait_healthy().await.is_ok() {
                        attempts = 0;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "zoekt webserver restart failed");
                    return;
                }
            }
        }
    }

    /// Probe `/healthz` on a 500 ms cadence until healthy or the budget
    /// runs out.
    async fn wait_healthy(&self) -> Result<()> {
        let deadline = tokio::time::Instant::now() + HEALTH_PROBE_BUDGET;
        loop {
            let probe = self
                .client
                .get(format!("{}/healthz", self.base_url))
                .timeout(HEALTH_PROBE_INTERVAL)
                .send()
                .await;
            if matches!(&probe, Ok(resp) if resp.status().is_success()) {
                self.healthy.store(true, Ordering::Release);
                info!("zoekt webserver healthy");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("zoekt webserver failed its health probe");
            }
            tokio::time::sleep(HEALTH_PROBE_INTERVAL).await;
        }
    }

    /// Run the indexer over the mirror. Only one indexing job may run at a
    /// time; a request while one runs is dropped.
    pub async fn run_index(&self) -> Result<()> {
        if self.indexing.swap(true, Ordering::AcqRel) {
            debug!("indexing already in progress, dropping request");
            return Ok(());
        }
        let result = self.run_index_inner().await;
        self.indexing.store(false, Ordering::Release);
        result
    }

    async fn run_index_inner(&self) -> Result<()> {
        let started = std::time::Instant::now();
        let mut child = Command::new(&self.indexer_bin)
            .arg("-index")
            .arg(&self.index_dir)
            .arg("-parallelism")
            .arg(self.config.parallelism.to_string())
            .arg("-file_limit")
            .arg(self.config.file_limit_bytes.to_string())
            .arg(&self.mirror_root)
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.indexer_bin.display()))?;
        if let Some(pid) = child.id() {
            self.indexer_pid.store(pid as i32, Ordering::Release);
        }
        let status = child.wait().await;
        self.indexer_pid.store(0, Ordering::Release);
        let status = status?;
        if !status.success() {
            bail!("zoekt-index exited with {status}");
        }
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "zoekt reindex complete"
        );
        Ok(())
    }

    /// Coalesce repeated reindex requests into a single delayed job.
    pub async fn trigger_reindex(self: Arc<Self>) {
        let debounce = Duration::from_millis(self.config.reindex_debounce_ms);
        let driver = Arc::clone(&self);
        let mut pending = self.reindex_task.lock().await;
        if let Some(task) = pending.take() {
            task.abort();
        }
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(err) = driver.run_index().await {
                warn!(error = %err, "debounced reindex failed");
            }
        }));
    }

    /// Graceful shutdown: disable auto-restart first, then stop the
    /// webserver (SIGTERM, then SIGKILL after a grace period).
    pub async fn shutdown(&self) {
        self.auto_restart.store(false, Ordering::Release);
        if let Some(task) = self.reindex_task.lock().await.take() {
            task.abort();
        }
        let indexer = self.indexer_pid.load(Ordering::Acquire);
        if indexer > 0 {
            terminate(indexer, INDEXER_KILL_GRACE).await;
        }
        let pid = self.webserver_pid.load(Ordering::Acquire);
        if pid > 0 {
            terminate(pid, WEBSERVER_KILL_GRACE).await;
        }
        self.healthy.store(false, Ordering::Release);
    }

    /// Translate and run one grep query against the engine.
    pub async fn search(&self, pattern: &str, opts: &ZoektSearchOpts) -> Result<Vec<GrepMatch>> {
        let query = build_query(pattern, opts);
        let body = ZoektQuery {
            q: query,
            opts: ZoektQueryOpts {
                max_doc_display_count: opts.max_docs,
                num_context_lines: opts.context_lines,
                total_max_match_count: opts.total_max_matches,
            },
        };
        let response = self
            .client
            .post(format!("{}/api/search", self.base_url))
            .timeout(RPC_TIMEOUT)
            .json(&body)
            .send()
            .await
            .context("zoekt search request")?;
        if !response.status().is_success() {
            bail!("zoekt search returned {}", response.status());
        }
        let parsed: ZoektResponse = response.json().await.context("zoekt search body")?;
        if let Some(err) = parsed.error {
            bail!("zoekt search error: {err}");
        }
        let files = parsed
            .result
            .and_then(|r| r.files)
            .unwrap_or_default();

        let mut matches = Vec::new();
        for file in files {
            for line_match in file.line_matches {
                matches.push(GrepMatch {
                    path: file.file_name.clone(),
                    project: String::new(),
                    language: String::new(),
                    line: line_match.line_number,
                    text: decode_line(line_match.line.as_deref()),
                    before: decode_context(line_match.before.as_deref()),
                    after: decode_context(line_match.after.as_deref()),
                });
            }
        }
        Ok(matches)
    }
}

/// Compile the query string: pattern (regex-wrapped when metacharacters
/// are present), case flag, and file constraints.
fn build_query(pattern: &str, opts: &ZoektSearchOpts) -> String {
    let mut parts = Vec::new();
    if pattern.chars().any(|c| ".+*?()[]{}|^$\\".contains(c)) {
        parts.push(format!("/{pattern}/"));
    } else {
        parts.push(pattern.to_string());
    }
    parts.push(format!(
        "case:{}",
        if opts.case_sensitive { "yes" } else { "no" }
    ));
    if let Some(ext) = &opts.extension_regex {
        parts.push(format!("f:{ext}"));
    }
    if let Some(prefix) = &opts.path_prefix {
        parts.push(format!("f:^{}", regex::escape(prefix)));
    }
    parts.join(" ")
}

/// Zoekt serializes matched bytes as base64.
fn decode_line(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    match base64::engine::general_purpose::STANDARD.decode(raw) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).trim_end_matches('\n').to_string(),
        Err(_) => raw.to_string(),
    }
}

fn decode_context(raw: Option<&str>) -> Vec<String> {
    let decoded = decode_line(raw);
    if decoded.is_empty() {
        Vec::new()
    } else {
        decoded.lines().map(|l| l.to_string()).collect()
    }
}

/// SIGTERM, grace, then SIGKILL.
async fn terminate(pid: i32, grace: Duration) {
    unsafe {
        libc::kill(pid, libc::SIGTERM);
    }
    tokio::time::sleep(grace).await;
    unsafe {
        libc::kill(pid, libc::SIGKILL);
    }
}

/// Locate a binary in the configured directory or on PATH.
fn find_binary(name: &str, binary_dir: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = binary_dir {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
        return Err(anyhow!(
            "{name} not found in configured binary dir {}",
            dir.display()
        ));
    }
    let path = std::env::var_os("PATH").unwrap_or_default();
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Ok(candidate);
        }
    }
    Err(anyhow!("{name} not found on PATH"))
}

/// Extension regex for a language constraint.
pub fn language_extension_regex(language: crate::types::Language) -> Option<String> {
    use crate::types::Language;
    match language {
        Language::Angelscript => Some(r"\.as$".to_string()),
        Language::Cpp => Some(r"\.(h|hpp|hxx|cpp|cc|cxx|inl)$".to_string()),
        Language::Config => Some(r"\.(ini|cfg)$".to_string()),
        Language::Content => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_query_literal() {
        let opts = ZoektSearchOpts {
            case_sensitive: false,
            ..Default::default()
        };
        assert_eq!(build_query("BeginPlay", &opts), "BeginPlay case:no");
    }

    #[test]
    fn test_build_query_regex_wrapped() {
        let opts = ZoektSearchOpts {
            case_sensitive: true,
            extension_regex: Some(r"\.as$".to_string()),
            path_prefix: Some("Game/".to_string()),
            ..Default::default()
        };
        let q = build_query("Destroy.*Actor", &opts);
        assert!(q.starts_with("/Destroy.*Actor/"));
        assert!(q.contains("case:yes"));
        assert!(q.contains(r"f:\.as$"));
        assert!(q.contains("f:^Game/"));
    }

    #[test]
    fn test_decode_line_base64() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("DestroyActor();\n");
        assert_eq!(decode_line(Some(&encoded)), "DestroyActor();");
        // non-base64 passes through
        assert_eq!(decode_line(Some("not/base64/&&&")), "not/base64/&&&");
        assert_eq!(decode_line(None), "");
    }
}
