// Workspace configuration: one JSON blob loaded at startup.
// Every recognized option has a serde default so a minimal config with just
// the data paths is valid.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub service: ServiceConfig,
    pub data: DataConfig,
    pub zoekt: ZoektConfig,
    pub watcher: WatcherConfig,
    pub projects: Vec<ProjectConfig>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    /// Workers in the durable-read query pool.
    pub query_pool_size: usize,
    /// Pending-request budget before the pool returns 503.
    pub query_queue_limit: usize,
    /// Per-request pool timeout in milliseconds.
    pub query_timeout_ms: u64,
    /// Hard budget for a single grep request in milliseconds.
    pub grep_timeout_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3847,
            query_pool_size: 3,
            query_queue_limit: 64,
            query_timeout_ms: 5_000,
            grep_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DataConfig {
    pub db_path: PathBuf,
    pub mirror_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/index.db"),
            mirror_dir: PathBuf::from("data/mirror"),
            index_dir: PathBuf::from("data/zoekt-index"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ZoektConfig {
    pub enabled: bool,
    /// Directory holding `zoekt-webserver` / `zoekt-index`; PATH otherwise.
    pub binary_dir: Option<PathBuf>,
    pub web_port: u16,
    pub parallelism: usize,
    pub reindex_debounce_ms: u64,
    pub file_limit_bytes: u64,
}

impl Default for ZoektConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary_dir: None,
            web_port: 6070,
            parallelism: num_cpus::get().clamp(1, 8),
            reindex_debounce_ms: 5_000,
            file_limit_bytes: 2 * 1024 * 1024,
        }
    }
}

/// Applied by the watcher, carried here so `/summary` can surface it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatcherConfig {
    pub debounce_ms: u64,
    pub reconcile_interval_minutes: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            reconcile_interval_minutes: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    pub name: String,
    pub paths: Vec<PathBuf>,
    pub language: String,
    #[serde(default = "default_true")]
    pub recursive: bool,
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    pub fn project_names(&self) -> Vec<String> {
        self.projects.iter().map(|p| p.name.clone()).collect()
    }

    pub fn has_project(&self, name: &str) -> bool {
        self.projects.iter().any(|p| p.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.service.port, 3847);
        assert_eq!(config.service.host, "0.0.0.0");
        assert_eq!(config.zoekt.web_port, 6070);
        assert_eq!(config.zoekt.reindex_debounce_ms, 5_000);
        assert_eq!(config.service.query_pool_size, 3);
        assert!(config.projects.is_empty());
    }

    #[test]
    fn test_full_config() {
        let config: Config = serde_json::from_str(
            r#"{
                "service": { "host": "127.0.0.1", "port": 4000 },
                "data": { "dbPath": "/tmp/ws/index.db" },
                "zoekt": { "enabled": false, "parallelism": 2 },
                "projects": [
                    { "name": "Game", "paths": ["/src/Game"], "language": "angelscript" }
                ],
                "exclude": ["**/Intermediate/**"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.service.port, 4000);
        assert_eq!(config.data.db_path, PathBuf::from("/tmp/ws/index.db"));
        assert!(!config.zoekt.enabled);
        assert!(config.has_project("Game"));
        assert!(!config.has_project("Engine"));
        assert!(config.projects[0].recursive);
    }
}
