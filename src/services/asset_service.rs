// Content-browser asset queries. Unlike type lookups, asset lookups are
// fuzzy by default (substring with prefix preference); `fuzzy=false`
// narrows to exact names.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::memory_index::MemoryIndex;

pub const DEFAULT_LIMIT: usize = 25;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetResult {
    pub name: String,
    pub path: String,
    pub project: String,
    pub class: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_class: Option<String>,
    pub folder: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetFolder {
    pub folder: String,
    pub asset_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetStats {
    pub total: usize,
    pub by_class: BTreeMap<String, usize>,
    pub by_project: BTreeMap<String, usize>,
}

pub struct AssetService {
    index: Arc<MemoryIndex>,
}

impl AssetService {
    pub fn new(index: Arc<MemoryIndex>) -> Self {
        Self { index }
    }

    pub fn find(
        &self,
        name: &str,
        fuzzy: bool,
        project: Option<&str>,
        class: Option<&str>,
        limit: usize,
    ) -> Vec<AssetResult> {
        let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
        self.index
            .snapshot()
            .find_assets(name, fuzzy, project, class, limit)
            .into_iter()
            .map(|hit| AssetResult {
                name: hit.entry.name.clone(),
                path: hit.entry.path.clone(),
                project: hit.entry.project.clone(),
                class: hit.entry.class.clone(),
                parent_class: hit.entry.parent_class.clone(),
                folder: hit.entry.folder.clone(),
                score: hit.score,
            })
            .collect()
    }

    pub fn browse(&self, folder: &str, recursive: bool, limit: usize) -> Vec<AssetResult> {
        let limit = if limit == 0 { DEFAULT_LIMIT * 4 } else { limit };
        self.index
            .snapshot()
            .browse_assets(folder, recursive, limit)
            .into_iter()
            .map(|entry| AssetResult {
                name: entry.name.clone(),
                path: entry.path.clone(),
                project: entry.project.clone(),
                class: entry.class.clone(),
                parent_class: entry.parent_class.clone(),
                folder: entry.folder.clone(),
                score: 0.0,
            })
            .collect()
    }

    pub fn list_folders(&self, parent: &str) -> Vec<AssetFolder> {
        self.index
            .snapshot()
            .list_asset_folders(parent)
            .into_iter()
            .map(|(folder, asset_count)| AssetFolder {
                folder,
                asset_count,
            })
            .collect()
    }

    pub fn stats(&self) -> AssetStats {
        let (total, by_class, by_project) = self.index.snapshot().asset_stats();
        AssetStats {
            total,
            by_class,
            by_project,
        }
    }
}
