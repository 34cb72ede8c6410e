// Mirror maintainer: keeps a directory tree of decompressed source files
// for the external full-text engine. Paths are rebased on the longest
// common prefix of all indexed paths; the mirror is advisory and can be
// rebuilt from the store at any time.

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::store::Store;
use crate::types::clean_path;

const MARKER_FILE: &str = ".marker";

/// Bootstrap record guarding mirror reuse across restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MirrorMarker {
    timestamp: i64,
    file_count: usize,
    path_prefix: String,
}

pub struct MirrorMaintainer {
    root: PathBuf,
    /// Longest common prefix of all indexed paths, recomputed on bootstrap.
    prefix: RwLock<String>,
}

impl MirrorMaintainer {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            prefix: RwLock::new(String::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The indexed-path prefix stripped from mirrored (and batch-result)
    /// paths.
    pub fn path_prefix(&self) -> String {
        self.prefix.read().clone()
    }

    /// Rewrite the mirror from the store in one pass. Blocking; run it on
    /// a blocking task.
    pub fn bootstrap(&self, store: &Store) -> Result<()> {
        let contents = store.all_contents()?;
        let prefix = longest_common_prefix(contents.iter().map(|(p, _)| p.as_str()));
        *self.prefix.write() = prefix.clone();

        if self.root.exists() {
            std::fs::remove_dir_all(&self.root)
                .with_context(|| format!("clearing mirror at {}", self.root.display()))?;
        }
        std::fs::create_dir_all(&self.root)?;

        for (path, content) in &contents {
            self.write_rebased(path, content)?;
        }

        let marker = MirrorMarker {
            timestamp: chrono::Utc::now().timestamp_millis(),
            file_count: contents.len(),
            path_prefix: prefix.clone(),
        };
        std::fs::write(
            self.root.join(MARKER_FILE),
            serde_json::to_vec_pretty(&marker)?,
        )?;
        info!(
            files = contents.len(),
            prefix = %prefix,
            root = %self.root.display(),
            "mirror bootstrapped"
        );
        Ok(())
    }

    /// True when a marker from a previous bootstrap is present and the
    /// store's file count still matches it.
    pub fn is_bootstrapped(&self, expected_files: usize) -> bool {
        let marker_path = self.root.join(MARKER_FILE);
        let Ok(raw) = std::fs::read_to_string(&marker_path) else {
            return false;
        };
        match serde_json::from_str::<MirrorMarker>(&raw) {
            Ok(marker) => {
                *self.prefix.write() = marker.path_prefix.clone();
                marker.file_count == expected_files
            }
            Err(err) => {
                warn!(error = %err, "unreadable mirror marker, re-bootstrapping");
                false
            }
        }
    }

    /// Write one file into the mirror, creating parents.
    pub fn update_file(&self, path: &str, content: &str) -> Result<()> {
        self.write_rebased(path, content)
    }

    pub fn delete_file(&self, path: &str) -> Result<()> {
        let target = self.rebase(path);
        match std::fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", target.display())),
        }
    }

    fn write_rebased(&self, path: &str, content: &str) -> Result<()> {
        let target = self.rebase(path);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        std::fs::write(&target, content)
            .with_context(|| format!("writing {}", target.display()))?;
        debug!(path = %target.display(), "mirror updated");
        Ok(())
    }

    fn rebase(&self, path: &str) -> PathBuf {
        let cleaned = clean_path(path);
        let prefix = self.prefix.read();
        let rest = cleaned
            .strip_prefix(prefix.as_str())
            .unwrap_or(&cleaned)
            .trim_start_matches('/');
        self.root.join(rest)
    }
}

/// Longest common prefix of a set of forward-slashed paths, cut back to a
/// directory boundary.
pub fn longest_common_prefix<'a>(paths: impl Iterator<Item = &'a str>) -> String {
    let mut iter = paths;
    let Some(first) = iter.next() else {
        return String::new();
    };
    let mut prefix = first.to_string();
    for path in iter {
        let common = prefix
            .chars()
            .zip(path.chars())
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(common);
        if prefix.is_empty() {
            return prefix;
        }
    }
    // never swallow a partial file or directory name
    match prefix.rfind('/') {
        Some(idx) => prefix.truncate(idx + 1),
        None => prefix.clear(),
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_longest_common_prefix() {
        let paths = ["/proj/Source/A.h", "/proj/Source/Sub/B.h", "/proj/Source/C.cpp"];
        assert_eq!(
            longest_common_prefix(paths.iter().copied()),
            "/proj/Source/"
        );
    }

    #[test]
    fn test_prefix_stops_at_directory_boundary() {
        let paths = ["/proj/Alpha/A.h", "/proj/Alps/B.h"];
        assert_eq!(longest_common_prefix(paths.iter().copied()), "/proj/");
    }

    #[test]
    fn test_prefix_empty_cases() {
        assert_eq!(longest_common_prefix(std::iter::empty()), "");
        let paths = ["relative.h", "other.h"];
        assert_eq!(longest_common_prefix(paths.iter().copied()), "");
    }

    #[test]
    fn test_single_path_prefix() {
        let paths = ["/proj/Source/A.h"];
        assert_eq!(
            longest_common_prefix(paths.iter().copied()),
            "/proj/Source/"
        );
    }

    #[test]
    fn test_update_and_delete_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mirror = MirrorMaintainer::new(dir.path());
        *mirror.prefix.write() = "/src/".to_string();

        mirror.update_file("/src/Game/Actor.h", "class AActor {};").unwrap();
        let mirrored = dir.path().join("Game/Actor.h");
        assert_eq!(
            std::fs::read_to_string(&mirrored).unwrap(),
            "class AActor {};"
        );

        mirror.delete_file("/src/Game/Actor.h").unwrap();
        assert!(!mirrored.exists());
        // deleting again is fine
        mirror.delete_file("/src/Game/Actor.h").unwrap();
    }
}
