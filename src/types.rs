// Core domain types shared by the store, the memory index, the ingest
// pipeline and the HTTP layer.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Language class of an indexed file.
///
/// The (project, language) pair a file was accepted under is immutable for
/// the file's lifetime; a file moved across projects is a delete + insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Angelscript,
    Cpp,
    Content,
    Config,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Angelscript => "angelscript",
            Language::Cpp => "cpp",
            Language::Content => "content",
            Language::Config => "config",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "angelscript" => Ok(Language::Angelscript),
            "cpp" => Ok(Language::Cpp),
            "content" => Ok(Language::Content),
            "config" => Ok(Language::Config),
            other => bail!("unknown language: {other}"),
        }
    }

    /// Source-bearing languages store compressed content; `content` files
    /// (assets) do not.
    pub fn stores_content(&self) -> bool {
        !matches!(self, Language::Content)
    }

    pub fn all() -> [Language; 4] {
        [
            Language::Angelscript,
            Language::Cpp,
            Language::Content,
            Language::Config,
        ]
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeKind {
    Class,
    Struct,
    Enum,
    Interface,
    Delegate,
    Event,
    Namespace,
}

impl TypeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TypeKind::Class => "class",
            TypeKind::Struct => "struct",
            TypeKind::Enum => "enum",
            TypeKind::Interface => "interface",
            TypeKind::Delegate => "delegate",
            TypeKind::Event => "event",
            TypeKind::Namespace => "namespace",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "class" => Ok(TypeKind::Class),
            "struct" => Ok(TypeKind::Struct),
            "enum" => Ok(TypeKind::Enum),
            "interface" => Ok(TypeKind::Interface),
            "delegate" => Ok(TypeKind::Delegate),
            "event" => Ok(TypeKind::Event),
            "namespace" => Ok(TypeKind::Namespace),
            other => bail!("unknown type kind: {other}"),
        }
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a declared member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Function,
    Property,
    EnumValue,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Function => "function",
            MemberKind::Property => "property",
            MemberKind::EnumValue => "enum_value",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "function" => Ok(MemberKind::Function),
            "property" => Ok(MemberKind::Property),
            "enum_value" => Ok(MemberKind::EnumValue),
            other => bail!("unknown member kind: {other}"),
        }
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An indexed file as stored in the durable store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: i64,
    /// Canonicalised absolute path, forward slashes.
    pub path: String,
    /// Path relative to the per-project root.
    pub relative_path: String,
    pub project: String,
    pub language: Language,
    /// Dotted, project-qualified module path derived from the directory.
    pub module: String,
    /// Modification time, unix millis.
    pub mtime: i64,
    pub content_hash: i64,
}

/// A type declaration owned by a file.
///
/// `parent` is a name, not an id: the parent may be declared in a file not
/// yet ingested, or in a non-indexed library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDeclRecord {
    pub id: i64,
    pub file_id: i64,
    pub name: String,
    pub kind: TypeKind,
    pub parent: Option<String>,
    /// 1-based start line.
    pub line: u32,
    #[serde(default)]
    pub specifiers: Vec<String>,
}

/// A member declaration owned by a file. `owner` may be empty for
/// namespace-scope members and may refer to a non-indexed type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberRecord {
    pub id: i64,
    pub file_id: i64,
    pub owner: String,
    pub name: String,
    pub kind: MemberKind,
    /// 1-based line.
    pub line: u32,
    pub signature: Option<String>,
    #[serde(default)]
    pub specifiers: Vec<String>,
}

/// A content-browser asset. Paths are globally unique; names are not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub id: i64,
    pub project: String,
    /// Content-browser path, e.g. `/Game/Blueprints/BP_Player`.
    pub path: String,
    pub name: String,
    pub class: String,
    pub parent_class: Option<String>,
    /// Folder prefix of `path`.
    pub folder: String,
}

/// Per-language indexing state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Unknown,
    Indexing,
    Ready,
    Error,
}

impl IndexState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexState::Unknown => "unknown",
            IndexState::Indexing => "indexing",
            IndexState::Ready => "ready",
            IndexState::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "unknown" => Ok(IndexState::Unknown),
            "indexing" => Ok(IndexState::Indexing),
            "ready" => Ok(IndexState::Ready),
            "error" => Ok(IndexState::Error),
            other => bail!("unknown index state: {other}"),
        }
    }
}

/// Per-language status record surfaced by `/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStatus {
    pub language: Language,
    pub state: IndexState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Unix millis of the last transition.
    pub updated_at: i64,
}

/// Cached row-count projection served by `/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    pub files: u64,
    pub types: u64,
    pub members: u64,
    pub assets: u64,
    pub by_language: std::collections::BTreeMap<String, u64>,
    pub by_project: std::collections::BTreeMap<String, u64>,
}

/// Normalise a path to forward slashes. All paths leaving the service are
/// passed through this.
pub fn clean_path(path: &str) -> String {
    path.replace('\\', "/")
}

/// Derive the dotted, project-qualified module for a file from its project
/// and relative path: the project name followed by the directory segments.
pub fn derive_module(project: &str, relative_path: &str) -> String {
    let rel = clean_path(relative_path);
    let mut parts = vec![project.to_string()];
    let segments: Vec<&str> = rel.split('/').collect();
    if segments.len() > 1 {
        for seg in &segments[..segments.len() - 1] {
            if !seg.is_empty() {
                parts.push((*seg).to_string());
            }
        }
    }
    parts.join(".")
}

/// True when the path has a header-like suffix.
pub fn is_header_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".h") || lower.ends_with(".hpp") || lower.ends_with(".hxx")
}

/// True when the path is an implementation file.
pub fn is_implementation_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    lower.ends_with(".cpp") || lower.ends_with(".cc") || lower.ends_with(".cxx")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_round_trip() {
        for lang in Language::all() {
            assert_eq!(Language::parse(lang.as_str()).unwrap(), lang);
        }
        assert!(Language::parse("blueprint").is_err());
    }

    #[test]
    fn test_derive_module() {
        assert_eq!(
            derive_module("Game", "Source/Runtime/Core/Array.h"),
            "Game.Source.Runtime.Core"
        );
        assert_eq!(derive_module("Game", "Array.h"), "Game");
        assert_eq!(
            derive_module("Game", "Source\\Core\\Array.h"),
            "Game.Source.Core"
        );
    }

    #[test]
    fn test_header_detection() {
        assert!(is_header_path("/Engine/Actor.h"));
        assert!(is_header_path("/Engine/Actor.HPP"));
        assert!(!is_header_path("/Engine/Actor.cpp"));
        assert!(is_implementation_path("/Engine/Actor.cpp"));
        assert!(!is_implementation_path("/Engine/Actor.h"));
    }
}
