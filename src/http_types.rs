// Shared wire types: the ingest protocol and the grep result shape.
// Kept separate from handlers so the store and the external-engine driver
// can speak the same shapes without depending on the HTTP layer.

use serde::{Deserialize, Serialize};

use crate::types::{IndexState, Language, MemberKind, TypeKind};

/// `POST /internal/ingest` payload. The watcher is the only caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestRequest {
    pub files: Vec<IngestFile>,
    pub assets: Vec<IngestAsset>,
    pub deletes: Vec<IngestDelete>,
    /// Optional per-language progress markers for large reconciliations;
    /// they update index status without touching data.
    pub progress: Vec<IngestProgress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestFile {
    pub path: String,
    pub relative_path: String,
    pub project: String,
    pub language: Language,
    /// Omitted when language is `content`.
    #[serde(default)]
    pub content: Option<String>,
    /// Unix millis.
    pub mtime: i64,
    #[serde(default)]
    pub types: Vec<IngestTypeDecl>,
    #[serde(default)]
    pub members: Vec<IngestMember>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestTypeDecl {
    pub name: String,
    pub kind: TypeKind,
    #[serde(default)]
    pub parent: Option<String>,
    pub line: u32,
    #[serde(default)]
    pub specifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMember {
    #[serde(default)]
    pub owner: String,
    pub name: String,
    pub kind: MemberKind,
    pub line: u32,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub specifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAsset {
    pub project: String,
    pub path: String,
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub parent_class: Option<String>,
}

/// A per-path deletion, or a prefix tombstone when the watcher reconciles
/// a whole project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestDelete {
    pub path: String,
    #[serde(default)]
    pub prefix: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestProgress {
    pub language: Language,
    pub state: IndexState,
    #[serde(default)]
    pub current: Option<u64>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub ok: bool,
    pub files_upserted: usize,
    pub assets_upserted: usize,
    pub deleted: usize,
    pub duration_ms: u64,
}

/// A context window around a declaration: `lines` spans
/// `[line - n, line + n]` clipped to the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContextBlock {
    pub start_line: u32,
    pub lines: Vec<String>,
}

/// One grep hit, shared between the internal scanner and the external
/// engine driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepMatch {
    pub path: String,
    pub project: String,
    pub language: String,
    /// 1-based.
    pub line: u32,
    #[serde(rename = "match")]
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub before: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub after: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrepResponse {
    pub results: Vec<GrepMatch>,
    pub files_searched: usize,
    pub total_files: usize,
    pub timed_out: bool,
    /// "zoekt" or "internal".
    pub search_engine: String,
    pub duration_ms: u64,
}
