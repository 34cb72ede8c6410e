// Type, member, file and module queries over the memory index, with
// optional source-context attachment read back from the durable store.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ApiError;
use crate::http_types::ContextBlock;
use crate::memory_index::{LookupFilter, MemberHit, MemoryIndex, TypeHit};
use crate::query_pool::QueryPool;
use crate::store;
use crate::types::{clean_path, Language, MemberKind, TypeKind};

pub const DEFAULT_LIMIT: usize = 25;
pub const DEFAULT_EXPLAIN_FUNCTIONS: usize = 20;
pub const DEFAULT_EXPLAIN_PROPERTIES: usize = 20;
pub const DEFAULT_EXPLAIN_CHILDREN: usize = 25;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeResult {
    pub name: String,
    pub kind: TypeKind,
    pub project: String,
    pub language: Language,
    pub module: String,
    pub path: String,
    pub line: u32,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub specifiers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberResult {
    pub name: String,
    pub kind: MemberKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub owner: String,
    pub project: String,
    pub language: Language,
    pub path: String,
    pub line: u32,
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub specifiers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implementation_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextBlock>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub path: String,
    pub relative_path: String,
    pub project: String,
    pub language: Language,
    pub module: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleChild {
    pub module: String,
    pub type_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainTypeResponse {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_def: Option<TypeResult>,
    pub functions: Vec<MemberResult>,
    pub function_count: usize,
    pub properties: Vec<MemberResult>,
    pub property_count: usize,
    pub children: Vec<TypeResult>,
    pub child_count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FindTypeOptions {
    pub fuzzy: bool,
    pub project: Option<String>,
    pub language: Option<Language>,
    pub kind: Option<TypeKind>,
    pub limit: usize,
    pub context_lines: u32,
}

#[derive(Debug, Clone, Default)]
pub struct FindMemberOptions {
    pub fuzzy: bool,
    pub project: Option<String>,
    pub language: Option<Language>,
    pub containing_type: Option<String>,
    pub member_kind: Option<MemberKind>,
    pub limit: usize,
    pub include_signatures: bool,
    pub context_lines: u32,
}

#[derive(Debug, Clone, Default)]
pub struct ExplainTypeOptions {
    pub project: Option<String>,
    pub language: Option<Language>,
    pub max_functions: usize,
    pub max_properties: usize,
    pub max_children: usize,
    pub recursive: bool,
    pub context_lines: u32,
}

pub struct SearchService {
    index: Arc<MemoryIndex>,
    pool: Arc<QueryPool>,
}

impl SearchService {
    pub fn new(index: Arc<MemoryIndex>, pool: Arc<QueryPool>) -> Self {
        Self { index, pool }
    }

    pub fn loaded(&self) -> bool {
        self.index.snapshot().loaded
    }

    pub async fn find_types(
        &self,
        name: &str,
        opts: &FindTypeOptions,
    ) -> Result<Vec<TypeResult>, ApiError> {
        let snapshot = self.index.snapshot();
        let filter = LookupFilter {
            project: opts.project.clone(),
            language: opts.language,
        };
        let hits = snapshot.find_types(name, opts.fuzzy, &filter, opts.kind, effective(opts.limit));
        let mut results: Vec<TypeResult> = hits.iter().map(type_result).collect();
        if opts.context_lines > 0 {
            let wanted: Vec<(i64, u32)> = hits
                .iter()
                .map(|h| (h.entry.file_id, h.entry.line))
                .collect();
            let blocks = self.fetch_contexts(&wanted, opts.context_lines).await?;
            for (result, block) in results.iter_mut().zip(blocks) {
                result.context = block;
            }
        }
        Ok(results)
    }

    pub async fn find_members(
        &self,
        name: &str,
        opts: &FindMemberOptions,
    ) -> Result<Vec<MemberResult>, ApiError> {
        let snapshot = self.index.snapshot();
        let filter = LookupFilter {
            project: opts.project.clone(),
            language: opts.language,
        };
        let hits = snapshot.find_members(
            name,
            opts.fuzzy,
            &filter,
            opts.containing_type.as_deref(),
            opts.member_kind,
            effective(opts.limit),
        );
        self.finish_members(hits, opts.include_signatures, opts.context_lines)
            .await
    }

    async fn finish_members(
        &self,
        hits: Vec<MemberHit>,
        include_signatures: bool,
        context_lines: u32,
    ) -> Result<Vec<MemberResult>, ApiError> {
        let mut results: Vec<MemberResult> = hits
            .iter()
            .map(|h| member_result(h, include_signatures))
            .collect();
        if include_signatures {
            // fill signatures the parser did not provide from the stored
            // declaration line
            let missing: Vec<(usize, i64, u32)> = results
                .iter()
                .enumerate()
                .filter(|(_, r)| r.signature.is_none())
                .map(|(i, _)| (i, hits[i].entry.file_id, hits[i].entry.line))
                .collect();
            if !missing.is_empty() {
                let wanted: Vec<(i64, u32)> =
                    missing.iter().map(|&(_, f, l)| (f, l)).collect();
                let lines = self.fetch_declaration_lines(&wanted).await?;
                for ((idx, _, _), line) in missing.into_iter().zip(lines) {
                    results[idx].signature = line;
                }
            }
        }
        if context_lines > 0 {
            let wanted: Vec<(i64, u32)> = hits
                .iter()
                .map(|h| (h.entry.file_id, h.entry.line))
                .collect();
            let blocks = self.fetch_contexts(&wanted, context_lines).await?;
            for (result, block) in results.iter_mut().zip(blocks) {
                result.context = block;
            }
        }
        Ok(results)
    }

    pub fn find_children(
        &self,
        name: &str,
        recursive: bool,
        project: Option<String>,
        language: Option<Language>,
        limit: usize,
    ) -> Vec<TypeResult> {
        let snapshot = self.index.snapshot();
        let filter = LookupFilter { project, language };
        snapshot
            .find_children(name, recursive, &filter, effective(limit))
            .iter()
            .map(type_result)
            .collect()
    }

    pub fn find_files(
        &self,
        name: &str,
        project: Option<String>,
        language: Option<Language>,
        limit: usize,
    ) -> Vec<FileResult> {
        let snapshot = self.index.snapshot();
        let filter = LookupFilter { project, language };
        snapshot
            .find_files(name, &filter, effective(limit))
            .into_iter()
            .map(|file| FileResult {
                path: clean_path(&file.path),
                relative_path: clean_path(&file.relative_path),
                project: file.project.clone(),
                language: file.language,
                module: file.module.clone(),
            })
            .collect()
    }

    pub fn browse_module(&self, module: &str) -> (Vec<TypeResult>, Vec<FileResult>) {
        let snapshot = self.index.snapshot();
        let (types, files) = snapshot.browse_module(module);
        (
            types.iter().map(type_result).collect(),
            files
                .into_iter()
                .map(|file| FileResult {
                    path: clean_path(&file.path),
                    relative_path: clean_path(&file.relative_path),
                    project: file.project.clone(),
                    language: file.language,
                    module: file.module.clone(),
                })
                .collect(),
        )
    }

    pub fn list_modules(&self, parent: &str, depth: usize) -> Vec<ModuleChild> {
        self.index
            .snapshot()
            .list_modules(parent, depth)
            .into_iter()
            .map(|(module, type_count)| ModuleChild { module, type_count })
            .collect()
    }

    /// Compound lookup: definition + members + children, each under its
    /// own budget.
    pub async fn explain_type(
        &self,
        name: &str,
        opts: &ExplainTypeOptions,
    ) -> Result<ExplainTypeResponse, ApiError> {
        let snapshot = self.index.snapshot();
        let filter = LookupFilter {
            project: opts.project.clone(),
            language: opts.language,
        };
        let mut best = snapshot.find_types(name, false, &filter, None, 1);
        if best.is_empty() {
            best = snapshot.find_types(name, true, &filter, None, 1);
        }
        let Some(type_hit) = best.into_iter().next() else {
            return Ok(ExplainTypeResponse {
                type_def: None,
                functions: Vec::new(),
                function_count: 0,
                properties: Vec::new(),
                property_count: 0,
                children: Vec::new(),
                child_count: 0,
            });
        };
        let type_name = type_hit.entry.name.clone();

        let members = snapshot.members_of(&type_name);
        let (all_functions, all_properties): (Vec<&MemberHit>, Vec<&MemberHit>) = members
            .iter()
            .partition(|m| m.entry.kind == MemberKind::Function);
        let function_count = all_functions.len();
        let property_count = all_properties.len();
        let functions: Vec<MemberHit> = all_functions
            .into_iter()
            .take(opts.max_functions)
            .cloned()
            .collect();
        let properties: Vec<MemberHit> = all_properties
            .into_iter()
            .take(opts.max_properties)
            .cloned()
            .collect();

        let children_hits = snapshot.find_children(
            &type_name,
            opts.recursive,
            &filter,
            opts.max_children.saturating_add(1),
        );
        let child_count = children_hits.len();
        let children: Vec<TypeResult> = children_hits
            .iter()
            .take(opts.max_children)
            .map(type_result)
            .collect();

        let mut type_def = type_result(&type_hit);
        let mut function_results: Vec<MemberResult> =
            functions.iter().map(|h| member_result(h, true)).collect();
        let mut property_results: Vec<MemberResult> =
            properties.iter().map(|h| member_result(h, true)).collect();

        if opts.context_lines > 0 {
            // one content fetch per distinct file covers the definition
            // and every budgeted member declaration
            let mut wanted = vec![(type_hit.entry.file_id, type_hit.entry.line)];
            wanted.extend(functions.iter().map(|h| (h.entry.file_id, h.entry.line)));
            wanted.extend(properties.iter().map(|h| (h.entry.file_id, h.entry.line)));
            let blocks = self.fetch_contexts(&wanted, opts.context_lines).await?;
            let mut blocks = blocks.into_iter();
            type_def.context = blocks.next().flatten();
            for result in function_results.iter_mut() {
                result.context = blocks.next().flatten();
            }
            for result in property_results.iter_mut() {
                result.context = blocks.next().flatten();
            }
        }

        Ok(ExplainTypeResponse {
            type_def: Some(type_def),
            functions: function_results,
            function_count,
            properties: property_results,
            property_count,
            children,
            child_count,
        })
    }

    /// Fetch context windows, reading each distinct file once through the
    /// query pool.
    async fn fetch_contexts(
        &self,
        wanted: &[(i64, u32)],
        context_lines: u32,
    ) -> Result<Vec<Option<ContextBlock>>, ApiError> {
        let file_ids: Vec<i64> = {
            let mut ids: Vec<i64> = wanted.iter().map(|&(f, _)| f).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let wanted = wanted.to_vec();
        self.pool
            .run(move |conn| {
                let mut contents: HashMap<i64, Option<String>> = HashMap::new();
                for id in file_ids {
                    contents.insert(id, store::read::file_content(conn, id)?);
                }
                Ok(wanted
                    .iter()
                    .map(|&(file_id, line)| {
                        contents
                            .get(&file_id)
                            .and_then(|c| c.as_deref())
                            .map(|content| store::context_window(content, line, context_lines))
                    })
                    .collect())
            })
            .await
    }

    async fn fetch_declaration_lines(
        &self,
        wanted: &[(i64, u32)],
    ) -> Result<Vec<Option<String>>, ApiError> {
        let wanted = wanted.to_vec();
        self.pool
            .run(move |conn| {
                let mut contents: HashMap<i64, Option<String>> = HashMap::new();
                let mut out = Vec::with_capacity(wanted.len());
                for &(file_id, line) in &wanted {
                    if !contents.contains_key(&file_id) {
                        contents.insert(file_id, store::read::file_content(conn, file_id)?);
                    }
                    out.push(
                        contents
                            .get(&file_id)
                            .and_then(|c| c.as_deref())
                            .and_then(|content| store::declaration_line(content, line)),
                    );
                }
                Ok(out)
            })
            .await
    }
}

fn effective(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_LIMIT
    } else {
        limit
    }
}

fn type_result(hit: &TypeHit) -> TypeResult {
    TypeResult {
        name: hit.entry.name.clone(),
        kind: hit.entry.kind,
        project: hit.file.project.clone(),
        language: hit.file.language,
        module: hit.file.module.clone(),
        path: clean_path(&hit.file.path),
        line: hit.entry.line,
        score: hit.score,
        parent: hit.entry.parent.clone(),
        specifiers: hit.entry.specifiers.clone(),
        implementation_path: hit.implementation_path.as_deref().map(clean_path),
        context: None,
    }
}

fn member_result(hit: &MemberHit, include_signatures: bool) -> MemberResult {
    MemberResult {
        name: hit.entry.name.clone(),
        kind: hit.entry.kind,
        owner: hit.entry.owner.clone(),
        project: hit.file.project.clone(),
        language: hit.file.language,
        path: clean_path(&hit.file.path),
        line: hit.entry.line,
        score: hit.score,
        signature: if include_signatures {
            hit.entry.signature.clone()
        } else {
            None
        },
        specifiers: hit.entry.specifiers.clone(),
        implementation_path: hit.implementation_path.as_deref().map(clean_path),
        context: None,
    }
}
