// In-memory inverted indexes over types, members, files and assets.
//
// The whole index is an immutable `Snapshot` behind an atomic handle:
// readers clone the Arc and never block; the single ingest writer builds a
// new snapshot (copy-on-write per substructure) and swaps it in. The
// snapshot is derived state, reconstructable from the durable store at any
// time, and incremental patches must leave it equivalent to a rebuild.

use parking_lot::RwLock;
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{info, warn};

use crate::scoring;
use crate::store::{IndexedFile, LoadedData};
use crate::trigram::extract_trigrams;
use crate::types::{
    is_header_path, is_implementation_path, AssetRecord, FileRecord, Language, MemberKind,
    MemberRecord, TypeDeclRecord, TypeKind,
};

/// A file as the memory index sees it.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub id: i64,
    pub path: String,
    pub relative_path: String,
    pub project: String,
    pub language: Language,
    pub module: String,
    pub mtime: i64,
}

impl FileEntry {
    fn basename_lower(&self) -> String {
        self.path
            .rsplit('/')
            .next()
            .unwrap_or(&self.path)
            .to_ascii_lowercase()
    }
}

#[derive(Debug, Clone)]
pub struct TypeEntry {
    pub id: u32,
    pub file_id: i64,
    pub name: String,
    pub kind: TypeKind,
    pub parent: Option<String>,
    pub line: u32,
    pub specifiers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub id: u32,
    pub file_id: i64,
    pub owner: String,
    pub name: String,
    pub kind: MemberKind,
    pub line: u32,
    pub signature: Option<String>,
    pub specifiers: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct AssetEntry {
    pub id: u32,
    pub project: String,
    pub path: String,
    pub name: String,
    pub class: String,
    pub parent_class: Option<String>,
    pub folder: String,
}

/// Types and files grouped under one dotted module path. The module "tree"
/// is realized as an ordered map over dotted paths; a range scan over
/// `parent.` is a subtree walk.
#[derive(Debug, Clone, Default)]
pub struct ModuleContent {
    pub types: Vec<u32>,
    pub files: Vec<i64>,
}

/// A scored type lookup result.
#[derive(Debug, Clone)]
pub struct TypeHit {
    pub entry: Arc<TypeEntry>,
    pub file: Arc<FileEntry>,
    pub score: f64,
    pub implementation_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MemberHit {
    pub entry: Arc<MemberEntry>,
    pub file: Arc<FileEntry>,
    pub score: f64,
    pub implementation_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssetHit {
    pub entry: Arc<AssetEntry>,
    pub score: f64,
}

/// Filters shared by the type and member lookups.
#[derive(Debug, Clone, Default)]
pub struct LookupFilter {
    pub project: Option<String>,
    pub language: Option<Language>,
}

impl LookupFilter {
    fn accepts(&self, file: &FileEntry) -> bool {
        self.project
            .as_deref()
            .map(|p| p == file.project)
            .unwrap_or(true)
            && self.language.map(|l| l == file.language).unwrap_or(true)
    }
}

#[derive(Clone, Default)]
pub struct Snapshot {
    pub loaded: bool,

    files: Arc<HashMap<i64, Arc<FileEntry>>>,
    types: Arc<HashMap<u32, Arc<TypeEntry>>>,
    members: Arc<HashMap<u32, Arc<MemberEntry>>>,
    assets: Arc<HashMap<u32, Arc<AssetEntry>>>,

    // type lookups
    by_exact: Arc<HashMap<String, Vec<u32>>>,
    by_lower: Arc<BTreeMap<String, Vec<u32>>>,
    by_trigram: Arc<HashMap<u32, RoaringBitmap>>,
    substring_partitions: Arc<HashMap<[u8; 2], Vec<u32>>>,
    parent_to_children: Arc<HashMap<String, Vec<u32>>>,
    module_map: Arc<BTreeMap<String, ModuleContent>>,

    // member lookups
    member_by_name: Arc<HashMap<String, Vec<u32>>>,
    member_by_lower: Arc<BTreeMap<String, Vec<u32>>>,
    member_by_owner: Arc<HashMap<String, Vec<u32>>>,

    // file lookups, keyed by lowercase basename, plus a full-path map used
    // when external-engine results are joined back to indexed files
    file_by_name: Arc<BTreeMap<String, Vec<i64>>>,
    file_by_path: Arc<BTreeMap<String, i64>>,

    // asset lookups: a prefix-ordered name index and a folder map
    asset_by_name: Arc<BTreeMap<String, Vec<u32>>>,
    asset_by_folder: Arc<BTreeMap<String, Vec<u32>>>,

    // ownership, for patches
    file_owned_types: Arc<HashMap<i64, Vec<u32>>>,
    file_owned_members: Arc<HashMap<i64, Vec<u32>>>,
}

/// The shared handle. Readers call `snapshot()`; ingest calls
/// `ingest_diff`; startup calls `load`.
pub struct MemoryIndex {
    current: RwLock<Arc<Snapshot>>,
}

impl Default for MemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryIndex {
    /// An empty, not-yet-loaded index. Queries against it return empty
    /// results and handlers add a "still loading" hint.
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    /// Full rebuild from the durable store.
    pub fn load(&self, data: &LoadedData) {
        let mut snapshot = Snapshot::default();
        for file in &data.files {
            snapshot.insert_file(file.clone());
        }
        for decl in &data.types {
            snapshot.insert_type(decl.clone());
        }
        for member in &data.members {
            snapshot.insert_member(member.clone());
        }
        for asset in &data.assets {
            snapshot.insert_asset(asset.clone());
        }
        snapshot.loaded = true;
        info!(
            files = data.files.len(),
            types = data.types.len(),
            members = data.members.len(),
            assets = data.assets.len(),
            "memory index loaded"
        );
        *self.current.write() = Arc::new(snapshot);
    }

    /// Patch the index after a committed ingest batch: drop every record
    /// owned by the removed files, then insert the added records. The
    /// result is equivalent to a rebuild from the same store contents.
    pub fn ingest_diff(
        &self,
        removed_file_ids: &[i64],
        added_files: &[IndexedFile],
        removed_asset_ids: &[i64],
        added_assets: &[AssetRecord],
    ) {
        let current = self.snapshot();
        let mut next = (*current).clone();

        for &file_id in removed_file_ids {
            next.remove_file(file_id);
        }
        for &asset_id in removed_asset_ids {
            next.remove_asset(asset_id);
        }
        for indexed in added_files {
            next.insert_file(indexed.file.clone());
            for decl in &indexed.types {
                next.insert_type(decl.clone());
            }
            for member in &indexed.members {
                next.insert_member(member.clone());
            }
        }
        for asset in added_assets {
            next.insert_asset(asset.clone());
        }
        *self.current.write() = Arc::new(next);
    }
}

fn insert_sorted<T: Ord + Copy>(vec: &mut Vec<T>, value: T) {
    if let Err(pos) = vec.binary_search(&value) {
        vec.insert(pos, value);
    }
}

fn remove_sorted<T: Ord + Copy>(vec: &mut Vec<T>, value: T) {
    if let Ok(pos) = vec.binary_search(&value) {
        vec.remove(pos);
    }
}

/// Distinct 2-byte lowercase shingles of a name.
fn shingles(name_lower: &str) -> HashSet<[u8; 2]> {
    name_lower
        .as_bytes()
        .windows(2)
        .map(|w| [w[0], w[1]])
        .collect()
}

impl Snapshot {
    // -- mutation (writer side only) ------------------------------------

    fn insert_file(&mut self, file: FileRecord) {
        let entry = Arc::new(FileEntry {
            id: file.id,
            path: file.path,
            relative_path: file.relative_path,
            project: file.project,
            language: file.language,
            module: file.module,
            mtime: file.mtime,
        });
        insert_sorted(
            Arc::make_mut(&mut self.file_by_name)
                .entry(entry.basename_lower())
                .or_default(),
            entry.id,
        );
        Arc::make_mut(&mut self.file_by_path).insert(entry.path.clone(), entry.id);
        let module = Arc::make_mut(&mut self.module_map)
            .entry(entry.module.clone())
            .or_default();
        insert_sorted(&mut module.files, entry.id);
        Arc::make_mut(&mut self.files).insert(entry.id, entry);
    }

    fn insert_type(&mut self, decl: TypeDeclRecord) {
        let id = match u32::try_from(decl.id) {
            Ok(id) => id,
            Err(_) => {
                warn!(id = decl.id, "type id out of range, skipping");
                return;
            }
        };
        let module = self
            .files
            .get(&decl.file_id)
            .map(|f| f.module.clone())
            .unwrap_or_default();
        let entry = Arc::new(TypeEntry {
            id,
            file_id: decl.file_id,
            name: decl.name,
            kind: decl.kind,
            parent: decl.parent,
            line: decl.line,
            specifiers: decl.specifiers,
        });
        let lower = entry.name.to_ascii_lowercase();

        insert_sorted(
            Arc::make_mut(&mut self.by_exact)
                .entry(entry.name.clone())
                .or_default(),
            id,
        );
        insert_sorted(
            Arc::make_mut(&mut self.by_lower)
                .entry(lower.clone())
                .or_default(),
            id,
        );
        let trigrams = Arc::make_mut(&mut self.by_trigram);
        for t in extract_trigrams(&entry.name) {
            trigrams.entry(t).or_default().insert(id);
        }
        let partitions = Arc::make_mut(&mut self.substring_partitions);
        for shingle in shingles(&lower) {
            insert_sorted(partitions.entry(shingle).or_default(), id);
        }
        if let Some(parent) = &entry.parent {
            insert_sorted(
                Arc::make_mut(&mut self.parent_to_children)
                    .entry(parent.clone())
                    .or_default(),
                id,
            );
        }
        if !module.is_empty() {
            insert_sorted(
                &mut Arc::make_mut(&mut self.module_map)
                    .entry(module)
                    .or_default()
                    .types,
                id,
            );
        }
        insert_sorted(
            Arc::make_mut(&mut self.file_owned_types)
                .entry(entry.file_id)
                .or_default(),
            id,
        );
        Arc::make_mut(&mut self.types).insert(id, entry);
    }

    fn insert_member(&mut self, member: MemberRecord) {
        let id = match u32::try_from(member.id) {
            Ok(id) => id,
            Err(_) => {
                warn!(id = member.id, "member id out of range, skipping");
                return;
            }
        };
        let entry = Arc::new(MemberEntry {
            id,
            file_id: member.file_id,
            owner: member.owner,
            name: member.name,
            kind: member.kind,
            line: member.line,
            signature: member.signature,
            specifiers: member.specifiers,
        });
        let lower = entry.name.to_ascii_lowercase();
        insert_sorted(
            Arc::make_mut(&mut self.member_by_name)
                .entry(entry.name.clone())
                .or_default(),
            id,
        );
        insert_sorted(
            Arc::make_mut(&mut self.member_by_lower)
                .entry(lower)
                .or_default(),
            id,
        );
        if !entry.owner.is_empty() {
            insert_sorted(
                Arc::make_mut(&mut self.member_by_owner)
                    .entry(entry.owner.clone())
                    .or_default(),
                id,
            );
        }
        insert_sorted(
            Arc::make_mut(&mut self.file_owned_members)
                .entry(entry.file_id)
                .or_default(),
            id,
        );
        Arc::make_mut(&mut self.members).insert(id, entry);
    }

    fn insert_asset(&mut self, asset: AssetRecord) {
        let id = match u32::try_from(asset.id) {
            Ok(id) => id,
            Err(_) => {
                warn!(id = asset.id, "asset id out of range, skipping");
                return;
            }
        };
        let entry = Arc::new(AssetEntry {
            id,
            project: asset.project,
            path: asset.path,
            name: asset.name,
            class: asset.class,
            parent_class: asset.parent_class,
            folder: asset.folder,
        });
        insert_sorted(
            Arc::make_mut(&mut self.asset_by_name)
                .entry(entry.name.to_ascii_lowercase())
                .or_default(),
            id,
        );
        insert_sorted(
            Arc::make_mut(&mut self.asset_by_folder)
                .entry(entry.folder.clone())
                .or_default(),
            id,
        );
        Arc::make_mut(&mut self.assets).insert(id, entry);
    }

    fn remove_file(&mut self, file_id: i64) {
        let type_ids = self
            .file_owned_types
            .get(&file_id)
            .cloned()
            .unwrap_or_default();
        for id in type_ids {
            self.remove_type(id);
        }
        let member_ids = self
            .file_owned_members
            .get(&file_id)
            .cloned()
            .unwrap_or_default();
        for id in member_ids {
            self.remove_member(id);
        }
        Arc::make_mut(&mut self.file_owned_types).remove(&file_id);
        Arc::make_mut(&mut self.file_owned_members).remove(&file_id);

        let Some(entry) = Arc::make_mut(&mut self.files).remove(&file_id) else {
            return;
        };
        let by_name = Arc::make_mut(&mut self.file_by_name);
        if let Some(ids) = by_name.get_mut(&entry.basename_lower()) {
            remove_sorted(ids, file_id);
            if ids.is_empty() {
                by_name.remove(&entry.basename_lower());
            }
        }
        Arc::make_mut(&mut self.file_by_path).remove(&entry.path);
        let modules = Arc::make_mut(&mut self.module_map);
        if let Some(content) = modules.get_mut(&entry.module) {
            remove_sorted(&mut content.files, file_id);
            if content.files.is_empty() && content.types.is_empty() {
                modules.remove(&entry.module);
            }
        }
    }

    fn remove_type(&mut self, id: u32) {
        let Some(entry) = Arc::make_mut(&mut self.types).remove(&id) else {
            return;
        };
        let lower = entry.name.to_ascii_lowercase();
        let by_exact = Arc::make_mut(&mut self.by_exact);
        if let Some(ids) = by_exact.get_mut(&entry.name) {
            remove_sorted(ids, id);
            if ids.is_empty() {
                by_exact.remove(&entry.name);
            }
        }
        let by_lower = Arc::make_mut(&mut self.by_lower);
        if let Some(ids) = by_lower.get_mut(&lower) {
            remove_sorted(ids, id);
            if ids.is_empty() {
                by_lower.remove(&lower);
            }
        }
        let trigrams = Arc::make_mut(&mut self.by_trigram);
        for t in extract_trigrams(&entry.name) {
            if let Some(bitmap) = trigrams.get_mut(&t) {
                bitmap.remove(id);
                if bitmap.is_empty() {
                    trigrams.remove(&t);
                }
            }
        }
        let partitions = Arc::make_mut(&mut self.substring_partitions);
        for shingle in shingles(&lower) {
            if let Some(ids) = partitions.get_mut(&shingle) {
                remove_sorted(ids, id);
                if ids.is_empty() {
                    partitions.remove(&shingle);
                }
            }
        }
        if let Some(parent) = &entry.parent {
            let children = Arc::make_mut(&mut self.parent_to_children);
            if let Some(ids) = children.get_mut(parent) {
                remove_sorted(ids, id);
                if ids.is_empty() {
                    children.remove(parent);
                }
            }
        }
        if let Some(file) = self.files.get(&entry.file_id) {
            let modules = Arc::make_mut(&mut self.module_map);
            if let Some(content) = modules.get_mut(&file.module) {
                remove_sorted(&mut content.types, id);
            }
        }
    }

    fn remove_member(&mut self, id: u32) {
        let Some(entry) = Arc::make_mut(&mut self.members).remove(&id) else {
            return;
        };
        let lower = entry.name.to_ascii_lowercase();
        let by_name = Arc::make_mut(&mut self.member_by_name);
        if let Some(ids) = by_name.get_mut(&entry.name) {
            remove_sorted(ids, id);
            if ids.is_empty() {
                by_name.remove(&entry.name);
            }
        }
        let by_lower = Arc::make_mut(&mut self.member_by_lower);
        if let Some(ids) = by_lower.get_mut(&lower) {
            remove_sorted(ids, id);
            if ids.is_empty() {
                by_lower.remove(&lower);
            }
        }
        if !entry.owner.is_empty() {
            let by_owner = Arc::make_mut(&mut self.member_by_owner);
            if let Some(ids) = by_owner.get_mut(&entry.owner) {
                remove_sorted(ids, id);
                if ids.is_empty() {
                    by_owner.remove(&entry.owner);
                }
            }
        }
    }

    fn remove_asset(&mut self, asset_id: i64) {
        let Ok(id) = u32::try_from(asset_id) else {
            return;
        };
        let Some(entry) = Arc::make_mut(&mut self.assets).remove(&id) else {
            return;
        };
        let by_name = Arc::make_mut(&mut self.asset_by_name);
        let name_lower = entry.name.to_ascii_lowercase();
        if let Some(ids) = by_name.get_mut(&name_lower) {
            remove_sorted(ids, id);
            if ids.is_empty() {
                by_name.remove(&name_lower);
            }
        }
        let by_folder = Arc::make_mut(&mut self.asset_by_folder);
        if let Some(ids) = by_folder.get_mut(&entry.folder) {
            remove_sorted(ids, id);
            if ids.is_empty() {
                by_folder.remove(&entry.folder);
            }
        }
    }

    // -- queries (reader side) ------------------------------------------

    pub fn file(&self, id: i64) -> Option<Arc<FileEntry>> {
        self.files.get(&id).cloned()
    }

    pub fn file_by_path(&self, path: &str) -> Option<Arc<FileEntry>> {
        self.file_by_path
            .get(path)
            .and_then(|id| self.files.get(id))
            .cloned()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Any indexed path belonging to `project`, used to derive its
    /// mirror-relative prefix.
    pub fn project_witness_path(&self, project: &str) -> Option<String> {
        self.files
            .values()
            .find(|f| f.project == project)
            .map(|f| f.path.clone())
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn asset_count(&self) -> usize {
        self.assets.len()
    }

    /// Name lookup over types. Exact mode consults the exact map with a
    /// case-insensitive fallback; fuzzy mode assembles candidates from
    /// prefix + trigram overlap + substring partitions and scores them.
    pub fn find_types(
        &self,
        name: &str,
        fuzzy: bool,
        filter: &LookupFilter,
        kind: Option<TypeKind>,
        limit: usize,
    ) -> Vec<TypeHit> {
        let query_lower = name.to_ascii_lowercase();
        let candidate_ids: Vec<u32> = if fuzzy {
            self.fuzzy_type_candidates(&query_lower)
        } else {
            let mut ids = self.by_exact.get(name).cloned().unwrap_or_default();
            if ids.is_empty() {
                ids = self.by_lower.get(&query_lower).cloned().unwrap_or_default();
            }
            ids
        };

        let mut hits = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let Some(entry) = self.types.get(&id) else {
                continue;
            };
            if let Some(want) = kind {
                if entry.kind != want {
                    continue;
                }
            }
            let Some(file) = self.files.get(&entry.file_id) else {
                continue;
            };
            if !filter.accepts(file) {
                continue;
            }
            let Some(base) = scoring::name_score(&query_lower, &entry.name) else {
                continue;
            };
            let score = base
                + scoring::kind_weight(entry.kind)
                + scoring::specifier_boost(&entry.specifiers)
                + scoring::path_signal(&file.path);
            hits.push(TypeHit {
                entry: entry.clone(),
                file: file.clone(),
                score,
                implementation_path: None,
            });
        }
        dedup_type_hits(&mut hits);
        sort_type_hits(&mut hits);
        hits.truncate(limit);
        hits
    }

    fn fuzzy_type_candidates(&self, query_lower: &str) -> Vec<u32> {
        let mut candidates = RoaringBitmap::new();
        // prefix matches
        for (key, ids) in self.by_lower.range(query_lower.to_string()..) {
            if !key.starts_with(query_lower) {
                break;
            }
            for &id in ids {
                candidates.insert(id);
            }
        }
        // trigram overlap above the length-dependent threshold
        let qgrams = extract_trigrams(query_lower);
        if !qgrams.is_empty() {
            let need = (scoring::trigram_threshold(query_lower.len()) * qgrams.len() as f64)
                .ceil() as u32;
            let mut counts: HashMap<u32, u32> = HashMap::new();
            for t in &qgrams {
                if let Some(bitmap) = self.by_trigram.get(t) {
                    for id in bitmap {
                        *counts.entry(id).or_insert(0) += 1;
                    }
                }
            }
            for (id, count) in counts {
                if count >= need {
                    candidates.insert(id);
                }
            }
        } else if query_lower.len() == 2 {
            // too short for trigrams: drive the substring query from the
            // 2-char partition
            let key = [query_lower.as_bytes()[0], query_lower.as_bytes()[1]];
            if let Some(ids) = self.substring_partitions.get(&key) {
                for &id in ids {
                    candidates.insert(id);
                }
            }
        }
        candidates.iter().collect()
    }

    /// Name lookup over members; owner and kind filters are exact.
    pub fn find_members(
        &self,
        name: &str,
        fuzzy: bool,
        filter: &LookupFilter,
        owner: Option<&str>,
        kind: Option<MemberKind>,
        limit: usize,
    ) -> Vec<MemberHit> {
        let query_lower = name.to_ascii_lowercase();
        let candidate_ids: Vec<u32> = if let Some(owner) = owner {
            self.member_by_owner.get(owner).cloned().unwrap_or_default()
        } else if fuzzy {
            let mut ids: Vec<u32> = Vec::new();
            for (key, bucket) in self.member_by_lower.range(query_lower.clone()..) {
                if !key.starts_with(&query_lower) {
                    break;
                }
                ids.extend(bucket);
            }
            // substring candidates from the full lower map are too broad;
            // rely on prefix + containment check over the prefix set plus
            // exact-lower bucket
            if let Some(bucket) = self.member_by_lower.get(&query_lower) {
                ids.extend(bucket);
            }
            ids.sort_unstable();
            ids.dedup();
            ids
        } else {
            let mut ids = self.member_by_name.get(name).cloned().unwrap_or_default();
            if ids.is_empty() {
                ids = self
                    .member_by_lower
                    .get(&query_lower)
                    .cloned()
                    .unwrap_or_default();
            }
            ids
        };

        let mut hits = Vec::with_capacity(candidate_ids.len());
        for id in candidate_ids {
            let Some(entry) = self.members.get(&id) else {
                continue;
            };
            if let Some(want) = kind {
                if entry.kind != want {
                    continue;
                }
            }
            if owner.is_some() {
                // owner-scoped lookups still honor the name when given
                if !name.is_empty()
                    && !entry.name.to_ascii_lowercase().contains(&query_lower)
                {
                    continue;
                }
            }
            let Some(file) = self.files.get(&entry.file_id) else {
                continue;
            };
            if !filter.accepts(file) {
                continue;
            }
            let base = if name.is_empty() {
                0.5
            } else {
                match scoring::name_score(&query_lower, &entry.name) {
                    Some(score) => score,
                    None => continue,
                }
            };
            let score =
                base + scoring::specifier_boost(&entry.specifiers) + scoring::path_signal(&file.path);
            hits.push(MemberHit {
                entry: entry.clone(),
                file: file.clone(),
                score,
                implementation_path: None,
            });
        }
        dedup_member_hits(&mut hits);
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.name.cmp(&b.entry.name))
                .then_with(|| a.file.path.cmp(&b.file.path))
        });
        hits.truncate(limit);
        hits
    }

    /// All members owned by `type_name`, ordered by declaration line.
    pub fn members_of(&self, type_name: &str) -> Vec<MemberHit> {
        let ids = self
            .member_by_owner
            .get(type_name)
            .cloned()
            .unwrap_or_default();
        let mut hits = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entry) = self.members.get(&id) else {
                continue;
            };
            let Some(file) = self.files.get(&entry.file_id) else {
                continue;
            };
            hits.push(MemberHit {
                entry: entry.clone(),
                file: file.clone(),
                score: 0.0,
                implementation_path: None,
            });
        }
        dedup_member_hits(&mut hits);
        hits.sort_by(|a, b| {
            a.file
                .path
                .cmp(&b.file.path)
                .then(a.entry.line.cmp(&b.entry.line))
        });
        hits
    }

    /// BFS over the parent→children graph. The graph is keyed by name and
    /// may contain cycles in degenerate data, so expansion tracks visited
    /// names.
    pub fn find_children(
        &self,
        root: &str,
        recursive: bool,
        filter: &LookupFilter,
        limit: usize,
    ) -> Vec<TypeHit> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(root.to_string());
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(root.to_string());
        let mut out: Vec<TypeHit> = Vec::new();

        while let Some(parent) = queue.pop_front() {
            let Some(child_ids) = self.parent_to_children.get(&parent) else {
                continue;
            };
            let mut level: Vec<TypeHit> = Vec::new();
            for &id in child_ids {
                let Some(entry) = self.types.get(&id) else {
                    continue;
                };
                let Some(file) = self.files.get(&entry.file_id) else {
                    continue;
                };
                if !filter.accepts(file) {
                    continue;
                }
                level.push(TypeHit {
                    entry: entry.clone(),
                    file: file.clone(),
                    score: scoring::path_signal(&file.path),
                    implementation_path: None,
                });
            }
            dedup_type_hits(&mut level);
            level.sort_by(|a, b| a.entry.name.cmp(&b.entry.name));
            for hit in level {
                let name = hit.entry.name.clone();
                if visited.insert(name.clone()) {
                    out.push(hit);
                    if recursive {
                        queue.push_back(name);
                    }
                }
                if out.len() >= limit {
                    return out;
                }
            }
        }
        out
    }

    /// File-name lookup: exact basename, then basename-prefix fallback.
    pub fn find_files(
        &self,
        name: &str,
        filter: &LookupFilter,
        limit: usize,
    ) -> Vec<Arc<FileEntry>> {
        let query = name.to_ascii_lowercase();
        let mut out: Vec<Arc<FileEntry>> = Vec::new();
        let push = |ids: &Vec<i64>, out: &mut Vec<Arc<FileEntry>>| {
            for id in ids {
                if let Some(file) = self.files.get(id) {
                    if filter.accepts(file) && !out.iter().any(|f| f.id == file.id) {
                        out.push(file.clone());
                    }
                }
            }
        };
        if let Some(ids) = self.file_by_name.get(&query) {
            push(ids, &mut out);
        }
        for (key, ids) in self.file_by_name.range(query.clone()..) {
            if !key.starts_with(&query) {
                break;
            }
            push(ids, &mut out);
            if out.len() >= limit {
                break;
            }
        }
        out.sort_by(|a, b| {
            let a_exact = a.basename_lower() == query;
            let b_exact = b.basename_lower() == query;
            b_exact
                .cmp(&a_exact)
                .then_with(|| a.path.len().cmp(&b.path.len()))
                .then_with(|| a.path.cmp(&b.path))
        });
        out.truncate(limit);
        out
    }

    /// Types and files whose module equals `module` or begins with
    /// `module.`.
    pub fn browse_module(&self, module: &str) -> (Vec<TypeHit>, Vec<Arc<FileEntry>>) {
        let mut types = Vec::new();
        let mut files = Vec::new();
        let child_prefix = format!("{module}.");
        for (key, content) in self.module_map.range(module.to_string()..) {
            if key != module && !key.starts_with(&child_prefix) {
                break;
            }
            for &id in &content.types {
                let Some(entry) = self.types.get(&id) else {
                    continue;
                };
                let Some(file) = self.files.get(&entry.file_id) else {
                    continue;
                };
                types.push(TypeHit {
                    entry: entry.clone(),
                    file: file.clone(),
                    score: scoring::path_signal(&file.path),
                    implementation_path: None,
                });
            }
            for &fid in &content.files {
                if let Some(file) = self.files.get(&fid) {
                    files.push(file.clone());
                }
            }
        }
        dedup_type_hits(&mut types);
        sort_type_hits(&mut types);
        files.sort_by(|a, b| a.path.cmp(&b.path));
        files.dedup_by(|a, b| a.id == b.id);
        (types, files)
    }

    /// Direct children of a module path in the module tree, to `depth`
    /// levels. An empty parent lists the roots (projects).
    pub fn list_modules(&self, parent: &str, depth: usize) -> Vec<(String, usize)> {
        let prefix = if parent.is_empty() {
            String::new()
        } else {
            format!("{parent}.")
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (key, content) in self.module_map.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            if rest.is_empty() {
                continue;
            }
            let take = rest
                .split('.')
                .take(depth.max(1))
                .collect::<Vec<_>>()
                .join(".");
            *counts.entry(take).or_insert(0) += content.types.len();
        }
        counts.into_iter().collect()
    }

    /// Asset name lookup. Fuzzy (the default for assets) is substring
    /// match with prefix preference; exact matches the whole name.
    pub fn find_assets(
        &self,
        name: &str,
        fuzzy: bool,
        project: Option<&str>,
        class: Option<&str>,
        limit: usize,
    ) -> Vec<AssetHit> {
        let query = name.to_ascii_lowercase();
        let mut hits: Vec<AssetHit> = Vec::new();
        let mut seen: HashSet<u32> = HashSet::new();

        let consider = |ids: &Vec<u32>,
                        score: f64,
                        hits: &mut Vec<AssetHit>,
                        seen: &mut HashSet<u32>| {
            for &id in ids {
                if !seen.insert(id) {
                    continue;
                }
                let Some(entry) = self.assets.get(&id) else {
                    continue;
                };
                if project.map(|p| p == entry.project).unwrap_or(true)
                    && class.map(|c| c == entry.class).unwrap_or(true)
                {
                    hits.push(AssetHit {
                        entry: entry.clone(),
                        score,
                    });
                }
            }
        };

        if let Some(ids) = self.asset_by_name.get(&query) {
            consider(ids, 1.0, &mut hits, &mut seen);
        }
        if fuzzy {
            for (key, ids) in self.asset_by_name.range(query.clone()..) {
                if !key.starts_with(&query) {
                    break;
                }
                consider(ids, 0.9, &mut hits, &mut seen);
                if hits.len() >= limit * 4 {
                    break;
                }
            }
            if hits.len() < limit {
                for (key, ids) in self.asset_by_name.iter() {
                    if key.contains(&query) && !key.starts_with(&query) {
                        consider(ids, 0.7, &mut hits, &mut seen);
                        if hits.len() >= limit * 4 {
                            break;
                        }
                    }
                }
            }
        }
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.name.cmp(&b.entry.name))
                .then_with(|| a.entry.path.cmp(&b.entry.path))
        });
        hits.truncate(limit);
        hits
    }

    /// Assets under a content-browser folder.
    pub fn browse_assets(&self, folder: &str, recursive: bool, limit: usize) -> Vec<Arc<AssetEntry>> {
        let mut out = Vec::new();
        if recursive {
            let prefix = if folder.ends_with('/') {
                folder.to_string()
            } else {
                format!("{folder}/")
            };
            for (key, ids) in self.asset_by_folder.range(folder.to_string()..) {
                if key != folder && !key.starts_with(&prefix) {
                    break;
                }
                for id in ids {
                    if let Some(entry) = self.assets.get(id) {
                        out.push(entry.clone());
                    }
                }
                if out.len() >= limit {
                    break;
                }
            }
        } else if let Some(ids) = self.asset_by_folder.get(folder) {
            for id in ids {
                if let Some(entry) = self.assets.get(id) {
                    out.push(entry.clone());
                }
            }
        }
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out.truncate(limit);
        out
    }

    /// Immediate child folders of a content-browser folder.
    pub fn list_asset_folders(&self, parent: &str) -> Vec<(String, usize)> {
        let prefix = if parent.is_empty() || parent == "/" {
            "/".to_string()
        } else if parent.ends_with('/') {
            parent.to_string()
        } else {
            format!("{parent}/")
        };
        let mut counts: BTreeMap<String, usize> = BTreeMap::new();
        for (key, ids) in self.asset_by_folder.range(prefix.clone()..) {
            if !key.starts_with(&prefix) {
                break;
            }
            let rest = &key[prefix.len()..];
            let child = match rest.find('/') {
                Some(idx) => &rest[..idx],
                None => rest,
            };
            if child.is_empty() {
                continue;
            }
            *counts.entry(format!("{prefix}{child}")).or_insert(0) += ids.len();
        }
        counts.into_iter().collect()
    }

    /// Counts by class and by project over all assets.
    pub fn asset_stats(&self) -> (usize, BTreeMap<String, usize>, BTreeMap<String, usize>) {
        let mut by_class: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_project: BTreeMap<String, usize> = BTreeMap::new();
        for entry in self.assets.values() {
            *by_class.entry(entry.class.clone()).or_insert(0) += 1;
            *by_project.entry(entry.project.clone()).or_insert(0) += 1;
        }
        (self.assets.len(), by_class, by_project)
    }
}

/// Keep the best-scored record per (name, kind). When an implementation
/// file loses to a header, its path is attached as `implementationPath`;
/// a header never loses to an implementation at equal score.
fn dedup_type_hits(hits: &mut Vec<TypeHit>) {
    let mut best: HashMap<(String, TypeKind), TypeHit> = HashMap::new();
    for hit in hits.drain(..) {
        let key = (hit.entry.name.to_ascii_lowercase(), hit.entry.kind);
        match best.get_mut(&key) {
            None => {
                best.insert(key, hit);
            }
            Some(kept) => {
                let hit_wins = hit.score > kept.score
                    || (hit.score == kept.score
                        && is_header_path(&hit.file.path)
                        && !is_header_path(&kept.file.path));
                if hit_wins {
                    let mut hit = hit;
                    if is_header_path(&hit.file.path)
                        && is_implementation_path(&kept.file.path)
                    {
                        hit.implementation_path = Some(kept.file.path.clone());
                    } else {
                        hit.implementation_path = hit
                            .implementation_path
                            .take()
                            .or_else(|| kept.implementation_path.clone());
                    }
                    *kept = hit;
                } else if is_header_path(&kept.file.path)
                    && is_implementation_path(&hit.file.path)
                    && kept.implementation_path.is_none()
                {
                    kept.implementation_path = Some(hit.file.path.clone());
                }
            }
        }
    }
    hits.extend(best.into_values());
}

fn dedup_member_hits(hits: &mut Vec<MemberHit>) {
    let mut best: HashMap<(String, String, MemberKind), MemberHit> = HashMap::new();
    for hit in hits.drain(..) {
        let key = (
            hit.entry.owner.to_ascii_lowercase(),
            hit.entry.name.to_ascii_lowercase(),
            hit.entry.kind,
        );
        match best.get_mut(&key) {
            None => {
                best.insert(key, hit);
            }
            Some(kept) => {
                let hit_wins = hit.score > kept.score
                    || (hit.score == kept.score
                        && is_header_path(&hit.file.path)
                        && !is_header_path(&kept.file.path));
                if hit_wins {
                    let mut hit = hit;
                    if is_header_path(&hit.file.path)
                        && is_implementation_path(&kept.file.path)
                    {
                        hit.implementation_path = Some(kept.file.path.clone());
                    }
                    *kept = hit;
                } else if is_header_path(&kept.file.path)
                    && is_implementation_path(&hit.file.path)
                    && kept.implementation_path.is_none()
                {
                    kept.implementation_path = Some(hit.file.path.clone());
                }
            }
        }
    }
    hits.extend(best.into_values());
}

/// Order: score descending, then headers before implementations, then
/// name, then path. Deterministic for fixed input.
fn sort_type_hits(hits: &mut [TypeHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                is_header_path(&b.file.path).cmp(&is_header_path(&a.file.path))
            })
            .then_with(|| a.entry.name.cmp(&b.entry.name))
            .then_with(|| a.file.path.cmp(&b.file.path))
    });
}
