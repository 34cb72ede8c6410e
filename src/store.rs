// Durable relational store over SQLite (WAL mode).
// One write connection guarded by a mutex; pool workers and the grep
// scanner open their own read-only connections via `open_read_connection`.
// All ingest mutations run in a single transaction per batch.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::http_types::{IngestAsset, IngestDelete, IngestFile, IngestRequest};
use crate::trigram::{self, Trigram};
use crate::types::{
    clean_path, derive_module, AssetRecord, FileRecord, IndexState, IndexStats, IndexStatus,
    Language, MemberRecord, TypeDeclRecord,
};

const SCHEMA_VERSION: i64 = 1;
const STATS_TTL: Duration = Duration::from_secs(5);
const ZSTD_LEVEL: i32 = 3;

/// Analytics retention window for the tool-call sink.
pub const TOOL_CALL_RETENTION_DAYS: i64 = 30;

/// The durable store. Cheap to share behind an `Arc`.
pub struct Store {
    path: PathBuf,
    conn: Mutex<Connection>,
    /// Set when a Corrupt error is observed; reads continue, writes refuse.
    write_poisoned: AtomicBool,
    stats_cache: Mutex<Option<(Instant, IndexStats)>>,
}

/// Everything the memory index needs for a full rebuild.
#[derive(Debug, Default)]
pub struct LoadedData {
    pub files: Vec<FileRecord>,
    pub types: Vec<TypeDeclRecord>,
    pub members: Vec<MemberRecord>,
    pub assets: Vec<AssetRecord>,
}

/// A freshly upserted file with its replaced declarations, ids assigned.
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub file: FileRecord,
    pub types: Vec<TypeDeclRecord>,
    pub members: Vec<MemberRecord>,
}

/// Result of one transactional ingest batch, consumed by the mirror and
/// memory-index patches that run after commit.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub files_upserted: usize,
    pub assets_upserted: usize,
    pub deleted: usize,
    /// File ids whose records (types/members) were replaced or removed.
    pub removed_file_ids: Vec<i64>,
    pub added_files: Vec<IndexedFile>,
    pub removed_asset_ids: Vec<i64>,
    pub added_assets: Vec<AssetRecord>,
    /// (absolute path, decompressed content) for the mirror.
    pub mirror_writes: Vec<(String, String)>,
    pub mirror_deletes: Vec<String>,
    /// True when any stored content changed, so a reindex is warranted.
    pub content_changed: bool,
}

impl Store {
    /// Open (creating if needed) and migrate the store.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Unavailable(format!("creating {parent:?}: {e}")))?;
        }
        let conn = Connection::open(path)?;
        configure_connection(&conn)?;
        migrate(&conn)?;
        info!(path = %path.display(), "durable store opened");
        Ok(Self {
            path: path.to_path_buf(),
            conn: Mutex::new(conn),
            write_poisoned: AtomicBool::new(false),
            stats_cache: Mutex::new(None),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.path
    }

    /// Open an additional read-only connection for a pool worker or the
    /// grep scanner.
    pub fn open_read_connection(&self) -> Result<Connection, StoreError> {
        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    pub fn is_write_poisoned(&self) -> bool {
        self.write_poisoned.load(Ordering::Acquire)
    }

    /// Load everything for a memory-index rebuild.
    pub fn load_all(&self) -> Result<LoadedData, StoreError> {
        let conn = self.conn.lock();
        let files = read::all_files(&conn)?;
        let types = read::all_types(&conn)?;
        let members = read::all_members(&conn)?;
        let assets = read::all_assets(&conn)?;
        Ok(LoadedData {
            files,
            types,
            members,
            assets,
        })
    }

    /// All stored (path, decompressed content) pairs, for mirror bootstrap.
    pub fn all_contents(&self) -> Result<Vec<(String, String)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT f.path, c.content FROM files f JOIN file_content c ON c.file_id = f.id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (path, blob) = row?;
            out.push((path, decompress_content(&blob)?));
        }
        Ok(out)
    }

    /// Number of files with stored content (what the mirror holds).
    pub fn content_file_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM file_content", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Apply one ingest batch in a single transaction.
    pub fn apply_batch(&self, batch: &IngestRequest) -> Result<BatchOutcome, StoreError> {
        if self.is_write_poisoned() {
            return Err(StoreError::Corrupt(
                "store refused write after earlier invariant violation".into(),
            ));
        }
        let mut conn = self.conn.lock();
        let result = apply_batch_tx(&mut conn, batch);
        match &result {
            Ok(_) => {
                self.invalidate_stats();
            }
            Err(StoreError::Corrupt(msg)) => {
                warn!(error = %msg, "store poisoned for writes");
                self.write_poisoned.store(true, Ordering::Release);
            }
            Err(_) => {}
        }
        result
    }

    /// Convenience single-path delete, used by tests and admin tooling;
    /// ingest batches carry deletes inline.
    pub fn delete_by_path(&self, path: &str) -> Result<usize, StoreError> {
        let request = IngestRequest {
            deletes: vec![IngestDelete {
                path: path.to_string(),
                prefix: false,
            }],
            ..Default::default()
        };
        Ok(self.apply_batch(&request)?.deleted)
    }

    pub fn delete_by_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let request = IngestRequest {
            deletes: vec![IngestDelete {
                path: prefix.to_string(),
                prefix: true,
            }],
            ..Default::default()
        };
        Ok(self.apply_batch(&request)?.deleted)
    }

    pub fn get_index_status(&self) -> Result<Vec<IndexStatus>, StoreError> {
        let conn = self.conn.lock();
        read::index_status(&conn)
    }

    pub fn set_index_status(
        &self,
        language: Language,
        state: IndexState,
        progress: Option<(u64, u64)>,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        write_index_status(&conn, language, state, progress, error)
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock();
        read::meta(&conn, key)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO metadata (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Cached stats projection; `None` when stale or never computed.
    pub fn cached_stats(&self) -> Option<IndexStats> {
        let cache = self.stats_cache.lock();
        cache
            .as_ref()
            .filter(|(at, _)| at.elapsed() < STATS_TTL)
            .map(|(_, stats)| stats.clone())
    }

    pub fn cache_stats(&self, stats: IndexStats) {
        *self.stats_cache.lock() = Some((Instant::now(), stats));
    }

    pub fn invalidate_stats(&self) {
        *self.stats_cache.lock() = None;
    }

    /// Append one analytics record and opportunistically enforce retention.
    pub fn insert_tool_call(
        &self,
        tool: &str,
        args_digest: &str,
        duration_ms: i64,
        result_bytes: i64,
        session_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let now = chrono::Utc::now().timestamp_millis();
        conn.execute(
            "INSERT INTO tool_calls (tool, args_digest, duration_ms, result_bytes, session_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![tool, args_digest, duration_ms, result_bytes, session_id, now],
        )?;
        let cutoff = now - TOOL_CALL_RETENTION_DAYS * 24 * 3600 * 1000;
        conn.execute(
            "DELETE FROM tool_calls WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(())
    }
}

fn configure_connection(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS metadata (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
        [],
    )?;
    let version: i64 = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    if version >= SCHEMA_VERSION {
        return Ok(());
    }
    debug!(from = version, to = SCHEMA_VERSION, "migrating schema");
    conn.execute_batch(
        r#"
        BEGIN;
        CREATE TABLE IF NOT EXISTS files (
            id INTEGER PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            relative_path TEXT NOT NULL,
            project TEXT NOT NULL,
            language TEXT NOT NULL,
            module TEXT NOT NULL,
            mtime INTEGER NOT NULL,
            content_hash INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_files_project ON files(project);
        CREATE INDEX IF NOT EXISTS idx_files_language ON files(language);
        CREATE INDEX IF NOT EXISTS idx_files_module ON files(module);

        CREATE TABLE IF NOT EXISTS types (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            parent TEXT,
            line INTEGER NOT NULL,
            specifiers TEXT,
            UNIQUE(file_id, name, kind, line)
        );
        CREATE INDEX IF NOT EXISTS idx_types_name ON types(name);
        CREATE INDEX IF NOT EXISTS idx_types_parent ON types(parent);
        CREATE INDEX IF NOT EXISTS idx_types_file ON types(file_id);

        CREATE TABLE IF NOT EXISTS members (
            id INTEGER PRIMARY KEY,
            file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            owner TEXT NOT NULL DEFAULT '',
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            line INTEGER NOT NULL,
            signature TEXT,
            specifiers TEXT,
            UNIQUE(file_id, name, kind, line)
        );
        CREATE INDEX IF NOT EXISTS idx_members_name ON members(name);
        CREATE INDEX IF NOT EXISTS idx_members_owner ON members(owner);
        CREATE INDEX IF NOT EXISTS idx_members_file ON members(file_id);

        CREATE TABLE IF NOT EXISTS assets (
            id INTEGER PRIMARY KEY,
            project TEXT NOT NULL,
            path TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            class TEXT NOT NULL,
            parent_class TEXT,
            folder TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_assets_name ON assets(name);
        CREATE INDEX IF NOT EXISTS idx_assets_class ON assets(class);
        CREATE INDEX IF NOT EXISTS idx_assets_folder ON assets(folder);
        CREATE INDEX IF NOT EXISTS idx_assets_project ON assets(project);

        CREATE TABLE IF NOT EXISTS file_content (
            file_id INTEGER PRIMARY KEY REFERENCES files(id) ON DELETE CASCADE,
            content BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS trigram_postings (
            trigram INTEGER PRIMARY KEY,
            file_ids BLOB NOT NULL
        );

        CREATE TABLE IF NOT EXISTS index_status (
            language TEXT PRIMARY KEY,
            state TEXT NOT NULL,
            current INTEGER,
            total INTEGER,
            error TEXT,
            updated_at INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tool_calls (
            id INTEGER PRIMARY KEY,
            tool TEXT NOT NULL,
            args_digest TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            result_bytes INTEGER NOT NULL,
            session_id TEXT,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_tool_calls_tool ON tool_calls(tool);
        CREATE INDEX IF NOT EXISTS idx_tool_calls_created ON tool_calls(created_at);

        INSERT INTO metadata (key, value) VALUES ('schema_version', '1')
            ON CONFLICT(key) DO UPDATE SET value = excluded.value;
        COMMIT;
        "#,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Batch application
// ---------------------------------------------------------------------------

/// Accumulated posting-list changes for one batch, applied once per trigram.
#[derive(Default)]
struct PostingDelta {
    added: HashMap<Trigram, Vec<u32>>,
    removed: HashMap<Trigram, Vec<u32>>,
}

impl PostingDelta {
    fn add_file(&mut self, trigrams: &HashSet<Trigram>, file_id: u32) {
        for &t in trigrams {
            self.added.entry(t).or_default().push(file_id);
        }
    }

    fn remove_file(&mut self, trigrams: &HashSet<Trigram>, file_id: u32) {
        for &t in trigrams {
            self.removed.entry(t).or_default().push(file_id);
        }
    }
}

fn apply_batch_tx(
    conn: &mut Connection,
    batch: &IngestRequest,
) -> Result<BatchOutcome, StoreError> {
    let tx = conn.transaction()?;
    let mut outcome = BatchOutcome::default();
    let mut delta = PostingDelta::default();

    for delete in &batch.deletes {
        apply_delete(&tx, delete, &mut outcome, &mut delta)?;
    }
    for file in &batch.files {
        upsert_file(&tx, file, &mut outcome, &mut delta)?;
    }
    for asset in &batch.assets {
        upsert_asset(&tx, asset, &mut outcome)?;
    }
    for progress in &batch.progress {
        write_index_status(
            &tx,
            progress.language,
            progress.state,
            match (progress.current, progress.total) {
                (Some(c), Some(t)) => Some((c, t)),
                _ => None,
            },
            progress.error.as_deref(),
        )?;
    }
    apply_posting_delta(&tx, delta)?;
    tx.commit()?;
    Ok(outcome)
}

fn apply_delete(
    tx: &Transaction<'_>,
    delete: &IngestDelete,
    outcome: &mut BatchOutcome,
    delta: &mut PostingDelta,
) -> Result<(), StoreError> {
    let path = clean_path(&delete.path);
    let files: Vec<(i64, String)> = if delete.prefix {
        let mut stmt = tx.prepare_cached("SELECT id, path FROM files WHERE path LIKE ?1 || '%'")?;
        let rows = stmt.query_map(params![path], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    } else {
        let mut stmt = tx.prepare_cached("SELECT id, path FROM files WHERE path = ?1")?;
        let rows = stmt.query_map(params![path], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    for (id, file_path) in files {
        remove_file_postings(tx, id, delta)?;
        tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
        outcome.removed_file_ids.push(id);
        outcome.mirror_deletes.push(file_path);
        outcome.deleted += 1;
        outcome.content_changed = true;
    }

    // Content-browser paths live in the asset table; the same tombstone
    // form covers them.
    let asset_ids: Vec<i64> = {
        let sql = if delete.prefix {
            "SELECT id FROM assets WHERE path LIKE ?1 || '%'"
        } else {
            "SELECT id FROM assets WHERE path = ?1"
        };
        let mut stmt = tx.prepare_cached(sql)?;
        let rows = stmt.query_map(params![path], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };
    for id in asset_ids {
        tx.execute("DELETE FROM assets WHERE id = ?1", params![id])?;
        outcome.removed_asset_ids.push(id);
        outcome.deleted += 1;
    }
    Ok(())
}

/// Drop `file_id` from every posting list its stored content contributed to.
fn remove_file_postings(
    tx: &Transaction<'_>,
    file_id: i64,
    delta: &mut PostingDelta,
) -> Result<(), StoreError> {
    if let Some(content) = read::file_content(tx, file_id)? {
        let trigrams = trigram::extract_trigrams(&content);
        delta.remove_file(&trigrams, file_id_u32(file_id)?);
    }
    Ok(())
}

fn upsert_file(
    tx: &Transaction<'_>,
    file: &IngestFile,
    outcome: &mut BatchOutcome,
    delta: &mut PostingDelta,
) -> Result<(), StoreError> {
    let path = clean_path(&file.path);
    let relative_path = clean_path(&file.relative_path);
    let module = derive_module(&file.project, &relative_path);
    let new_hash = file
        .content
        .as_deref()
        .map(|c| trigram::content_hash(c.as_bytes()))
        .unwrap_or(0);

    let existing: Option<(i64, i64, String, String)> = tx
        .query_row(
            "SELECT id, content_hash, project, language FROM files WHERE path = ?1",
            params![path],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            },
        )
        .optional()?;

    let file_id = match existing {
        Some((id, old_hash, old_project, old_language))
            if old_project == file.project && old_language == file.language.as_str() =>
        {
            outcome.removed_file_ids.push(id);
            tx.execute(
                "UPDATE files SET relative_path = ?1, module = ?2, mtime = ?3, content_hash = ?4
                 WHERE id = ?5",
                params![relative_path, module, file.mtime, new_hash, id],
            )?;
            if old_hash != new_hash {
                if let Some(content) = file.content.as_deref() {
                    // minimal posting churn: only trigrams gained or lost
                    // by this file are rewritten
                    let old_trigrams = read::file_content(tx, id)?
                        .map(|c| trigram::extract_trigrams(&c))
                        .unwrap_or_default();
                    let new_trigrams = trigram::extract_trigrams(content);
                    let id32 = file_id_u32(id)?;
                    let dropped: HashSet<Trigram> =
                        old_trigrams.difference(&new_trigrams).copied().collect();
                    let gained: HashSet<Trigram> =
                        new_trigrams.difference(&old_trigrams).copied().collect();
                    delta.remove_file(&dropped, id32);
                    delta.add_file(&gained, id32);
                    store_content(tx, id, content)?;
                    outcome.mirror_writes.push((path.clone(), content.to_string()));
                    outcome.content_changed = true;
                }
            }
            // same hash: content, postings and mirror are untouched, but
            // parser output is still replaced below
            id
        }
        Some((id, _, _, _)) => {
            // project or language changed: delete + insert
            remove_file_postings(tx, id, delta)?;
            tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
            outcome.removed_file_ids.push(id);
            insert_file_row(tx, file, &path, &relative_path, &module, new_hash, delta, outcome)?
        }
        None => insert_file_row(tx, file, &path, &relative_path, &module, new_hash, delta, outcome)?,
    };

    tx.execute("DELETE FROM types WHERE file_id = ?1", params![file_id])?;
    tx.execute("DELETE FROM members WHERE file_id = ?1", params![file_id])?;

    let mut types = Vec::with_capacity(file.types.len());
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO types (file_id, name, kind, parent, line, specifiers)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )?;
        for decl in &file.types {
            let specifiers = encode_specifiers(&decl.specifiers);
            stmt.execute(params![
                file_id,
                decl.name,
                decl.kind.as_str(),
                decl.parent,
                decl.line,
                specifiers,
            ])?;
            types.push(TypeDeclRecord {
                id: tx.last_insert_rowid(),
                file_id,
                name: decl.name.clone(),
                kind: decl.kind,
                parent: decl.parent.clone(),
                line: decl.line,
                specifiers: decl.specifiers.clone(),
            });
        }
    }

    let mut members = Vec::with_capacity(file.members.len());
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO members (file_id, owner, name, kind, line, signature, specifiers)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for member in &file.members {
            let specifiers = encode_specifiers(&member.specifiers);
            stmt.execute(params![
                file_id,
                member.owner,
                member.name,
                member.kind.as_str(),
                member.line,
                member.signature,
                specifiers,
            ])?;
            members.push(MemberRecord {
                id: tx.last_insert_rowid(),
                file_id,
                owner: member.owner.clone(),
                name: member.name.clone(),
                kind: member.kind,
                line: member.line,
                signature: member.signature.clone(),
                specifiers: member.specifiers.clone(),
            });
        }
    }

    outcome.added_files.push(IndexedFile {
        file: FileRecord {
            id: file_id,
            path,
            relative_path,
            project: file.project.clone(),
            language: file.language,
            module,
            mtime: file.mtime,
            content_hash: new_hash,
        },
        types,
        members,
    });
    outcome.files_upserted += 1;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn insert_file_row(
    tx: &Transaction<'_>,
    file: &IngestFile,
    path: &str,
    relative_path: &str,
    module: &str,
    content_hash: i64,
    delta: &mut PostingDelta,
    outcome: &mut BatchOutcome,
) -> Result<i64, StoreError> {
    tx.execute(
        "INSERT INTO files (path, relative_path, project, language, module, mtime, content_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            path,
            relative_path,
            file.project,
            file.language.as_str(),
            module,
            file.mtime,
            content_hash,
        ],
    )?;
    let id = tx.last_insert_rowid();
    if let Some(content) = file.content.as_deref() {
        if file.language.stores_content() {
            store_content(tx, id, content)?;
            delta.add_file(&trigram::extract_trigrams(content), file_id_u32(id)?);
            outcome.mirror_writes.push((path.to_string(), content.to_string()));
            outcome.content_changed = true;
        }
    }
    Ok(id)
}

fn upsert_asset(
    tx: &Transaction<'_>,
    asset: &IngestAsset,
    outcome: &mut BatchOutcome,
) -> Result<(), StoreError> {
    let path = clean_path(&asset.path);
    let folder = match path.rfind('/') {
        Some(idx) if idx > 0 => path[..idx].to_string(),
        _ => "/".to_string(),
    };
    if let Some(old_id) = tx
        .query_row(
            "SELECT id FROM assets WHERE path = ?1",
            params![path],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
    {
        tx.execute("DELETE FROM assets WHERE id = ?1", params![old_id])?;
        outcome.removed_asset_ids.push(old_id);
    }
    tx.execute(
        "INSERT INTO assets (project, path, name, class, parent_class, folder)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            asset.project,
            path,
            asset.name,
            asset.class,
            asset.parent_class,
            folder,
        ],
    )?;
    outcome.added_assets.push(AssetRecord {
        id: tx.last_insert_rowid(),
        project: asset.project.clone(),
        path,
        name: asset.name.clone(),
        class: asset.class.clone(),
        parent_class: asset.parent_class.clone(),
        folder,
    });
    outcome.assets_upserted += 1;
    Ok(())
}

fn apply_posting_delta(tx: &Transaction<'_>, delta: PostingDelta) -> Result<(), StoreError> {
    let mut touched: HashSet<Trigram> = delta.added.keys().copied().collect();
    touched.extend(delta.removed.keys().copied());

    for t in touched {
        let current: Option<Vec<u8>> = tx
            .query_row(
                "SELECT file_ids FROM trigram_postings WHERE trigram = ?1",
                params![t],
                |row| row.get(0),
            )
            .optional()?;
        let mut ids = current.as_deref().map(decode_posting).unwrap_or_default();
        if let Some(removed) = delta.removed.get(&t) {
            for id in removed {
                if let Ok(pos) = ids.binary_search(id) {
                    ids.remove(pos);
                }
            }
        }
        if let Some(added) = delta.added.get(&t) {
            for id in added {
                if let Err(pos) = ids.binary_search(id) {
                    ids.insert(pos, *id);
                }
            }
        }
        if ids.is_empty() {
            tx.execute("DELETE FROM trigram_postings WHERE trigram = ?1", params![t])?;
        } else {
            tx.execute(
                "INSERT INTO trigram_postings (trigram, file_ids) VALUES (?1, ?2)
                 ON CONFLICT(trigram) DO UPDATE SET file_ids = excluded.file_ids",
                params![t, encode_posting(&ids)],
            )?;
        }
    }
    Ok(())
}

fn store_content(tx: &Transaction<'_>, file_id: i64, content: &str) -> Result<(), StoreError> {
    let compressed = zstd::encode_all(content.as_bytes(), ZSTD_LEVEL)
        .map_err(|e| StoreError::Unavailable(format!("compressing content: {e}")))?;
    tx.execute(
        "INSERT INTO file_content (file_id, content) VALUES (?1, ?2)
         ON CONFLICT(file_id) DO UPDATE SET content = excluded.content",
        params![file_id, compressed],
    )?;
    Ok(())
}

fn write_index_status(
    conn: &Connection,
    language: Language,
    state: IndexState,
    progress: Option<(u64, u64)>,
    error: Option<&str>,
) -> Result<(), StoreError> {
    let now = chrono::Utc::now().timestamp_millis();
    let (current, total) = match progress {
        Some((c, t)) => (Some(c as i64), Some(t as i64)),
        None => (None, None),
    };
    conn.execute(
        "INSERT INTO index_status (language, state, current, total, error, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(language) DO UPDATE SET
             state = excluded.state, current = excluded.current,
             total = excluded.total, error = excluded.error,
             updated_at = excluded.updated_at",
        params![language.as_str(), state.as_str(), current, total, error, now],
    )?;
    Ok(())
}

fn encode_specifiers(specifiers: &[String]) -> Option<String> {
    if specifiers.is_empty() {
        None
    } else {
        serde_json::to_string(specifiers).ok()
    }
}

fn decode_specifiers(raw: Option<String>) -> Vec<String> {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn file_id_u32(id: i64) -> Result<u32, StoreError> {
    u32::try_from(id).map_err(|_| StoreError::Corrupt(format!("file id {id} out of range")))
}

// ---------------------------------------------------------------------------
// Posting codec + intersection
// ---------------------------------------------------------------------------

/// Posting lists are BLOBs of sorted little-endian u32 file ids.
pub fn encode_posting(ids: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ids.len() * 4);
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    out
}

pub fn decode_posting(blob: &[u8]) -> Vec<u32> {
    blob.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// N-way sorted intersection, shortest list first, galloping within each
/// longer list.
pub fn intersect_postings(mut lists: Vec<Vec<u32>>) -> Vec<u32> {
    if lists.is_empty() {
        return Vec::new();
    }
    lists.sort_by_key(|l| l.len());
    let mut result = lists.remove(0);
    for list in &lists {
        result = gallop_intersect(&result, list);
        if result.is_empty() {
            break;
        }
    }
    result
}

fn gallop_intersect(small: &[u32], large: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(small.len());
    let mut lo = 0usize;
    for &value in small {
        if lo >= large.len() {
            break;
        }
        // gallop to bound the range that can contain value
        let mut bound = 1usize;
        while lo + bound < large.len() && large[lo + bound] < value {
            bound *= 2;
        }
        let hi = (lo + bound + 1).min(large.len());
        match large[lo..hi].binary_search(&value) {
            Ok(idx) => {
                out.push(value);
                lo += idx + 1;
            }
            Err(idx) => {
                lo += idx;
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Read-side queries, usable on any connection (pool workers, grep scanner)
// ---------------------------------------------------------------------------

pub mod read {
    use super::*;

    pub fn all_files(conn: &Connection) -> Result<Vec<FileRecord>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, path, relative_path, project, language, module, mtime, content_hash
             FROM files ORDER BY id",
        )?;
        let rows = stmt.query_map([], file_from_row)?;
        collect_rows(rows)
    }

    pub fn all_types(conn: &Connection) -> Result<Vec<TypeDeclRecord>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, file_id, name, kind, parent, line, specifiers FROM types ORDER BY id",
        )?;
        let rows = stmt.query_map([], type_from_row)?;
        collect_rows(rows)
    }

    pub fn all_members(conn: &Connection) -> Result<Vec<MemberRecord>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, file_id, owner, name, kind, line, signature, specifiers FROM members ORDER BY id",
        )?;
        let rows = stmt.query_map([], member_from_row)?;
        collect_rows(rows)
    }

    pub fn all_assets(conn: &Connection) -> Result<Vec<AssetRecord>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, project, path, name, class, parent_class, folder FROM assets ORDER BY id",
        )?;
        let rows = stmt.query_map([], asset_from_row)?;
        collect_rows(rows)
    }

    /// Decompressed content for a file, `None` when no content row exists.
    pub fn file_content(conn: &Connection, file_id: i64) -> Result<Option<String>, StoreError> {
        let blob: Option<Vec<u8>> = conn
            .query_row(
                "SELECT content FROM file_content WHERE file_id = ?1",
                params![file_id],
                |row| row.get(0),
            )
            .optional()?;
        blob.map(|b| decompress_content(&b)).transpose()
    }

    /// File ids for grep when trigram indexing is bypassed.
    pub fn all_file_ids(
        conn: &Connection,
        project: Option<&str>,
        language: Option<Language>,
        content_only: bool,
    ) -> Result<Vec<i64>, StoreError> {
        let mut sql = String::from("SELECT f.id FROM files f");
        if content_only {
            sql.push_str(" JOIN file_content c ON c.file_id = f.id");
        }
        sql.push_str(" WHERE 1=1");
        let mut params_vec: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
        if let Some(p) = project {
            sql.push_str(" AND f.project = ?");
            params_vec.push(Box::new(p.to_string()));
        }
        if let Some(l) = language {
            sql.push_str(" AND f.language = ?");
            params_vec.push(Box::new(l.as_str().to_string()));
        }
        let mut stmt = conn.prepare(&sql)?;
        let refs: Vec<&dyn rusqlite::types::ToSql> =
            params_vec.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(refs.as_slice(), |row| row.get(0))?;
        collect_rows(rows)
    }

    /// Posting-list intersection plus project/language predicate.
    pub fn trigram_candidates(
        conn: &Connection,
        trigrams: &[Trigram],
        project: Option<&str>,
        language: Option<Language>,
    ) -> Result<Vec<i64>, StoreError> {
        let mut lists = Vec::with_capacity(trigrams.len());
        let mut stmt =
            conn.prepare_cached("SELECT file_ids FROM trigram_postings WHERE trigram = ?1")?;
        for &t in trigrams {
            let blob: Option<Vec<u8>> = stmt
                .query_row(params![t], |row| row.get(0))
                .optional()?;
            match blob {
                Some(b) => lists.push(decode_posting(&b)),
                // a required trigram nobody contains: no candidates
                None => return Ok(Vec::new()),
            }
        }
        let ids = intersect_postings(lists);
        if project.is_none() && language.is_none() {
            return Ok(ids.into_iter().map(i64::from).collect());
        }
        let mut check = conn.prepare_cached(
            "SELECT project, language FROM files WHERE id = ?1",
        )?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let row: Option<(String, String)> = check
                .query_row(params![i64::from(id)], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })
                .optional()?;
            if let Some((p, l)) = row {
                if project.map(|want| want == p).unwrap_or(true)
                    && language.map(|want| want.as_str() == l).unwrap_or(true)
                {
                    out.push(i64::from(id));
                }
            }
        }
        Ok(out)
    }

    pub fn file_by_id(conn: &Connection, id: i64) -> Result<Option<FileRecord>, StoreError> {
        let row = conn
            .query_row(
                "SELECT id, path, relative_path, project, language, module, mtime, content_hash
                 FROM files WHERE id = ?1",
                params![id],
                file_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn index_status(conn: &Connection) -> Result<Vec<IndexStatus>, StoreError> {
        let mut stored: HashMap<String, IndexStatus> = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT language, state, current, total, error, updated_at FROM index_status",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<i64>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;
        for row in rows {
            let (lang, state, current, total, error, updated_at) = row?;
            let language = Language::parse(&lang)
                .map_err(|e| StoreError::Corrupt(e.to_string()))?;
            let state =
                IndexState::parse(&state).map_err(|e| StoreError::Corrupt(e.to_string()))?;
            stored.insert(
                lang,
                IndexStatus {
                    language,
                    state,
                    current: current.map(|v| v as u64),
                    total: total.map(|v| v as u64),
                    error,
                    updated_at,
                },
            );
        }
        // every language reports, `unknown` when never touched
        let mut out = Vec::with_capacity(4);
        for language in Language::all() {
            out.push(stored.remove(language.as_str()).unwrap_or(IndexStatus {
                language,
                state: IndexState::Unknown,
                current: None,
                total: None,
                error: None,
                updated_at: 0,
            }));
        }
        Ok(out)
    }

    pub fn meta(conn: &Connection, key: &str) -> Result<Option<String>, StoreError> {
        let value = conn
            .query_row(
                "SELECT value FROM metadata WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn compute_stats(conn: &Connection) -> Result<IndexStats, StoreError> {
        let count = |sql: &str| -> Result<u64, StoreError> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };
        let files = count("SELECT COUNT(*) FROM files")?;
        let types = count("SELECT COUNT(*) FROM types")?;
        let members = count("SELECT COUNT(*) FROM members")?;
        let assets = count("SELECT COUNT(*) FROM assets")?;

        let group = |sql: &str| -> Result<BTreeMap<String, u64>, StoreError> {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?;
            let mut map = BTreeMap::new();
            for row in rows {
                let (k, v) = row?;
                map.insert(k, v);
            }
            Ok(map)
        };
        Ok(IndexStats {
            files,
            types,
            members,
            assets,
            by_language: group("SELECT language, COUNT(*) FROM files GROUP BY language")?,
            by_project: group("SELECT project, COUNT(*) FROM files GROUP BY project")?,
        })
    }

    /// Aggregated analytics projection: (tool, calls, mean duration, bytes).
    pub fn tool_call_stats(
        conn: &Connection,
    ) -> Result<Vec<(String, u64, f64, u64)>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT tool, COUNT(*), AVG(duration_ms), SUM(result_bytes)
             FROM tool_calls GROUP BY tool ORDER BY COUNT(*) DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)? as u64,
                row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                row.get::<_, Option<i64>>(3)?.unwrap_or(0) as u64,
            ))
        })?;
        collect_rows(rows)
    }

    fn file_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FileRecord> {
        let language: String = row.get(4)?;
        Ok(FileRecord {
            id: row.get(0)?,
            path: row.get(1)?,
            relative_path: row.get(2)?,
            project: row.get(3)?,
            language: Language::parse(&language).unwrap_or(Language::Config),
            module: row.get(5)?,
            mtime: row.get(6)?,
            content_hash: row.get(7)?,
        })
    }

    fn type_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TypeDeclRecord> {
        let kind: String = row.get(3)?;
        Ok(TypeDeclRecord {
            id: row.get(0)?,
            file_id: row.get(1)?,
            name: row.get(2)?,
            kind: crate::types::TypeKind::parse(&kind).unwrap_or(crate::types::TypeKind::Class),
            parent: row.get(4)?,
            line: row.get::<_, i64>(5)? as u32,
            specifiers: decode_specifiers(row.get(6)?),
        })
    }

    fn member_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MemberRecord> {
        let kind: String = row.get(4)?;
        Ok(MemberRecord {
            id: row.get(0)?,
            file_id: row.get(1)?,
            owner: row.get(2)?,
            name: row.get(3)?,
            kind: crate::types::MemberKind::parse(&kind)
                .unwrap_or(crate::types::MemberKind::Function),
            line: row.get::<_, i64>(5)? as u32,
            signature: row.get(6)?,
            specifiers: decode_specifiers(row.get(7)?),
        })
    }

    fn asset_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AssetRecord> {
        Ok(AssetRecord {
            id: row.get(0)?,
            project: row.get(1)?,
            path: row.get(2)?,
            name: row.get(3)?,
            class: row.get(4)?,
            parent_class: row.get(5)?,
            folder: row.get(6)?,
        })
    }

    fn collect_rows<T>(
        rows: impl Iterator<Item = rusqlite::Result<T>>,
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn decompress_content(blob: &[u8]) -> Result<String, StoreError> {
    let bytes = zstd::decode_all(blob)
        .map_err(|e| StoreError::Corrupt(format!("decompressing content: {e}")))?;
    String::from_utf8(bytes).map_err(|e| StoreError::Corrupt(format!("content not UTF-8: {e}")))
}

/// Slice a context window `[line - n, line + n]` (1-based, clipped) out of
/// file content.
pub fn context_window(content: &str, line: u32, n: u32) -> crate::http_types::ContextBlock {
    let lines: Vec<&str> = content.lines().collect();
    let line = line.max(1) as usize;
    let start = line.saturating_sub(n as usize).max(1);
    let end = (line + n as usize).min(lines.len());
    let slice = if start > end {
        // declaration line past EOF (stale parser output)
        Vec::new()
    } else {
        lines[start - 1..end].iter().map(|s| s.to_string()).collect()
    };
    crate::http_types::ContextBlock {
        start_line: start as u32,
        lines: slice,
    }
}

/// The single declaration line, for `includeSignatures`.
pub fn declaration_line(content: &str, line: u32) -> Option<String> {
    content
        .lines()
        .nth(line.saturating_sub(1) as usize)
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posting_codec_round_trip() {
        let ids = vec![1u32, 5, 42, 100_000];
        assert_eq!(decode_posting(&encode_posting(&ids)), ids);
        assert!(decode_posting(&[]).is_empty());
    }

    #[test]
    fn test_intersect_postings() {
        let a = vec![1, 3, 5, 7, 9, 11];
        let b = vec![3, 4, 5, 9, 10];
        let c = vec![1, 2, 3, 5, 8, 9, 13];
        assert_eq!(intersect_postings(vec![a, b, c]), vec![3, 5, 9]);
        assert_eq!(intersect_postings(vec![]), Vec::<u32>::new());
        assert_eq!(
            intersect_postings(vec![vec![1, 2], vec![3, 4]]),
            Vec::<u32>::new()
        );
    }

    #[test]
    fn test_gallop_handles_skew() {
        let small = vec![500, 900_000];
        let large: Vec<u32> = (0..1_000_000).step_by(100).collect();
        assert_eq!(gallop_intersect(&small, &large), vec![500, 900_000]);
    }

    #[test]
    fn test_context_window_maths() {
        let content = (1..=100)
            .map(|i| format!("line {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let block = context_window(&content, 42, 5);
        assert_eq!(block.start_line, 37);
        assert_eq!(block.lines.len(), 11);
        assert_eq!(block.lines[5], "line 42");

        // clipped at the top
        let block = context_window(&content, 2, 5);
        assert_eq!(block.start_line, 1);
        assert_eq!(block.lines.len(), 7);

        // clipped at the bottom
        let block = context_window(&content, 99, 5);
        assert_eq!(block.lines.last().unwrap(), "line 100");
    }

    #[test]
    fn test_declaration_line() {
        let content = "class A\n    void BeginPlay()\nend";
        assert_eq!(
            declaration_line(content, 2).unwrap(),
            "void BeginPlay()"
        );
        assert!(declaration_line(content, 99).is_none());
    }
}
