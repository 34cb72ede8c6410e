// Durable store tests: transactional upserts, trigram posting maintenance,
// cascading deletes, idempotent replay.

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use uesearch::http_types::{
    IngestAsset, IngestDelete, IngestFile, IngestMember, IngestRequest, IngestTypeDecl,
};
use uesearch::store::{read, Store};
use uesearch::trigram::extract_trigrams;
use uesearch::types::{IndexState, Language, MemberKind, TypeKind};

fn temp_store() -> (TempDir, Store) {
    let dir = TempDir::new().unwrap();
    let store = Store::open(&dir.path().join("index.db")).unwrap();
    (dir, store)
}

fn source_file(path: &str, content: &str) -> IngestFile {
    IngestFile {
        path: path.to_string(),
        relative_path: path.trim_start_matches("/ws/").to_string(),
        project: "Game".to_string(),
        language: Language::Cpp,
        content: Some(content.to_string()),
        mtime: 1_700_000_000_000,
        types: vec![IngestTypeDecl {
            name: "AActor".to_string(),
            kind: TypeKind::Class,
            parent: Some("UObject".to_string()),
            line: 1,
            specifiers: vec!["BlueprintType".to_string()],
        }],
        members: vec![IngestMember {
            owner: "AActor".to_string(),
            name: "BeginPlay".to_string(),
            kind: MemberKind::Function,
            line: 2,
            signature: Some("void BeginPlay()".to_string()),
            specifiers: vec![],
        }],
    }
}

fn batch_with(files: Vec<IngestFile>) -> IngestRequest {
    IngestRequest {
        files,
        ..Default::default()
    }
}

#[test]
fn test_upsert_and_load_round_trip() {
    let (_dir, store) = temp_store();
    let content = "class AActor : UObject\n{\n    void BeginPlay();\n};\n";
    let outcome = store
        .apply_batch(&batch_with(vec![source_file("/ws/Game/Actor.h", content)]))
        .unwrap();
    assert_eq!(outcome.files_upserted, 1);
    assert_eq!(outcome.added_files.len(), 1);
    assert!(outcome.content_changed);

    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.files.len(), 1);
    assert_eq!(loaded.types.len(), 1);
    assert_eq!(loaded.members.len(), 1);
    assert_eq!(loaded.files[0].path, "/ws/Game/Actor.h");
    assert_eq!(loaded.types[0].name, "AActor");
    assert_eq!(loaded.types[0].parent.as_deref(), Some("UObject"));

    // stored content survives compression
    let conn = store.open_read_connection().unwrap();
    let round_trip = read::file_content(&conn, loaded.files[0].id).unwrap().unwrap();
    assert_eq!(round_trip, content);
}

#[test]
fn test_replaying_a_batch_is_a_no_op() {
    let (_dir, store) = temp_store();
    let batch = batch_with(vec![source_file(
        "/ws/Game/Actor.h",
        "class AActor {};\nvoid BeginPlay();\n",
    )]);
    store.apply_batch(&batch).unwrap();
    let first = store.load_all().unwrap();

    let outcome = store.apply_batch(&batch).unwrap();
    // same hash: content, postings and mirror untouched
    assert!(!outcome.content_changed);
    assert!(outcome.mirror_writes.is_empty());

    let second = store.load_all().unwrap();
    assert_eq!(first.files.len(), second.files.len());
    assert_eq!(first.files[0].id, second.files[0].id);
    assert_eq!(first.files[0].content_hash, second.files[0].content_hash);
    assert_eq!(second.types.len(), 1);
    assert_eq!(second.members.len(), 1);

    // postings are unchanged too
    let conn = store.open_read_connection().unwrap();
    let trigrams: Vec<u32> = extract_trigrams("aactor").into_iter().collect();
    let candidates = read::trigram_candidates(&conn, &trigrams, None, None).unwrap();
    assert_eq!(candidates, vec![first.files[0].id]);
}

#[test]
fn test_content_change_diffs_postings_minimally() {
    let (_dir, store) = temp_store();
    store
        .apply_batch(&batch_with(vec![source_file(
            "/ws/Game/Actor.h",
            "DestroyActor here",
        )]))
        .unwrap();
    let file_id = store.load_all().unwrap().files[0].id;

    let conn = store.open_read_connection().unwrap();
    let old: Vec<u32> = extract_trigrams("destroyactor").into_iter().collect();
    assert_eq!(
        read::trigram_candidates(&conn, &old, None, None).unwrap(),
        vec![file_id]
    );
    drop(conn);

    store
        .apply_batch(&batch_with(vec![source_file(
            "/ws/Game/Actor.h",
            "SpawnActor instead",
        )]))
        .unwrap();

    let conn = store.open_read_connection().unwrap();
    let gone: Vec<u32> = extract_trigrams("destroy").into_iter().collect();
    assert!(read::trigram_candidates(&conn, &gone, None, None)
        .unwrap()
        .is_empty());
    let now: Vec<u32> = extract_trigrams("spawnactor").into_iter().collect();
    assert_eq!(
        read::trigram_candidates(&conn, &now, None, None).unwrap(),
        vec![file_id]
    );
}

#[test]
fn test_candidates_respect_project_and_language_filters() {
    let (_dir, store) = temp_store();
    let mut engine_file = source_file("/ws/Engine/Timer.h", "FTimerHandle handle;");
    engine_file.project = "Engine".to_string();
    let mut script = source_file("/ws/Game/Timer.as", "FTimerHandle handle;");
    script.language = Language::Angelscript;
    store
        .apply_batch(&batch_with(vec![engine_file, script]))
        .unwrap();

    let conn = store.open_read_connection().unwrap();
    let trigrams: Vec<u32> = extract_trigrams("ftimerhandle").into_iter().collect();
    assert_eq!(
        read::trigram_candidates(&conn, &trigrams, None, None)
            .unwrap()
            .len(),
        2
    );
    assert_eq!(
        read::trigram_candidates(&conn, &trigrams, Some("Engine"), None)
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        read::trigram_candidates(&conn, &trigrams, None, Some(Language::Angelscript))
            .unwrap()
            .len(),
        1
    );
    assert!(
        read::trigram_candidates(&conn, &trigrams, Some("Engine"), Some(Language::Angelscript))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_delete_by_path_cascades_and_is_idempotent() {
    let (_dir, store) = temp_store();
    store
        .apply_batch(&batch_with(vec![source_file(
            "/ws/Game/Actor.h",
            "class AActor {};",
        )]))
        .unwrap();

    assert_eq!(store.delete_by_path("/ws/Game/Actor.h").unwrap(), 1);
    let loaded = store.load_all().unwrap();
    assert!(loaded.files.is_empty());
    assert!(loaded.types.is_empty());
    assert!(loaded.members.is_empty());

    let conn = store.open_read_connection().unwrap();
    let trigrams: Vec<u32> = extract_trigrams("aactor").into_iter().collect();
    assert!(read::trigram_candidates(&conn, &trigrams, None, None)
        .unwrap()
        .is_empty());
    drop(conn);

    // deleting twice equals deleting once
    assert_eq!(store.delete_by_path("/ws/Game/Actor.h").unwrap(), 0);
}

#[test]
fn test_delete_by_prefix_tombstone() {
    let (_dir, store) = temp_store();
    store
        .apply_batch(&batch_with(vec![
            source_file("/ws/Game/A.h", "class A {};"),
            source_file("/ws/Game/B.h", "class B {};"),
            source_file("/ws/Engine/C.h", "class C {};"),
        ]))
        .unwrap();

    assert_eq!(store.delete_by_prefix("/ws/Game/").unwrap(), 2);
    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.files.len(), 1);
    assert_eq!(loaded.files[0].path, "/ws/Engine/C.h");
}

#[test]
fn test_project_move_is_delete_plus_insert() {
    let (_dir, store) = temp_store();
    store
        .apply_batch(&batch_with(vec![source_file(
            "/ws/Game/Actor.h",
            "class AActor {};",
        )]))
        .unwrap();
    let old_id = store.load_all().unwrap().files[0].id;

    let mut moved = source_file("/ws/Game/Actor.h", "class AActor {};");
    moved.project = "Engine".to_string();
    let outcome = store.apply_batch(&batch_with(vec![moved])).unwrap();
    assert!(outcome.removed_file_ids.contains(&old_id));

    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.files.len(), 1);
    assert_ne!(loaded.files[0].id, old_id);
    assert_eq!(loaded.files[0].project, "Engine");
}

#[test]
fn test_asset_upsert_and_delete() {
    let (_dir, store) = temp_store();
    let request = IngestRequest {
        assets: vec![
            IngestAsset {
                project: "Game".to_string(),
                path: "/Game/Blueprints/BP_Player".to_string(),
                name: "BP_Player".to_string(),
                class: "Blueprint".to_string(),
                parent_class: Some("ACharacter".to_string()),
            },
            IngestAsset {
                project: "Game".to_string(),
                path: "/Game/Maps/Arena".to_string(),
                name: "Arena".to_string(),
                class: "World".to_string(),
                parent_class: None,
            },
        ],
        ..Default::default()
    };
    let outcome = store.apply_batch(&request).unwrap();
    assert_eq!(outcome.assets_upserted, 2);
    assert_eq!(outcome.added_assets[0].folder, "/Game/Blueprints");

    // re-upserting the same path replaces the row
    let outcome = store.apply_batch(&request).unwrap();
    assert_eq!(outcome.removed_asset_ids.len(), 2);
    assert_eq!(store.load_all().unwrap().assets.len(), 2);

    // tombstone form covers content-browser paths
    let delete = IngestRequest {
        deletes: vec![IngestDelete {
            path: "/Game/Blueprints/".to_string(),
            prefix: true,
        }],
        ..Default::default()
    };
    store.apply_batch(&delete).unwrap();
    let assets = store.load_all().unwrap().assets;
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].name, "Arena");
}

#[test]
fn test_index_status_and_progress() {
    let (_dir, store) = temp_store();
    store
        .set_index_status(Language::Cpp, IndexState::Indexing, Some((10, 100)), None)
        .unwrap();
    let statuses = store.get_index_status().unwrap();
    let cpp = statuses
        .iter()
        .find(|s| s.language == Language::Cpp)
        .unwrap();
    assert_eq!(cpp.state, IndexState::Indexing);
    assert_eq!(cpp.current, Some(10));
    assert_eq!(cpp.total, Some(100));
    // untouched languages report unknown
    let content = statuses
        .iter()
        .find(|s| s.language == Language::Content)
        .unwrap();
    assert_eq!(content.state, IndexState::Unknown);
}

#[test]
fn test_stats_cache_invalidation() {
    let (_dir, store) = temp_store();
    let conn = store.open_read_connection().unwrap();
    let stats = read::compute_stats(&conn).unwrap();
    assert_eq!(stats.files, 0);
    store.cache_stats(stats);
    assert!(store.cached_stats().is_some());

    store
        .apply_batch(&batch_with(vec![source_file("/ws/A.h", "class A {};")]))
        .unwrap();
    // ingest invalidated the cache
    assert!(store.cached_stats().is_none());
    let stats = read::compute_stats(&conn).unwrap();
    assert_eq!(stats.files, 1);
    assert_eq!(*stats.by_language.get("cpp").unwrap(), 1);
    assert_eq!(*stats.by_project.get("Game").unwrap(), 1);
}

#[test]
fn test_content_files_skip_content_table() {
    let (_dir, store) = temp_store();
    let mut asset_file = source_file("/ws/Game/Content/BP.uasset", "ignored");
    asset_file.language = Language::Content;
    asset_file.content = None;
    asset_file.types.clear();
    asset_file.members.clear();
    store.apply_batch(&batch_with(vec![asset_file])).unwrap();

    assert_eq!(store.content_file_count().unwrap(), 0);
    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.files.len(), 1);
    let conn = store.open_read_connection().unwrap();
    assert!(read::file_content(&conn, loaded.files[0].id)
        .unwrap()
        .is_none());
}

#[test]
fn test_mtime_refresh_on_same_hash() {
    let (_dir, store) = temp_store();
    let mut file = source_file("/ws/Game/Actor.h", "class AActor {};");
    store.apply_batch(&batch_with(vec![file.clone()])).unwrap();

    file.mtime += 5_000;
    store.apply_batch(&batch_with(vec![file])).unwrap();
    let loaded = store.load_all().unwrap();
    assert_eq!(loaded.files[0].mtime, 1_700_000_000_000 + 5_000);
}
