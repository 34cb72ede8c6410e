// Ingest pipeline integration: store + memory index + mirror move together
// under one batch, and replaying a batch changes nothing.

use std::sync::Arc;
use tempfile::TempDir;

use uesearch::http_types::{IngestDelete, IngestFile, IngestRequest, IngestTypeDecl};
use uesearch::ingest::IngestService;
use uesearch::memory_index::{LookupFilter, MemoryIndex};
use uesearch::mirror::MirrorMaintainer;
use uesearch::store::Store;
use uesearch::types::{Language, TypeKind};

struct Rig {
    _dir: TempDir,
    mirror_dir: std::path::PathBuf,
    store: Arc<Store>,
    index: Arc<MemoryIndex>,
    ingest: IngestService,
}

fn rig() -> Rig {
    let dir = TempDir::new().unwrap();
    let mirror_dir = dir.path().join("mirror");
    let store = Arc::new(Store::open(&dir.path().join("index.db")).unwrap());
    let index = Arc::new(MemoryIndex::new());
    index.load(&store.load_all().unwrap());
    let mirror = Arc::new(MirrorMaintainer::new(&mirror_dir));
    mirror.bootstrap(&store).unwrap();
    let ingest = IngestService::new(store.clone(), index.clone(), mirror, None);
    Rig {
        _dir: dir,
        mirror_dir,
        store,
        index,
        ingest,
    }
}

fn actor_batch() -> IngestRequest {
    IngestRequest {
        files: vec![IngestFile {
            path: "/ws/Game/Actor.h".to_string(),
            relative_path: "Game/Actor.h".to_string(),
            project: "Game".to_string(),
            language: Language::Cpp,
            content: Some("class AActor\n{\n};\n".to_string()),
            mtime: 1_700_000_000_000,
            types: vec![IngestTypeDecl {
                name: "AActor".to_string(),
                kind: TypeKind::Class,
                parent: None,
                line: 1,
                specifiers: vec![],
            }],
            members: vec![],
        }],
        ..Default::default()
    }
}

#[tokio::test]
async fn test_batch_updates_store_index_and_mirror() {
    let rig = rig();
    let response = rig.ingest.apply(actor_batch()).await.unwrap();
    assert!(response.ok);
    assert_eq!(response.files_upserted, 1);

    // durable store has the row
    assert_eq!(rig.store.load_all().unwrap().files.len(), 1);

    // memory index answers immediately
    let snapshot = rig.index.snapshot();
    let hits = snapshot.find_types("AActor", false, &LookupFilter::default(), None, 10);
    assert_eq!(hits.len(), 1);

    // mirror carries the decompressed source (empty prefix: full path
    // is rebased under the mirror root)
    let mirrored = rig.mirror_dir.join("ws/Game/Actor.h");
    assert!(mirrored.exists(), "missing {}", mirrored.display());
    assert_eq!(
        std::fs::read_to_string(mirrored).unwrap(),
        "class AActor\n{\n};\n"
    );
}

#[tokio::test]
async fn test_replay_is_idempotent_across_all_state() {
    let rig = rig();
    rig.ingest.apply(actor_batch()).await.unwrap();
    let files_before = rig.store.load_all().unwrap();
    let count_before = rig.index.snapshot().type_count();

    let response = rig.ingest.apply(actor_batch()).await.unwrap();
    assert!(response.ok);

    let files_after = rig.store.load_all().unwrap();
    assert_eq!(files_before.files[0].id, files_after.files[0].id);
    assert_eq!(
        files_before.files[0].content_hash,
        files_after.files[0].content_hash
    );
    assert_eq!(rig.index.snapshot().type_count(), count_before);
}

#[tokio::test]
async fn test_delete_removes_everything() {
    let rig = rig();
    rig.ingest.apply(actor_batch()).await.unwrap();
    let mirrored = rig.mirror_dir.join("ws/Game/Actor.h");
    assert!(mirrored.exists());

    let delete = IngestRequest {
        deletes: vec![IngestDelete {
            path: "/ws/Game/Actor.h".to_string(),
            prefix: false,
        }],
        ..Default::default()
    };
    let response = rig.ingest.apply(delete).await.unwrap();
    assert_eq!(response.deleted, 1);

    assert!(rig.store.load_all().unwrap().files.is_empty());
    assert_eq!(rig.index.snapshot().type_count(), 0);
    assert!(!mirrored.exists());
}

#[tokio::test]
async fn test_ingest_order_is_visible_in_order() {
    let rig = rig();
    rig.ingest.apply(actor_batch()).await.unwrap();

    let mut second = actor_batch();
    second.files[0].content = Some("class AActor\n{\n    int Health;\n};\n".to_string());
    second.files[0].types[0].parent = Some("UObject".to_string());
    rig.ingest.apply(second).await.unwrap();

    let snapshot = rig.index.snapshot();
    let hits = snapshot.find_types("AActor", false, &LookupFilter::default(), None, 10);
    assert_eq!(hits[0].entry.parent.as_deref(), Some("UObject"));
}

#[tokio::test]
async fn test_validation_rejects_bad_batches() {
    let rig = rig();
    let mut bad = actor_batch();
    bad.files[0].content = None;
    assert!(rig.ingest.apply(bad).await.is_err());
}
