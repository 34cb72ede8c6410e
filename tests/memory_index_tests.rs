// Memory index tests: rebuild/patch equivalence, fuzzy lookup scoring,
// header preference, cyclic child graphs, module and asset browsing.

use pretty_assertions::assert_eq;
use uesearch::memory_index::{LookupFilter, MemoryIndex};
use uesearch::store::{IndexedFile, LoadedData};
use uesearch::types::{
    AssetRecord, FileRecord, Language, MemberKind, MemberRecord, TypeDeclRecord, TypeKind,
};

fn file(id: i64, path: &str, project: &str, language: Language) -> FileRecord {
    let relative = path.trim_start_matches('/').to_string();
    FileRecord {
        id,
        path: path.to_string(),
        relative_path: relative.clone(),
        project: project.to_string(),
        language,
        module: uesearch::types::derive_module(project, &relative),
        mtime: 0,
        content_hash: 0,
    }
}

fn type_decl(id: i64, file_id: i64, name: &str, kind: TypeKind, parent: Option<&str>) -> TypeDeclRecord {
    TypeDeclRecord {
        id,
        file_id,
        name: name.to_string(),
        kind,
        parent: parent.map(|p| p.to_string()),
        line: 1,
        specifiers: vec![],
    }
}

fn member(id: i64, file_id: i64, owner: &str, name: &str, kind: MemberKind, line: u32) -> MemberRecord {
    MemberRecord {
        id,
        file_id,
        owner: owner.to_string(),
        name: name.to_string(),
        kind,
        line,
        signature: None,
        specifiers: vec![],
    }
}

fn sample_data() -> LoadedData {
    LoadedData {
        files: vec![
            file(1, "/ws/Engine/Public/Actor.h", "Engine", Language::Cpp),
            file(2, "/ws/Engine/Private/Actor.cpp", "Engine", Language::Cpp),
            file(3, "/ws/Game/Scripts/Pawn.as", "Game", Language::Angelscript),
        ],
        types: vec![
            type_decl(1, 1, "AActor", TypeKind::Class, Some("UObject")),
            type_decl(2, 2, "AActor", TypeKind::Class, Some("UObject")),
            type_decl(3, 3, "APawn", TypeKind::Class, Some("AActor")),
            type_decl(4, 3, "EPawnState", TypeKind::Enum, None),
        ],
        members: vec![
            member(1, 1, "AActor", "BeginPlay", MemberKind::Function, 12),
            member(2, 1, "AActor", "bHidden", MemberKind::Property, 20),
            member(3, 3, "APawn", "Possess", MemberKind::Function, 8),
        ],
        assets: vec![
            AssetRecord {
                id: 1,
                project: "Game".to_string(),
                path: "/Game/Blueprints/BP_Player".to_string(),
                name: "BP_Player".to_string(),
                class: "Blueprint".to_string(),
                parent_class: Some("APawn".to_string()),
                folder: "/Game/Blueprints".to_string(),
            },
            AssetRecord {
                id: 2,
                project: "Game".to_string(),
                path: "/Game/Blueprints/Enemies/BP_Grunt".to_string(),
                name: "BP_Grunt".to_string(),
                class: "Blueprint".to_string(),
                parent_class: Some("APawn".to_string()),
                folder: "/Game/Blueprints/Enemies".to_string(),
            },
        ],
    }
}

fn loaded_index() -> MemoryIndex {
    let index = MemoryIndex::new();
    index.load(&sample_data());
    index
}

#[test]
fn test_unloaded_index_is_empty() {
    let index = MemoryIndex::new();
    let snapshot = index.snapshot();
    assert!(!snapshot.loaded);
    assert_eq!(snapshot.type_count(), 0);
    assert!(snapshot
        .find_types("AActor", false, &LookupFilter::default(), None, 10)
        .is_empty());
}

#[test]
fn test_exact_lookup_prefers_header_and_attaches_implementation() {
    let index = loaded_index();
    let snapshot = index.snapshot();
    let hits = snapshot.find_types("AActor", false, &LookupFilter::default(), None, 10);
    // header and implementation deduplicate into one record
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].file.path, "/ws/Engine/Public/Actor.h");
    assert_eq!(
        hits[0].implementation_path.as_deref(),
        Some("/ws/Engine/Private/Actor.cpp")
    );
}

#[test]
fn test_fuzzy_lookup_ranks_exact_first() {
    let index = loaded_index();
    let snapshot = index.snapshot();
    let hits = snapshot.find_types("apawn", true, &LookupFilter::default(), None, 10);
    assert!(!hits.is_empty());
    assert_eq!(hits[0].entry.name, "APawn");
}

#[test]
fn test_fuzzy_lookup_finds_substrings() {
    let index = loaded_index();
    let snapshot = index.snapshot();
    let hits = snapshot.find_types("PawnState", true, &LookupFilter::default(), None, 10);
    assert!(hits.iter().any(|h| h.entry.name == "EPawnState"));
}

#[test]
fn test_filters_constrain_results() {
    let index = loaded_index();
    let snapshot = index.snapshot();
    let filter = LookupFilter {
        project: Some("Game".to_string()),
        language: None,
    };
    assert!(snapshot.find_types("AActor", false, &filter, None, 10).is_empty());
    let filter = LookupFilter {
        project: None,
        language: Some(Language::Angelscript),
    };
    let hits = snapshot.find_types("APawn", false, &filter, None, 10);
    assert_eq!(hits.len(), 1);

    let hits = snapshot.find_types("EPawnState", false, &LookupFilter::default(), Some(TypeKind::Class), 10);
    assert!(hits.is_empty());
}

#[test]
fn test_member_lookup_and_owner_scope() {
    let index = loaded_index();
    let snapshot = index.snapshot();
    let hits = snapshot.find_members(
        "BeginPlay",
        false,
        &LookupFilter::default(),
        None,
        None,
        10,
    );
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.owner, "AActor");

    let owner_scoped = snapshot.find_members(
        "",
        false,
        &LookupFilter::default(),
        Some("AActor"),
        Some(MemberKind::Property),
        10,
    );
    assert_eq!(owner_scoped.len(), 1);
    assert_eq!(owner_scoped[0].entry.name, "bHidden");
}

#[test]
fn test_children_bfs_recursive() {
    let index = loaded_index();
    let snapshot = index.snapshot();
    let direct = snapshot.find_children("UObject", false, &LookupFilter::default(), 10);
    assert_eq!(direct.len(), 1);
    assert_eq!(direct[0].entry.name, "AActor");

    let recursive = snapshot.find_children("UObject", true, &LookupFilter::default(), 10);
    let names: Vec<&str> = recursive.iter().map(|h| h.entry.name.as_str()).collect();
    assert_eq!(names, vec!["AActor", "APawn"]);
}

#[test]
fn test_children_bfs_survives_cycles() {
    // degenerate data: forward-declared bases resolving to each other
    let data = LoadedData {
        files: vec![file(1, "/ws/A.h", "Game", Language::Cpp)],
        types: vec![
            type_decl(1, 1, "Alpha", TypeKind::Class, Some("Beta")),
            type_decl(2, 1, "Beta", TypeKind::Class, Some("Alpha")),
        ],
        members: vec![],
        assets: vec![],
    };
    let index = MemoryIndex::new();
    index.load(&data);
    let snapshot = index.snapshot();
    let children = snapshot.find_children("Alpha", true, &LookupFilter::default(), 10);
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].entry.name, "Beta");
}

#[test]
fn test_patch_equals_rebuild() {
    // apply an incremental diff, then rebuild from the same final state;
    // every lookup must agree
    let index = MemoryIndex::new();
    index.load(&sample_data());

    // replace file 3 and add file 4
    let new_file_3 = file(3, "/ws/Game/Scripts/Pawn.as", "Game", Language::Angelscript);
    let new_file_4 = file(4, "/ws/Game/Scripts/Turret.as", "Game", Language::Angelscript);
    index.ingest_diff(
        &[3],
        &[
            IndexedFile {
                file: new_file_3.clone(),
                types: vec![type_decl(5, 3, "APawn", TypeKind::Class, Some("AActor"))],
                members: vec![member(4, 3, "APawn", "Possess", MemberKind::Function, 9)],
            },
            IndexedFile {
                file: new_file_4.clone(),
                types: vec![type_decl(6, 4, "ATurret", TypeKind::Class, Some("AActor"))],
                members: vec![],
            },
        ],
        &[1],
        &[],
    );

    let mut rebuilt_data = sample_data();
    rebuilt_data.files.retain(|f| f.id != 3);
    rebuilt_data.files.push(new_file_3);
    rebuilt_data.files.push(new_file_4);
    rebuilt_data.types.retain(|t| t.file_id != 3);
    rebuilt_data
        .types
        .push(type_decl(5, 3, "APawn", TypeKind::Class, Some("AActor")));
    rebuilt_data
        .types
        .push(type_decl(6, 4, "ATurret", TypeKind::Class, Some("AActor")));
    rebuilt_data.members.retain(|m| m.file_id != 3);
    rebuilt_data
        .members
        .push(member(4, 3, "APawn", "Possess", MemberKind::Function, 9));
    rebuilt_data.assets.retain(|a| a.id != 1);
    let rebuilt = MemoryIndex::new();
    rebuilt.load(&rebuilt_data);

    let patched_snapshot = index.snapshot();
    let rebuilt_snapshot = rebuilt.snapshot();
    assert_eq!(patched_snapshot.type_count(), rebuilt_snapshot.type_count());
    assert_eq!(
        patched_snapshot.member_count(),
        rebuilt_snapshot.member_count()
    );
    assert_eq!(patched_snapshot.asset_count(), rebuilt_snapshot.asset_count());

    for query in ["AActor", "APawn", "ATurret", "EPawnState"] {
        let a = patched_snapshot.find_types(query, true, &LookupFilter::default(), None, 10);
        let b = rebuilt_snapshot.find_types(query, true, &LookupFilter::default(), None, 10);
        assert_eq!(a.len(), b.len(), "result count for {query}");
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.entry.id, y.entry.id, "ids for {query}");
            assert_eq!(x.score, y.score, "scores for {query}");
        }
    }
    let a = patched_snapshot.find_children("AActor", true, &LookupFilter::default(), 10);
    let b = rebuilt_snapshot.find_children("AActor", true, &LookupFilter::default(), 10);
    assert_eq!(
        a.iter().map(|h| h.entry.id).collect::<Vec<_>>(),
        b.iter().map(|h| h.entry.id).collect::<Vec<_>>()
    );
}

#[test]
fn test_old_snapshots_remain_readable_after_patch() {
    let index = loaded_index();
    let before = index.snapshot();
    index.ingest_diff(&[3], &[], &[], &[]);
    let after = index.snapshot();
    // the pre-patch snapshot still answers from the old state
    assert_eq!(
        before
            .find_types("APawn", false, &LookupFilter::default(), None, 10)
            .len(),
        1
    );
    assert!(after
        .find_types("APawn", false, &LookupFilter::default(), None, 10)
        .is_empty());
}

#[test]
fn test_find_files_by_basename() {
    let index = loaded_index();
    let snapshot = index.snapshot();
    let hits = snapshot.find_files("actor.h", &LookupFilter::default(), 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "/ws/Engine/Public/Actor.h");

    // prefix match
    let hits = snapshot.find_files("actor", &LookupFilter::default(), 10);
    assert_eq!(hits.len(), 2);
}

#[test]
fn test_browse_and_list_modules() {
    let index = loaded_index();
    let snapshot = index.snapshot();
    let (types, files) = snapshot.browse_module("Engine");
    assert_eq!(types.len(), 1); // header/impl dedup
    assert_eq!(files.len(), 2); // header and implementation

    let (types, files) = snapshot.browse_module("Engine.ws.Engine.Public");
    assert_eq!(types.len(), 1);
    assert_eq!(files.len(), 1);

    let roots = snapshot.list_modules("", 1);
    let names: Vec<&str> = roots.iter().map(|(m, _)| m.as_str()).collect();
    assert!(names.contains(&"Engine"));
    assert!(names.contains(&"Game"));
}

#[test]
fn test_asset_queries() {
    let index = loaded_index();
    let snapshot = index.snapshot();

    // fuzzy substring with prefix preference
    let hits = snapshot.find_assets("bp_", true, None, None, 10);
    assert_eq!(hits.len(), 2);
    let hits = snapshot.find_assets("grunt", true, None, None, 10);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entry.name, "BP_Grunt");

    // exact mode
    let hits = snapshot.find_assets("BP_Player", false, None, None, 10);
    assert_eq!(hits.len(), 1);
    let hits = snapshot.find_assets("bp_", false, None, None, 10);
    assert!(hits.is_empty());

    // folder browsing
    let direct = snapshot.browse_assets("/Game/Blueprints", false, 10);
    assert_eq!(direct.len(), 1);
    let recursive = snapshot.browse_assets("/Game/Blueprints", true, 10);
    assert_eq!(recursive.len(), 2);

    let folders = snapshot.list_asset_folders("/Game/Blueprints");
    assert_eq!(folders.len(), 1);
    assert_eq!(folders[0].0, "/Game/Blueprints/Enemies");

    let (total, by_class, _) = snapshot.asset_stats();
    assert_eq!(total, 2);
    assert_eq!(*by_class.get("Blueprint").unwrap(), 2);
}
