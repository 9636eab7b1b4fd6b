//! End-to-end reconciliation scenarios against real directory trees

use crate::integration::test_utils::{sync, Fixture};
use filetime::{set_file_mtime, FileTime};
use scout::query::CatalogQuery;
use scout::reconcile::{CancelToken, ReconcileOptions, Reconciler};
use scout::store::{CatalogStore, ClosureRow, SledCatalog};
use scout::tree::hasher::{HashAlgorithm, HashEngine};
use scout::tree::walker::{ScanEntry, Walker};
use scout::types::{DirId, EntryKind, EntryRef};
use std::collections::HashSet;
use std::fs;

fn dir_id(store: &SledCatalog, catalog_path: &str) -> DirId {
    match CatalogQuery::new(store).resolve_path(catalog_path).unwrap() {
        Some(EntryRef::Directory(id)) => id,
        other => panic!("{} should be a directory, got {:?}", catalog_path, other),
    }
}

fn rows(store: &SledCatalog, dir: DirId) -> HashSet<(DirId, DirId, u32)> {
    store
        .ancestor_rows(dir)
        .unwrap()
        .into_iter()
        .map(|row: ClosureRow| (row.descendant, row.ancestor, row.depth))
        .collect()
}

fn synthetic(path: &str, kind: EntryKind, size: u64) -> ScanEntry {
    ScanEntry {
        path: path.to_string(),
        source: std::env::temp_dir().join("scout-synthetic-entry"),
        kind,
        size,
        mtime_ns: 1,
        identity: None,
    }
}

#[test]
fn test_initial_scan_builds_closure_rows() {
    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    let entries = vec![
        Ok(synthetic("/a", EntryKind::Directory, 0)),
        Ok(synthetic("/a/b", EntryKind::Directory, 0)),
        Ok(synthetic("/a/d", EntryKind::Directory, 0)),
    ];
    let summary = Reconciler::new(&store, &engine).run(entries).unwrap();
    assert_eq!(summary.directories_created, 3);

    let a = dir_id(&store, "/a");
    let b = dir_id(&store, "/a/b");
    let d = dir_id(&store, "/a/d");
    assert_eq!(rows(&store, a), HashSet::from([(a, a, 0)]));
    assert_eq!(rows(&store, b), HashSet::from([(b, a, 1), (b, b, 0)]));
    assert_eq!(rows(&store, d), HashSet::from([(d, a, 1), (d, d, 0)]));

    let query = CatalogQuery::new(&store);
    let children: Vec<DirId> = query.list_children(a).unwrap().iter().map(|r| r.id).collect();
    assert_eq!(children, vec![b, d]);
    assert_eq!(query.materialize_path(d).unwrap(), "/a/d");
}

#[test]
fn test_scan_of_real_tree() {
    let fixture = Fixture::new();
    fixture.mkdir("a/b/c");
    fixture.mkdir("a/d");
    fixture.write("a/e.txt", b"fourteen bytes");

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    let summary = sync(&store, &engine, &fixture.root);
    assert!(summary.is_clean(), "{:?}", summary.failures);
    assert_eq!(summary.directories_created, 5);
    assert_eq!(summary.files_created, 1);
    assert_eq!(summary.hashes_computed, 1);

    let query = CatalogQuery::new(&store);
    let a = dir_id(&store, &fixture.catalog_path("a"));
    let names: Vec<String> = query.list_children(a).unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec!["b", "d"]);

    let d = dir_id(&store, &fixture.catalog_path("a/d"));
    assert_eq!(query.materialize_path(d).unwrap(), "/root/a/d");

    let files = query.list_files(a).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].name, "e.txt");
    assert_eq!(files[0].size, 14);
    assert_eq!(
        files[0].content_hash.as_deref(),
        Some(blake3::hash(b"fourteen bytes").to_hex().as_str())
    );
    assert_eq!(files[0].hash_algorithm, Some(HashAlgorithm::Blake3));
    assert!(store.verify_integrity().unwrap().is_ok());
}

#[test]
fn test_second_pass_without_changes_hashes_nothing() {
    let fixture = Fixture::new();
    fixture.write("docs/one.txt", b"one");
    fixture.write("docs/two.txt", b"two");
    fixture.write("three.txt", b"three");

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Sha256);
    let first = sync(&store, &engine, &fixture.root);
    assert_eq!(first.hashes_computed, 3);
    let after_first = engine.computations();

    let second = sync(&store, &engine, &fixture.root);
    assert_eq!(engine.computations(), after_first);
    assert_eq!(second.hashes_computed, 0);
    assert_eq!(second.files_unchanged, 3);
    assert_eq!(second.directories_created, 0);
    assert!(second.is_clean());
}

#[test]
fn test_modified_file_is_rehashed() {
    let fixture = Fixture::new();
    let file = fixture.write("notes.txt", b"draft");
    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    sync(&store, &engine, &fixture.root);

    fs::write(&file, b"final version").unwrap();
    set_file_mtime(&file, FileTime::from_unix_time(1_700_000_000, 0)).unwrap();
    let summary = sync(&store, &engine, &fixture.root);
    assert_eq!(summary.files_updated, 1);
    assert_eq!(summary.hashes_computed, 1);

    let record = CatalogQuery::new(&store)
        .list_files(dir_id(&store, "/root"))
        .unwrap()
        .remove(0);
    assert_eq!(record.size, 13);
    assert_eq!(record.mtime_ns, 1_700_000_000_000_000_000);
    assert_eq!(
        record.content_hash.as_deref(),
        Some(blake3::hash(b"final version").to_hex().as_str())
    );
}

#[test]
fn test_touch_without_content_change_is_rehashed_to_same_digest() {
    let fixture = Fixture::new();
    let file = fixture.write("same.txt", b"unchanged");
    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_000, 0)).unwrap();

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Md5);
    sync(&store, &engine, &fixture.root);
    let before = store.all_files().unwrap().remove(0);

    set_file_mtime(&file, FileTime::from_unix_time(1_600_000_100, 0)).unwrap();
    let summary = sync(&store, &engine, &fixture.root);
    assert_eq!(summary.hashes_computed, 1);
    let after = store.all_files().unwrap().remove(0);
    assert_eq!(after.id, before.id);
    assert_eq!(after.content_hash, before.content_hash);
    assert_ne!(after.mtime_ns, before.mtime_ns);
}

#[test]
fn test_deleted_directory_cascades() {
    let fixture = Fixture::new();
    fixture.write("keep/a.txt", b"a");
    fixture.write("drop/inner/b.txt", b"b");
    fixture.write("drop/c.txt", b"c");

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    sync(&store, &engine, &fixture.root);
    let dropped = dir_id(&store, "/root/drop");
    let inner = dir_id(&store, "/root/drop/inner");

    fs::remove_dir_all(fixture.path("drop")).unwrap();
    let summary = sync(&store, &engine, &fixture.root);
    assert_eq!(summary.directories_removed, 2);
    assert_eq!(summary.files_removed, 2);

    assert!(store.get_directory(dropped).unwrap().is_none());
    assert!(store.get_directory(inner).unwrap().is_none());
    assert!(store.ancestor_rows(inner).unwrap().is_empty());
    let stats = store.stats().unwrap();
    assert_eq!(stats.directories, 2);
    assert_eq!(stats.files, 1);
    // root (1 row) + keep (2 rows)
    assert_eq!(stats.closure_rows, 3);
    assert!(store.verify_integrity().unwrap().is_ok());
}

#[test]
fn test_deleted_file_is_removed() {
    let fixture = Fixture::new();
    fixture.write("a.txt", b"a");
    let gone = fixture.write("b.txt", b"b");

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    sync(&store, &engine, &fixture.root);
    fs::remove_file(gone).unwrap();

    let summary = sync(&store, &engine, &fixture.root);
    assert_eq!(summary.files_removed, 1);
    let query = CatalogQuery::new(&store);
    assert_eq!(query.resolve_path("/root/b.txt").unwrap(), None);
    assert!(query.resolve_path("/root/a.txt").unwrap().is_some());
}

#[cfg(unix)]
#[test]
fn test_rename_is_detected_as_move() {
    let fixture = Fixture::new();
    fixture.mkdir("a/b/deep");
    fixture.mkdir("a/d");
    fixture.write("a/b/deep/data.bin", b"payload");

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    sync(&store, &engine, &fixture.root);
    let a = dir_id(&store, "/root/a");
    let b = dir_id(&store, "/root/a/b");
    let d = dir_id(&store, "/root/a/d");
    let deep = dir_id(&store, "/root/a/b/deep");
    let hashed = engine.computations();

    fs::rename(fixture.path("a/b"), fixture.path("a/d/b")).unwrap();
    let summary = sync(&store, &engine, &fixture.root);
    assert!(summary.is_clean(), "{:?}", summary.failures);
    assert_eq!(summary.directories_moved, 1);
    assert_eq!(summary.directories_created, 0);
    assert_eq!(summary.directories_removed, 0);
    assert_eq!(engine.computations(), hashed, "moved file keeps its hash");

    let query = CatalogQuery::new(&store);
    assert_eq!(query.materialize_path(b).unwrap(), "/root/a/d/b");
    assert_eq!(query.materialize_path(deep).unwrap(), "/root/a/d/b/deep");
    let b_rows = rows(&store, b);
    assert!(!b_rows.contains(&(b, a, 1)));
    assert!(b_rows.contains(&(b, d, 1)));
    assert!(b_rows.contains(&(b, a, 2)));
    assert!(store.verify_integrity().unwrap().is_ok());
}

#[cfg(unix)]
#[test]
fn test_file_rename_keeps_record() {
    let fixture = Fixture::new();
    fixture.write("old.txt", b"contents");

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    sync(&store, &engine, &fixture.root);
    let before = store.all_files().unwrap().remove(0);

    fs::rename(fixture.path("old.txt"), fixture.path("new.txt")).unwrap();
    let summary = sync(&store, &engine, &fixture.root);
    assert_eq!(summary.files_moved, 1);
    assert_eq!(summary.files_removed, 0);
    assert_eq!(summary.hashes_computed, 0);

    let after = store.all_files().unwrap();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].id, before.id);
    assert_eq!(after[0].name, "new.txt");
    assert_eq!(after[0].content_hash, before.content_hash);
}

#[test]
fn test_names_differing_only_by_case_are_distinct() {
    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    let entries = vec![
        Ok(synthetic("/top", EntryKind::Directory, 0)),
        Ok(synthetic("/top/Readme", EntryKind::Directory, 0)),
        Ok(synthetic("/top/README", EntryKind::Directory, 0)),
    ];
    let summary = Reconciler::new(&store, &engine).run(entries).unwrap();
    assert_eq!(summary.directories_created, 3);
    let top = dir_id(&store, "/top");
    assert_eq!(CatalogQuery::new(&store).list_children(top).unwrap().len(), 2);
}

#[test]
fn test_cancelled_pass_can_be_resumed() {
    let fixture = Fixture::new();
    fixture.write("a/1.txt", b"1");
    fixture.write("b/2.txt", b"2");

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    let cancel = CancelToken::new();
    let options = ReconcileOptions {
        hash_workers: 2,
        cancel: cancel.clone(),
    };

    // Cancel after the first three entries have been handed out.
    let walker = Walker::new(fixture.root.clone());
    let mut handed_out = 0;
    let entries = walker.entries().inspect(|_| {
        handed_out += 1;
        if handed_out == 3 {
            cancel.cancel();
        }
    });
    let summary = Reconciler::with_options(&store, &engine, options)
        .run(entries)
        .unwrap();
    assert!(summary.cancelled);
    assert!(!summary.is_clean());
    assert_eq!(summary.hashes_computed, 0);
    assert!(store.verify_integrity().unwrap().is_ok());

    let resumed = sync(&store, &engine, &fixture.root);
    assert!(resumed.is_clean());
    let stats = store.stats().unwrap();
    assert_eq!(stats.directories, 3);
    assert_eq!(stats.files, 2);
    assert_eq!(stats.unhashed_files, 0);
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_is_retried_next_pass() {
    use std::os::unix::fs::PermissionsExt;

    let fixture = Fixture::new();
    let locked = fixture.write("locked.txt", b"secret");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::read(&locked).is_ok() {
        // Running with privileges that ignore permission bits.
        return;
    }

    let store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    let first = sync(&store, &engine, &fixture.root);
    assert_eq!(first.files_created, 1);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].kind, "io");
    assert_eq!(store.stats().unwrap().unhashed_files, 1);

    fs::set_permissions(&locked, fs::Permissions::from_mode(0o644)).unwrap();
    let second = sync(&store, &engine, &fixture.root);
    assert!(second.is_clean());
    assert_eq!(second.hashes_computed, 1);
    assert_eq!(store.stats().unwrap().unhashed_files, 0);
}

#[test]
fn test_parallel_hashing_matches_serial() {
    let fixture = Fixture::new();
    for i in 0..24 {
        fixture.write(&format!("batch/file_{:02}.dat", i), format!("content {}", i).as_bytes());
    }

    let serial_store = SledCatalog::temporary().unwrap();
    let parallel_store = SledCatalog::temporary().unwrap();
    let engine = HashEngine::new(HashAlgorithm::Blake3);
    let walker = Walker::new(fixture.root.clone());

    let serial = ReconcileOptions {
        hash_workers: 1,
        ..ReconcileOptions::default()
    };
    let parallel = ReconcileOptions {
        hash_workers: 4,
        ..ReconcileOptions::default()
    };
    Reconciler::with_options(&serial_store, &engine, serial)
        .run(walker.entries())
        .unwrap();
    Reconciler::with_options(&parallel_store, &engine, parallel)
        .run(walker.entries())
        .unwrap();

    let digests = |store: &SledCatalog| {
        let mut files: Vec<(String, Option<String>)> = store
            .all_files()
            .unwrap()
            .into_iter()
            .map(|f| (f.name, f.content_hash))
            .collect();
        files.sort();
        files
    };
    assert_eq!(digests(&serial_store), digests(&parallel_store));
    assert_eq!(serial_store.stats().unwrap().unhashed_files, 0);
}
