//! Closure relation invariants across structural operations on a persistent catalog

use scout::error::CatalogError;
use scout::query::CatalogQuery;
use scout::store::{CatalogStore, SledCatalog};
use scout::types::DirId;
use tempfile::TempDir;

/// Depth of every directory equals its ancestor count minus one, and chains are contiguous.
fn assert_complete(store: &SledCatalog, dir: DirId, expected_depth: u32) {
    let chain = CatalogQuery::new(store).list_ancestors(dir).unwrap();
    assert_eq!(chain.len() as u32, expected_depth + 1);
    for (i, entry) in chain.iter().enumerate() {
        assert_eq!(entry.depth, expected_depth - i as u32);
    }
    assert_eq!(chain.last().unwrap().record.id, dir);
}

#[test]
fn test_closure_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let location = temp_dir.path().join("catalog");
    let (root, leaf) = {
        let store = SledCatalog::open(&location).unwrap();
        let root = store.create_directory(None, "vault").unwrap().id;
        let mid = store.create_directory(Some(root), "2024").unwrap().id;
        let leaf = store.create_directory(Some(mid), "raw").unwrap().id;
        store.close().unwrap();
        (root, leaf)
    };

    let store = SledCatalog::open(&location).unwrap();
    assert_complete(&store, leaf, 2);
    let query = CatalogQuery::new(&store);
    assert_eq!(query.materialize_path(leaf).unwrap(), "/vault/2024/raw");
    assert_eq!(query.list_descendants(root, None).unwrap().len(), 2);
    assert_eq!(store.schema_version().unwrap(), 2);
    assert!(store.verify_integrity().unwrap().is_ok());
}

#[test]
fn test_move_rewrites_only_the_chain_above() {
    let store = SledCatalog::temporary().unwrap();
    let a = store.create_directory(None, "a").unwrap().id;
    let b = store.create_directory(Some(a), "b").unwrap().id;
    let c = store.create_directory(Some(b), "c").unwrap().id;
    let x = store.create_directory(Some(c), "x").unwrap().id;
    let p = store.create_directory(None, "p").unwrap().id;
    let q = store.create_directory(Some(p), "q").unwrap().id;

    let query = CatalogQuery::new(&store);
    let below_before: Vec<(DirId, u32)> = query
        .list_ancestors(x)
        .unwrap()
        .iter()
        .filter(|e| e.depth <= 2)
        .map(|e| (e.record.id, e.depth))
        .collect();

    store.move_directory(b, q).unwrap();

    let after = query.list_ancestors(x).unwrap();
    let below_after: Vec<(DirId, u32)> = after
        .iter()
        .filter(|e| e.depth <= 2)
        .map(|e| (e.record.id, e.depth))
        .collect();
    assert_eq!(below_before, below_after);
    let above: Vec<(DirId, u32)> = after
        .iter()
        .filter(|e| e.depth > 2)
        .map(|e| (e.record.id, e.depth))
        .collect();
    assert_eq!(above, vec![(p, 4), (q, 3)]);
    assert_eq!(query.materialize_path(x).unwrap(), "/p/q/b/c/x");
    assert!(query.list_children(a).unwrap().is_empty());
    assert!(store.verify_integrity().unwrap().is_ok());
}

#[test]
fn test_failed_operations_leave_no_trace() {
    let store = SledCatalog::temporary().unwrap();
    let a = store.create_directory(None, "a").unwrap().id;
    let b = store.create_directory(Some(a), "b").unwrap().id;
    let c = store.create_directory(Some(b), "c").unwrap().id;
    store.create_directory(Some(c), "b").unwrap();
    let before = store.stats().unwrap();

    assert!(matches!(
        store.move_directory(a, c),
        Err(CatalogError::Cycle { .. })
    ));
    assert!(matches!(
        store.move_directory(b, b),
        Err(CatalogError::Cycle { .. })
    ));
    assert!(matches!(
        store.create_directory(Some(a), "b"),
        Err(CatalogError::InvariantViolation(_))
    ));
    // The cycle is reported before the name clash with c/b
    assert!(matches!(
        store.relocate_directory(b, c, "b"),
        Err(CatalogError::Cycle { .. })
    ));
    let d = store.create_directory(Some(a), "d").unwrap().id;
    store.move_directory(d, c).unwrap();
    let e = store.create_directory(Some(a), "b2").unwrap().id;
    assert!(matches!(
        store.relocate_directory(e, c, "d"),
        Err(CatalogError::InvariantViolation(_))
    ));

    let after = store.stats().unwrap();
    assert_eq!(after.directories, before.directories + 2);
    assert!(store.verify_integrity().unwrap().is_ok());
}

#[test]
fn test_deep_chain_lookup_is_complete() {
    let store = SledCatalog::temporary().unwrap();
    let mut current = store.create_directory(None, "level0").unwrap().id;
    let top = current;
    for depth in 1..=40u32 {
        current = store
            .create_directory(Some(current), &format!("level{}", depth))
            .unwrap()
            .id;
    }
    assert_complete(&store, current, 40);

    let removal = store.delete_directory_subtree(top).unwrap();
    assert_eq!(removal.directories, 41);
    // 41 * 42 / 2 rows in a single chain
    assert_eq!(removal.closure_rows, 861);
    assert_eq!(store.stats().unwrap().closure_rows, 0);
    assert!(store.root_directories().unwrap().is_empty());
}

#[test]
fn test_two_catalogs_coexist() {
    let first = SledCatalog::temporary().unwrap();
    let second = SledCatalog::temporary().unwrap();
    first.create_directory(None, "only-here").unwrap();
    assert_eq!(first.stats().unwrap().directories, 1);
    assert_eq!(second.stats().unwrap().directories, 0);
}
