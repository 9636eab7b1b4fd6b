//! CLI route tests: parse real argument vectors and run them through RunContext

use crate::integration::test_utils::{with_xdg_env, Fixture};
use clap::Parser;
use scout::cli::{command_root, Cli, RunContext};
use scout::error::ApiError;
use tempfile::TempDir;

fn run(args: &[&str]) -> Result<String, ApiError> {
    let cli = Cli::try_parse_from(args).unwrap();
    let context = RunContext::new(command_root(&cli), cli.catalog.clone(), cli.config.clone())?;
    context.execute(&cli.command)
}

fn populated() -> Fixture {
    let fixture = Fixture::new();
    fixture.write("a/b/c/deep.txt", b"deep");
    fixture.mkdir("a/d");
    fixture.write("a/e.txt", b"fourteen bytes");
    fixture
}

#[test]
fn test_init_then_sync_then_query() {
    let env_dir = TempDir::new().unwrap();
    let fixture = populated();
    let root = fixture.root.to_str().unwrap().to_string();

    with_xdg_env(&env_dir, || {
        let out = run(&["scout", "init", &root]).unwrap();
        assert!(out.contains("Initialized scout catalog"));
        assert!(fixture.path(".scout/config.toml").exists());
        assert!(fixture.path(".scout/catalog").exists());

        let out = run(&["scout", "--root", &root, "sync", "--format", "json"]).unwrap();
        let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(summary["directories_created"], 5);
        assert_eq!(summary["files_created"], 2);
        assert_eq!(summary["hashes_computed"], 2);
        assert_eq!(summary["cancelled"], false);

        let out = run(&["scout", "--root", &root, "path", "a/d"]).unwrap();
        assert!(out.starts_with("/root/a/d\td"));

        let out = run(&["scout", "--root", &root, "path", "a/e.txt", "--format", "json"]).unwrap();
        let entry: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(entry["path"], "/root/a/e.txt");
        assert_eq!(entry["kind"], "file");

        let out = run(&["scout", "--root", &root, "ls", "a", "--format", "json"]).unwrap();
        let listing: serde_json::Value = serde_json::from_str(&out).unwrap();
        let dirs: Vec<&str> = listing["directories"]
            .as_array()
            .unwrap()
            .iter()
            .map(|d| d["name"].as_str().unwrap())
            .collect();
        assert_eq!(dirs, vec!["b", "d"]);
        assert_eq!(listing["files"][0]["name"], "e.txt");
        assert_eq!(listing["files"][0]["size"], 14);

        let out = run(&["scout", "--root", &root, "tree", "--max-depth", "2"]).unwrap();
        assert_eq!(out, "/root\n  a/\n    b/\n    d/");

        let out = run(&["scout", "--root", &root, "ancestors", "a/b/c", "--format", "json"]).unwrap();
        let chain: serde_json::Value = serde_json::from_str(&out).unwrap();
        let names: Vec<&str> = chain
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["root", "a", "b", "c"]);

        let digest = blake3::hash(b"deep").to_hex().to_string();
        let out = run(&["scout", "--root", &root, "find", "--hash", &digest]).unwrap();
        assert_eq!(out, "/root/a/b/c/deep.txt");

        let out = run(&["scout", "--root", &root, "find", "--unhashed"]).unwrap();
        assert_eq!(out, "No matching files.");

        let out = run(&["scout", "--root", &root, "status", "--format", "json"]).unwrap();
        let status: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(status["stats"]["directories"], 5);
        assert_eq!(status["stats"]["files"], 2);
        assert_eq!(status["schema_version"], 2);

        let out = run(&["scout", "--root", &root, "check"]).unwrap();
        assert!(out.starts_with("Integrity check passed"));
    });
}

#[test]
fn test_sync_picks_up_changes() {
    let env_dir = TempDir::new().unwrap();
    let fixture = populated();
    let root = fixture.root.to_str().unwrap().to_string();

    with_xdg_env(&env_dir, || {
        run(&["scout", "init", &root]).unwrap();
        run(&["scout", "--root", &root, "sync"]).unwrap();

        std::fs::remove_dir_all(fixture.path("a/b")).unwrap();
        fixture.write("a/d/new.txt", b"new");
        let out = run(&["scout", "--root", &root, "sync", "--format", "json", "--workers", "2"]).unwrap();
        let summary: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(summary["directories_removed"], 2);
        assert_eq!(summary["files_removed"], 1);
        assert_eq!(summary["files_created"], 1);
        assert_eq!(summary["files_unchanged"], 1);

        let err = run(&["scout", "--root", &root, "path", "a/b"]).unwrap_err();
        assert!(matches!(err, ApiError::PathNotInCatalog(_)));
    });
}

#[test]
fn test_commands_require_an_initialized_catalog() {
    let env_dir = TempDir::new().unwrap();
    let fixture = populated();
    let root = fixture.root.to_str().unwrap().to_string();

    with_xdg_env(&env_dir, || {
        let err = run(&["scout", "--root", &root, "status"]).unwrap_err();
        assert!(matches!(err, ApiError::CatalogMissing(_)));

        run(&["scout", "init", &root]).unwrap();
        let err = run(&["scout", "init", &root]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
        let out = run(&["scout", "init", &root, "--force"]).unwrap();
        assert!(out.starts_with("Re-initialized scout catalog"));
    });
}

#[test]
fn test_paths_outside_root_are_rejected() {
    let env_dir = TempDir::new().unwrap();
    let fixture = populated();
    let root = fixture.root.to_str().unwrap().to_string();
    let outside = env_dir.path().to_str().unwrap().to_string();

    with_xdg_env(&env_dir, || {
        run(&["scout", "init", &root]).unwrap();
        run(&["scout", "--root", &root, "sync"]).unwrap();

        let err = run(&["scout", "--root", &root, "path", &outside]).unwrap_err();
        assert!(matches!(err, ApiError::Catalog(scout::error::CatalogError::InvalidPath(_))));
        let err = run(&["scout", "--root", &root, "ls", "../elsewhere"]).unwrap_err();
        assert!(matches!(err, ApiError::Catalog(scout::error::CatalogError::InvalidPath(_))));
        let err = run(&["scout", "--root", &root, "ls", "a/e.txt"]).unwrap_err();
        assert!(matches!(err, ApiError::InvalidArgument(_)));
    });
}

#[test]
fn test_custom_catalog_location() {
    let env_dir = TempDir::new().unwrap();
    let catalog_dir = TempDir::new().unwrap();
    let fixture = populated();
    let root = fixture.root.to_str().unwrap().to_string();
    let catalog = catalog_dir.path().join("elsewhere");
    let catalog = catalog.to_str().unwrap();

    with_xdg_env(&env_dir, || {
        run(&["scout", "--catalog", catalog, "init", &root]).unwrap();
        assert!(!fixture.path(".scout/catalog").exists());
        run(&["scout", "--root", &root, "--catalog", catalog, "sync"]).unwrap();
        let out = run(&["scout", "--root", &root, "--catalog", catalog, "status", "--format", "json"])
            .unwrap();
        let status: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(status["stats"]["files"], 2);
    });
}

#[test]
fn test_sync_never_scans_its_own_catalog() {
    let env_dir = TempDir::new().unwrap();
    let fixture = populated();
    fixture.write(".scout/config.toml", b"[scan]\nignore_patterns = [\"node_modules\"]\n");
    let root = fixture.root.to_str().unwrap().to_string();
    let inside = fixture.path("db").to_str().unwrap().to_string();

    with_xdg_env(&env_dir, || {
        for catalog in [None, Some(inside.as_str())] {
            let mut base = vec!["scout"];
            if let Some(catalog) = catalog {
                base.extend(["--catalog", catalog]);
            }
            let command = |extra: &[&'static str]| {
                let mut args = base.clone();
                args.extend(["--root", root.as_str()]);
                args.extend_from_slice(extra);
                run(&args)
            };
            command(&["init", "--force"]).unwrap();

            let first: serde_json::Value =
                serde_json::from_str(&command(&["sync", "--format", "json"]).unwrap()).unwrap();
            assert_eq!(first["files_created"], 2, "catalog files must not be catalogued");
            let second: serde_json::Value =
                serde_json::from_str(&command(&["sync", "--format", "json"]).unwrap()).unwrap();
            assert_eq!(second["hashes_computed"], 0);
            assert_eq!(second["files_updated"], 0);
        }
    });
}
