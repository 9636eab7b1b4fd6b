//! Shared test utilities for integration tests
//!
//! Serializes environment mutation and builds filesystem fixtures and catalogs for
//! reconciliation tests.

use scout::reconcile::{PassSummary, Reconciler};
use scout::store::SledCatalog;
use scout::tree::hasher::HashEngine;
use scout::tree::path;
use scout::tree::walker::Walker;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

/// Global mutex to serialize environment variable access across all tests
static ENV_MUTEX: Mutex<()> = Mutex::new(());

/// Environment variable state to restore after test
struct EnvState {
    home: Option<String>,
    xdg_config_home: Option<String>,
}

impl EnvState {
    fn capture() -> Self {
        Self {
            home: std::env::var("HOME").ok(),
            xdg_config_home: std::env::var("XDG_CONFIG_HOME").ok(),
        }
    }

    fn restore(self) {
        match self.home {
            Some(orig) => std::env::set_var("HOME", orig),
            None => std::env::remove_var("HOME"),
        }
        match self.xdg_config_home {
            Some(orig) => std::env::set_var("XDG_CONFIG_HOME", orig),
            None => std::env::remove_var("XDG_CONFIG_HOME"),
        }
    }
}

/// Run `f` with HOME and XDG_CONFIG_HOME pointed into `test_dir`.
///
/// Holds a global lock for the duration so parallel tests never observe each other's
/// environment, and restores the original values afterwards.
pub fn with_xdg_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let env_state = EnvState::capture();

    let test_config_home = test_dir.path().join("config");
    let test_home = test_dir.path().join("home");
    std::fs::create_dir_all(&test_config_home).unwrap();
    std::fs::create_dir_all(&test_home).unwrap();

    std::env::set_var("HOME", test_home.to_str().unwrap());
    std::env::set_var("XDG_CONFIG_HOME", test_config_home.to_str().unwrap());

    let result = f();

    env_state.restore();
    result
}

/// A scratch directory tree with a canonical root named `root`.
pub struct Fixture {
    _dir: TempDir,
    pub root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("root")).unwrap();
        let root = path::canonicalize_root(&dir.path().join("root")).unwrap();
        Self { _dir: dir, root }
    }

    pub fn mkdir(&self, relative: &str) -> PathBuf {
        let path = self.root.join(relative);
        std::fs::create_dir_all(&path).unwrap();
        path
    }

    pub fn write(&self, relative: &str, content: &[u8]) -> PathBuf {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    pub fn path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Catalog path of a location below the root, e.g. `a/d` -> `/root/a/d`.
    pub fn catalog_path(&self, relative: &str) -> String {
        if relative.is_empty() {
            "/root".to_string()
        } else {
            format!("/root/{}", relative)
        }
    }
}

/// Run one reconciliation pass over the fixture.
pub fn sync(store: &SledCatalog, engine: &HashEngine, root: &Path) -> PassSummary {
    let walker = Walker::new(root.to_path_buf());
    Reconciler::new(store, engine).run(walker.entries()).unwrap()
}
