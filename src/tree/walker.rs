//! Filesystem walker feeding the reconciler
//!
//! Yields the scan root first and every directory before its contents, in file-name order.
//! Unreadable entries come out as [`WalkError`] items instead of being dropped.

use crate::config::STATE_DIR;
use crate::tree::path;
use crate::types::{EntryKind, IdentityToken};
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use thiserror::Error;
use walkdir::{DirEntry, WalkDir};

/// One filesystem entry as observed during a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanEntry {
    /// Catalog path, e.g. `/photos/2024`.
    pub path: String,
    /// Absolute filesystem path the entry was read from.
    pub source: PathBuf,
    pub kind: EntryKind,
    pub size: u64,
    pub mtime_ns: i64,
    pub identity: Option<IdentityToken>,
}

/// An entry the walker could not read or map.
#[derive(Debug, Error)]
#[error("Failed to walk {}: {message}", display_location(.path))]
pub struct WalkError {
    pub path: Option<PathBuf>,
    pub message: String,
}

fn display_location(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => path.display().to_string(),
        None => "<unknown>".to_string(),
    }
}

/// Filesystem walker configuration
#[derive(Debug, Clone)]
pub struct WalkerConfig {
    /// Follow symbolic links (default: false; unfollowed links are skipped)
    pub follow_symlinks: bool,
    /// Entry names to skip together with everything below them
    pub ignore_patterns: Vec<String>,
    /// Absolute paths skipped together with everything below them, whatever the patterns say
    pub excluded_paths: Vec<PathBuf>,
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            follow_symlinks: false,
            ignore_patterns: vec![".scout".to_string(), ".git".to_string()],
            excluded_paths: Vec::new(),
        }
    }
}

/// Filesystem walker
pub struct Walker {
    root: PathBuf,
    config: WalkerConfig,
}

impl Walker {
    /// Create a walker for `root`, which should already be canonical.
    pub fn new(root: PathBuf) -> Self {
        Self::with_config(root, WalkerConfig::default())
    }

    /// The root's state directory is always excluded, so the catalog never scans itself.
    pub fn with_config(root: PathBuf, mut config: WalkerConfig) -> Self {
        config.excluded_paths.push(root.join(STATE_DIR));
        Self { root, config }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily walk the tree, parent before children.
    pub fn entries(&self) -> impl Iterator<Item = Result<ScanEntry, WalkError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.config.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |entry| entry.depth() == 0 || !self.should_ignore(entry))
            .filter_map(move |item| match item {
                Ok(entry) => self.scan_entry(&entry).transpose(),
                Err(e) => Some(Err(WalkError {
                    path: e.path().map(Path::to_path_buf),
                    message: e.to_string(),
                })),
            })
    }

    /// Collect every entry, failing on the first unreadable one.
    pub fn walk(&self) -> Result<Vec<ScanEntry>, WalkError> {
        self.entries().collect()
    }

    fn scan_entry(&self, entry: &DirEntry) -> Result<Option<ScanEntry>, WalkError> {
        let source = entry.path().to_path_buf();
        let metadata = entry.metadata().map_err(|e| WalkError {
            path: Some(source.clone()),
            message: format!("Failed to read metadata: {}", e),
        })?;

        let kind = if metadata.is_dir() {
            EntryKind::Directory
        } else if metadata.is_file() {
            EntryKind::File
        } else {
            // Unfollowed symlinks and special files
            return Ok(None);
        };

        let catalog_path = path::to_catalog_path(&self.root, &source).map_err(|e| WalkError {
            path: Some(source.clone()),
            message: e.to_string(),
        })?;

        Ok(Some(ScanEntry {
            path: catalog_path,
            source,
            kind,
            size: if kind == EntryKind::File { metadata.len() } else { 0 },
            mtime_ns: mtime_nanos(&metadata),
            identity: identity_token(&metadata),
        }))
    }

    fn should_ignore(&self, entry: &DirEntry) -> bool {
        if self
            .config
            .excluded_paths
            .iter()
            .any(|excluded| entry.path() == excluded.as_path())
        {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        self.config
            .ignore_patterns
            .iter()
            .map(|pattern| pattern.trim_end_matches('/'))
            .any(|pattern| match pattern.strip_prefix('*') {
                Some(suffix) => name.ends_with(suffix),
                None => name == pattern,
            })
    }
}

/// Modification time in nanoseconds since the unix epoch (negative before it, 0 if unknown).
pub fn mtime_nanos(metadata: &Metadata) -> i64 {
    match metadata.modified() {
        Ok(modified) => match modified.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_nanos() as i64,
            Err(before) => -(before.duration().as_nanos() as i64),
        },
        Err(_) => 0,
    }
}

#[cfg(unix)]
fn identity_token(metadata: &Metadata) -> Option<IdentityToken> {
    use std::os::unix::fs::MetadataExt;
    Some(IdentityToken::new(metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn identity_token(_metadata: &Metadata) -> Option<IdentityToken> {
    None
}
