//! Catalog entry store
//!
//! Owns directory records, file records and the ancestor-closure relation. Every mutation goes
//! through [`CatalogStore`] and commits as a single transaction, so callers never observe a
//! directory without its closure rows or a subtree half-moved.

pub mod closure;
pub mod persistence;
pub mod schema;

pub use persistence::SledCatalog;

use crate::error::CatalogError;
use crate::tree::hasher::HashAlgorithm;
use crate::types::{DirId, EntryRef, FileId, IdentityToken};
use serde::{Deserialize, Serialize};

/// A catalogued directory. Its parent is not stored here; it is the depth-1 closure ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    pub id: DirId,
    pub name: String,
    pub identity: Option<IdentityToken>,
    pub created_at_ms: u64,
}

/// A catalogued file.
///
/// `size` and `mtime_ns` are the values the stored `content_hash` was computed for. A null
/// hash means the file has not been hashed successfully yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: FileId,
    pub dir_id: DirId,
    pub name: String,
    pub size: u64,
    pub mtime_ns: i64,
    pub content_hash: Option<String>,
    pub hash_algorithm: Option<HashAlgorithm>,
    pub identity: Option<IdentityToken>,
    pub updated_at_ms: u64,
}

impl FileRecord {
    /// True when the observed metadata differs from what the stored hash was computed for.
    pub fn has_drifted(&self, size: u64, mtime_ns: i64) -> bool {
        self.size != size || self.mtime_ns != mtime_ns
    }
}

/// One row of the ancestor-closure relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClosureRow {
    pub descendant: DirId,
    pub ancestor: DirId,
    pub depth: u32,
}

impl ClosureRow {
    pub fn new(descendant: DirId, ancestor: DirId, depth: u32) -> Self {
        Self {
            descendant,
            ancestor,
            depth,
        }
    }
}

/// What a subtree deletion removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SubtreeRemoval {
    pub directories: usize,
    pub files: usize,
    pub closure_rows: usize,
}

/// Row counts of a catalog.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatalogStats {
    pub directories: usize,
    pub files: usize,
    pub closure_rows: usize,
    pub unhashed_files: usize,
}

/// Result of a full consistency scan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    pub directories: usize,
    pub files: usize,
    pub closure_rows: usize,
    pub problems: Vec<String>,
}

impl IntegrityReport {
    pub fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Catalog store interface
///
/// Structural operations are atomic: on error nothing has been written.
pub trait CatalogStore {
    /// Create a directory. `parent = None` creates a root.
    fn create_directory(&self, parent: Option<DirId>, name: &str) -> Result<DirectoryRecord, CatalogError>;

    /// Create a file with a null hash.
    fn create_file(&self, dir: DirId, name: &str, size: u64, mtime_ns: i64) -> Result<FileRecord, CatalogError>;

    /// Record a digest together with the (size, mtime) it was computed for.
    fn set_file_hash(
        &self,
        file: FileId,
        hash: &str,
        algorithm: HashAlgorithm,
        size: u64,
        mtime_ns: i64,
    ) -> Result<FileRecord, CatalogError>;

    /// Remove a directory, everything below it, and all their closure rows.
    fn delete_directory_subtree(&self, dir: DirId) -> Result<SubtreeRemoval, CatalogError>;

    fn delete_file(&self, file: FileId) -> Result<(), CatalogError>;

    /// Re-parent a directory and its subtree, keeping its name.
    fn move_directory(&self, dir: DirId, new_parent: DirId) -> Result<DirectoryRecord, CatalogError> {
        let record = self
            .get_directory(dir)?
            .ok_or(CatalogError::DirectoryNotFound(dir))?;
        self.relocate_directory(dir, new_parent, &record.name)
    }

    /// Re-parent and rename a directory in one transaction.
    fn relocate_directory(
        &self,
        dir: DirId,
        new_parent: DirId,
        new_name: &str,
    ) -> Result<DirectoryRecord, CatalogError>;

    /// Move or rename a file. Hash, size and mtime are kept.
    fn move_file(&self, file: FileId, new_dir: DirId, new_name: &str) -> Result<FileRecord, CatalogError>;

    /// Attach (or clear) the filesystem identity token of an entry.
    fn set_identity(&self, entry: EntryRef, identity: Option<IdentityToken>) -> Result<(), CatalogError>;

    fn find_by_identity(&self, identity: IdentityToken) -> Result<Option<EntryRef>, CatalogError>;

    fn get_directory(&self, dir: DirId) -> Result<Option<DirectoryRecord>, CatalogError>;

    fn get_file(&self, file: FileId) -> Result<Option<FileRecord>, CatalogError>;

    fn find_directory_by_parent_and_name(
        &self,
        parent: Option<DirId>,
        name: &str,
    ) -> Result<Option<DirectoryRecord>, CatalogError>;

    fn find_file_by_parent_and_name(&self, dir: DirId, name: &str) -> Result<Option<FileRecord>, CatalogError>;

    /// Rows with `descendant == dir`, self row included. Unordered.
    fn ancestor_rows(&self, dir: DirId) -> Result<Vec<ClosureRow>, CatalogError>;

    /// Rows with `ancestor == dir` and `1 <= depth <= max_depth`, ordered by depth.
    fn descendant_rows(&self, dir: DirId, max_depth: Option<u32>) -> Result<Vec<ClosureRow>, CatalogError>;

    /// Files directly inside `dir`, ordered by name bytes.
    fn files_in_directory(&self, dir: DirId) -> Result<Vec<FileRecord>, CatalogError>;

    fn root_directories(&self) -> Result<Vec<DirectoryRecord>, CatalogError>;

    fn all_files(&self) -> Result<Vec<FileRecord>, CatalogError>;
}
