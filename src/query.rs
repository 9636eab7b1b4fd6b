//! Read-side catalog queries
//!
//! Everything here is answered from closure rows with point lookups and bounded scans; nothing
//! walks parent links recursively.

use crate::error::CatalogError;
use crate::store::closure::ordered_chain;
use crate::store::{CatalogStore, DirectoryRecord, FileRecord};
use crate::tree::path;
use crate::types::{DirId, EntryRef, FileId};
use serde::Serialize;

/// A directory together with its distance from the directory a query started at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub depth: u32,
    #[serde(flatten)]
    pub record: DirectoryRecord,
}

/// Query facade over a [`CatalogStore`].
///
/// Each store read is atomic on its own, but a query spans several reads and is not a snapshot.
/// When a writer removes the directory being queried part-way through, the query fails with
/// `DirectoryNotFound` for that directory rather than returning a mixed result.
pub struct CatalogQuery<'a, S: CatalogStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: CatalogStore + ?Sized> CatalogQuery<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    fn directory(&self, dir: DirId) -> Result<DirectoryRecord, CatalogError> {
        self.store
            .get_directory(dir)?
            .ok_or(CatalogError::DirectoryNotFound(dir))
    }

    fn referenced_directory(&self, dir: DirId, from: DirId) -> Result<DirectoryRecord, CatalogError> {
        if let Some(record) = self.store.get_directory(dir)? {
            return Ok(record);
        }
        // Rows read before a concurrent subtree deletion committed.
        if self.store.get_directory(from)?.is_none() {
            return Err(CatalogError::DirectoryNotFound(from));
        }
        Err(CatalogError::InvariantViolation(format!(
            "closure rows of {} reference missing directory {}",
            from, dir
        )))
    }

    /// Full catalog path of a directory, e.g. `/a/d`.
    pub fn materialize_path(&self, dir: DirId) -> Result<String, CatalogError> {
        let names = self
            .list_ancestors(dir)?
            .into_iter()
            .map(|entry| entry.record.name)
            .collect::<Vec<_>>();
        Ok(path::join(&names))
    }

    /// Ancestors root first, ending with the directory itself at depth 0.
    pub fn list_ancestors(&self, dir: DirId) -> Result<Vec<DirectoryEntry>, CatalogError> {
        let chain = ordered_chain(dir, self.store.ancestor_rows(dir)?)?;
        chain
            .into_iter()
            .map(|row| {
                Ok(DirectoryEntry {
                    depth: row.depth,
                    record: self.referenced_directory(row.ancestor, dir)?,
                })
            })
            .collect()
    }

    /// Immediate subdirectories, ordered by name bytes.
    pub fn list_children(&self, dir: DirId) -> Result<Vec<DirectoryRecord>, CatalogError> {
        self.directory(dir)?;
        let mut children = self
            .store
            .descendant_rows(dir, Some(1))?
            .into_iter()
            .map(|row| self.referenced_directory(row.descendant, dir))
            .collect::<Result<Vec<_>, _>>()?;
        children.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
        Ok(children)
    }

    /// All directories below `dir`, optionally limited to `max_depth`, shallowest first.
    pub fn list_descendants(
        &self,
        dir: DirId,
        max_depth: Option<u32>,
    ) -> Result<Vec<DirectoryEntry>, CatalogError> {
        self.directory(dir)?;
        self.store
            .descendant_rows(dir, max_depth)?
            .into_iter()
            .map(|row| {
                Ok(DirectoryEntry {
                    depth: row.depth,
                    record: self.referenced_directory(row.descendant, dir)?,
                })
            })
            .collect()
    }

    pub fn list_files(&self, dir: DirId) -> Result<Vec<FileRecord>, CatalogError> {
        self.directory(dir)?;
        self.store.files_in_directory(dir)
    }

    /// Catalog path of a file.
    pub fn file_path(&self, file: FileId) -> Result<String, CatalogError> {
        let record = self
            .store
            .get_file(file)?
            .ok_or(CatalogError::FileNotFound(file))?;
        let dir_path = self.materialize_path(record.dir_id)?;
        Ok(format!("{}{}{}", dir_path, path::SEPARATOR, record.name))
    }

    /// Resolve a catalog path to the entry it names.
    ///
    /// The last segment is matched against directories first, then files. `/` names no entry.
    pub fn resolve_path(&self, catalog_path: &str) -> Result<Option<EntryRef>, CatalogError> {
        let segments = path::decompose(catalog_path)?;
        let Some((last, parents)) = segments.split_last() else {
            return Ok(None);
        };

        let mut current: Option<DirId> = None;
        for segment in parents {
            match self.store.find_directory_by_parent_and_name(current, segment)? {
                Some(record) => current = Some(record.id),
                None => return Ok(None),
            }
        }

        if let Some(record) = self.store.find_directory_by_parent_and_name(current, last)? {
            return Ok(Some(EntryRef::Directory(record.id)));
        }
        match current {
            Some(dir) => Ok(self
                .store
                .find_file_by_parent_and_name(dir, last)?
                .map(|record| EntryRef::File(record.id))),
            None => Ok(None),
        }
    }

    /// Resolve a catalog path that must name a directory.
    pub fn resolve_directory(&self, catalog_path: &str) -> Result<Option<DirId>, CatalogError> {
        Ok(match self.resolve_path(catalog_path)? {
            Some(EntryRef::Directory(id)) => Some(id),
            _ => None,
        })
    }

    /// Files whose stored digest equals `digest` (hex, case-insensitive).
    pub fn find_files_by_hash(&self, digest: &str) -> Result<Vec<FileRecord>, CatalogError> {
        let wanted = digest.to_ascii_lowercase();
        Ok(self
            .store
            .all_files()?
            .into_iter()
            .filter(|f| f.content_hash.as_deref() == Some(wanted.as_str()))
            .collect())
    }

    /// Files that have never been hashed successfully.
    pub fn list_unhashed_files(&self) -> Result<Vec<FileRecord>, CatalogError> {
        Ok(self
            .store
            .all_files()?
            .into_iter()
            .filter(|f| f.content_hash.is_none())
            .collect())
    }
}
