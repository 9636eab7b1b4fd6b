//! Reconciliation of the catalog against a live directory tree
//!
//! One pass consumes walker output in parent-before-children order, matches every entry by
//! (resolved parent, name), applies structural changes through the store, hashes new and
//! drifted files, and finally removes catalog children that were not observed.

use crate::error::CatalogError;
use crate::store::{CatalogStore, DirectoryRecord, FileRecord};
use crate::tree::hasher::HashEngine;
use crate::tree::path;
use crate::tree::walker::{ScanEntry, WalkError};
use crate::types::{DirId, EntryKind, EntryRef, FileId};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Shared flag for aborting a pass between entries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    /// Hashing threads; 0 uses one per CPU.
    pub hash_workers: usize,
    pub cancel: CancelToken,
}

/// An entry the pass could not bring into agreement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryFailure {
    pub path: String,
    pub kind: String,
    pub reason: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub directories_created: usize,
    pub directories_moved: usize,
    pub directories_removed: usize,
    pub files_created: usize,
    pub files_moved: usize,
    pub files_updated: usize,
    pub files_unchanged: usize,
    pub files_removed: usize,
    pub hashes_computed: usize,
    pub walker_errors: usize,
    pub failures: Vec<EntryFailure>,
    pub cancelled: bool,
}

impl PassSummary {
    /// True when every entry was processed and nothing failed.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }

    fn fail(&mut self, path: &str, error: &CatalogError) {
        warn!(path, kind = error.kind(), error = %error, "Entry failed");
        self.failures.push(EntryFailure {
            path: path.to_string(),
            kind: error.kind().to_string(),
            reason: error.to_string(),
        });
    }
}

struct HashJob {
    file: FileId,
    path: String,
    source: PathBuf,
    size: u64,
    mtime_ns: i64,
}

/// Catalog children of a directory as they were before the pass touched it.
struct ChildSnapshot {
    /// Catalog path of the directory, for reporting removals.
    path: String,
    directories: Vec<DirId>,
    files: Vec<FileId>,
}

#[derive(Default)]
struct PassState {
    /// Catalog path -> directory, for every directory visited so far.
    resolved: HashMap<String, DirId>,
    /// Filesystem path -> directory, used to attribute walker errors.
    sources: HashMap<PathBuf, DirId>,
    seen_dirs: HashSet<DirId>,
    seen_files: HashSet<FileId>,
    snapshots: Vec<(DirId, ChildSnapshot)>,
    /// Directories whose listing was incomplete; nothing is removed under them.
    incomplete: HashSet<DirId>,
    jobs: Vec<HashJob>,
}

/// Brings a catalog into agreement with walker output.
pub struct Reconciler<'a, S: CatalogStore + ?Sized> {
    store: &'a S,
    engine: &'a HashEngine,
    options: ReconcileOptions,
}

impl<'a, S: CatalogStore + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a S, engine: &'a HashEngine) -> Self {
        Self::with_options(store, engine, ReconcileOptions::default())
    }

    pub fn with_options(store: &'a S, engine: &'a HashEngine, options: ReconcileOptions) -> Self {
        Self {
            store,
            engine,
            options,
        }
    }

    /// Run one pass over `entries`, which must list every directory before its contents.
    ///
    /// Per-entry failures are collected in the summary; the pass itself only fails when the
    /// hashing pool cannot be started.
    #[instrument(skip_all, fields(algorithm = %self.engine.algorithm()))]
    pub fn run<I>(&self, entries: I) -> Result<PassSummary, CatalogError>
    where
        I: IntoIterator<Item = Result<ScanEntry, WalkError>>,
    {
        let start = Instant::now();
        let mut summary = PassSummary::default();
        let mut state = PassState::default();

        for item in entries {
            if self.options.cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            match item {
                Ok(entry) => {
                    if let Err(e) = self.visit(&entry, &mut state, &mut summary) {
                        summary.fail(&entry.path, &e);
                        // A failed entry was not observed; keep its siblings' removals on hold.
                        if let Some(parent) = resolved_parent(&entry.path, &state) {
                            state.incomplete.insert(parent);
                        }
                    }
                }
                Err(e) => self.record_walk_error(e, &mut state, &mut summary),
            }
        }

        if summary.cancelled {
            info!(
                pending_hashes = state.jobs.len(),
                "Reconciliation cancelled; removals and hashing skipped"
            );
            return Ok(summary);
        }

        self.remove_unseen(&state, &mut summary);
        self.hash_pending(std::mem::take(&mut state.jobs), &mut summary)?;

        info!(
            directories_created = summary.directories_created,
            directories_moved = summary.directories_moved,
            directories_removed = summary.directories_removed,
            files_created = summary.files_created,
            files_moved = summary.files_moved,
            files_updated = summary.files_updated,
            files_removed = summary.files_removed,
            hashes_computed = summary.hashes_computed,
            failures = summary.failures.len(),
            duration_ms = start.elapsed().as_millis(),
            "Reconciliation pass complete"
        );
        Ok(summary)
    }

    fn record_walk_error(&self, error: WalkError, state: &mut PassState, summary: &mut PassSummary) {
        summary.walker_errors += 1;
        let location = error
            .path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        if let Some(source) = &error.path {
            let owner = state
                .sources
                .get(source)
                .or_else(|| source.parent().and_then(|parent| state.sources.get(parent)));
            if let Some(dir) = owner {
                state.incomplete.insert(*dir);
            }
        }
        warn!(path = %location, error = %error.message, "Walker error");
        summary.failures.push(EntryFailure {
            path: location,
            kind: "walk".to_string(),
            reason: error.message,
        });
    }

    fn visit(&self, entry: &ScanEntry, state: &mut PassState, summary: &mut PassSummary) -> Result<(), CatalogError> {
        let segments = path::decompose(&entry.path)?;
        let Some((name, parent_segments)) = segments.split_last() else {
            return Err(CatalogError::InvalidPath(format!(
                "entry {:?} has no name",
                entry.path
            )));
        };
        let parent = if parent_segments.is_empty() {
            None
        } else {
            let parent_path = path::join(parent_segments);
            let id = state.resolved.get(&parent_path).copied().ok_or_else(|| {
                CatalogError::InvariantViolation(format!(
                    "parent {} of {} was not visited earlier in the pass",
                    parent_path, entry.path
                ))
            })?;
            Some(id)
        };

        match entry.kind {
            EntryKind::Directory => self.visit_directory(entry, parent, name, state, summary),
            EntryKind::File => {
                let dir = parent.ok_or_else(|| {
                    CatalogError::InvariantViolation(format!(
                        "file {} has no parent directory",
                        entry.path
                    ))
                })?;
                self.visit_file(entry, dir, name, state, summary)
            }
        }
    }

    fn visit_directory(
        &self,
        entry: &ScanEntry,
        parent: Option<DirId>,
        name: &str,
        state: &mut PassState,
        summary: &mut PassSummary,
    ) -> Result<(), CatalogError> {
        let (record, preexisting) = match self.store.find_directory_by_parent_and_name(parent, name)? {
            Some(record) => (record, true),
            None => match self.claim_moved_directory(entry, parent, name, state)? {
                Some(record) => {
                    summary.directories_moved += 1;
                    (record, true)
                }
                None => {
                    let record = self.store.create_directory(parent, name)?;
                    summary.directories_created += 1;
                    (record, false)
                }
            },
        };

        // Matched entries count as observed before any follow-up can fail.
        state.seen_dirs.insert(record.id);
        state.resolved.insert(entry.path.clone(), record.id);
        state.sources.insert(entry.source.clone(), record.id);

        if preexisting {
            match self.snapshot_children(record.id, &entry.path) {
                Ok(snapshot) => state.snapshots.push((record.id, snapshot)),
                Err(e) => {
                    state.incomplete.insert(record.id);
                    return Err(e);
                }
            }
        }

        if entry.identity.is_some() && entry.identity != record.identity {
            self.store
                .set_identity(EntryRef::Directory(record.id), entry.identity)?;
        }
        Ok(())
    }

    fn snapshot_children(&self, dir: DirId, dir_path: &str) -> Result<ChildSnapshot, CatalogError> {
        Ok(ChildSnapshot {
            path: dir_path.to_string(),
            directories: self
                .store
                .descendant_rows(dir, Some(1))?
                .into_iter()
                .map(|row| row.descendant)
                .collect(),
            files: self
                .store
                .files_in_directory(dir)?
                .into_iter()
                .map(|file| file.id)
                .collect(),
        })
    }

    /// Relocate the directory that carried this entry's identity token, if there is one to claim.
    fn claim_moved_directory(
        &self,
        entry: &ScanEntry,
        parent: Option<DirId>,
        name: &str,
        state: &PassState,
    ) -> Result<Option<DirectoryRecord>, CatalogError> {
        let (Some(token), Some(parent)) = (entry.identity, parent) else {
            return Ok(None);
        };
        let Some(EntryRef::Directory(candidate)) = self.store.find_by_identity(token)? else {
            return Ok(None);
        };
        if state.seen_dirs.contains(&candidate) {
            return Ok(None);
        }
        match self.store.relocate_directory(candidate, parent, name) {
            Ok(record) => {
                debug!(dir = %candidate, path = %entry.path, "Directory moved");
                Ok(Some(record))
            }
            Err(CatalogError::Cycle { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn visit_file(
        &self,
        entry: &ScanEntry,
        dir: DirId,
        name: &str,
        state: &mut PassState,
        summary: &mut PassSummary,
    ) -> Result<(), CatalogError> {
        let (record, created) = match self.store.find_file_by_parent_and_name(dir, name)? {
            Some(record) => (record, false),
            None => match self.claim_moved_file(entry, dir, name, state)? {
                Some(record) => {
                    summary.files_moved += 1;
                    (record, false)
                }
                None => {
                    let record = self.store.create_file(dir, name, entry.size, entry.mtime_ns)?;
                    summary.files_created += 1;
                    (record, true)
                }
            },
        };
        state.seen_files.insert(record.id);

        if entry.identity.is_some() && entry.identity != record.identity {
            self.store.set_identity(EntryRef::File(record.id), entry.identity)?;
        }

        let drifted = record.has_drifted(entry.size, entry.mtime_ns);
        if created || drifted || record.content_hash.is_none() {
            if drifted && !created {
                summary.files_updated += 1;
            }
            state.jobs.push(HashJob {
                file: record.id,
                path: entry.path.clone(),
                source: entry.source.clone(),
                size: entry.size,
                mtime_ns: entry.mtime_ns,
            });
        } else {
            summary.files_unchanged += 1;
        }
        Ok(())
    }

    fn claim_moved_file(
        &self,
        entry: &ScanEntry,
        dir: DirId,
        name: &str,
        state: &PassState,
    ) -> Result<Option<FileRecord>, CatalogError> {
        let Some(token) = entry.identity else {
            return Ok(None);
        };
        let Some(EntryRef::File(candidate)) = self.store.find_by_identity(token)? else {
            return Ok(None);
        };
        if state.seen_files.contains(&candidate) {
            return Ok(None);
        }
        let record = self.store.move_file(candidate, dir, name)?;
        debug!(file = %candidate, path = %entry.path, "File moved");
        Ok(Some(record))
    }

    /// Delete catalog children of visited directories that the walk did not observe.
    fn remove_unseen(&self, state: &PassState, summary: &mut PassSummary) {
        for (dir, snapshot) in &state.snapshots {
            if state.incomplete.contains(dir) {
                debug!(dir = %dir, "Listing incomplete; skipping removals");
                continue;
            }
            for child in &snapshot.directories {
                if state.seen_dirs.contains(child) {
                    continue;
                }
                match self.store.get_directory(*child) {
                    Ok(Some(record)) => match self.store.delete_directory_subtree(*child) {
                        Ok(removal) => {
                            summary.directories_removed += removal.directories;
                            summary.files_removed += removal.files;
                        }
                        Err(e) => summary.fail(&child_path(&snapshot.path, &record.name), &e),
                    },
                    Ok(None) => {}
                    Err(e) => summary.fail(&child_path(&snapshot.path, &child.to_string()), &e),
                }
            }
            for file in &snapshot.files {
                if state.seen_files.contains(file) {
                    continue;
                }
                match self.store.get_file(*file) {
                    Ok(Some(record)) => match self.store.delete_file(*file) {
                        Ok(()) => summary.files_removed += 1,
                        Err(e) => summary.fail(&child_path(&snapshot.path, &record.name), &e),
                    },
                    Ok(None) => {}
                    Err(e) => summary.fail(&child_path(&snapshot.path, &file.to_string()), &e),
                }
            }
        }
    }

    /// Hash queued files in parallel, then commit the digests one row at a time.
    ///
    /// A file that cannot be read keeps its previous record, so the next pass retries it.
    fn hash_pending(&self, jobs: Vec<HashJob>, summary: &mut PassSummary) -> Result<(), CatalogError> {
        if jobs.is_empty() {
            return Ok(());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.hash_workers)
            .build()
            .map_err(|e| {
                CatalogError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    format!("Failed to start hashing pool: {}", e),
                ))
            })?;

        let engine = self.engine;
        debug!(jobs = jobs.len(), threads = pool.current_num_threads(), "Hashing files");
        let results: Vec<(HashJob, Result<String, CatalogError>)> = pool.install(|| {
            jobs.into_par_iter()
                .map(|job| {
                    let digest = engine.hash_file(&job.source);
                    (job, digest)
                })
                .collect()
        });

        let algorithm = engine.algorithm();
        for (job, digest) in results {
            let committed = digest.and_then(|digest| {
                self.store
                    .set_file_hash(job.file, &digest, algorithm, job.size, job.mtime_ns)
            });
            match committed {
                Ok(_) => summary.hashes_computed += 1,
                Err(e) => summary.fail(&job.path, &e),
            }
        }
        Ok(())
    }
}

/// Directory an entry was attributed to, if its parent was resolved in this pass.
fn resolved_parent(entry_path: &str, state: &PassState) -> Option<DirId> {
    let segments = path::decompose(entry_path).ok()?;
    let (_, parents) = segments.split_last()?;
    if parents.is_empty() {
        return None;
    }
    state.resolved.get(&path::join(parents)).copied()
}

fn child_path(parent: &str, name: &str) -> String {
    format!("{}{}{}", parent, path::SEPARATOR, name)
}
