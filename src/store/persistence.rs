//! Persistence layer for the catalog store

use crate::error::CatalogError;
use crate::store::closure;
use crate::store::schema::{self, CURRENT_SCHEMA_VERSION};
use crate::store::{
    CatalogStats, CatalogStore, ClosureRow, DirectoryRecord, FileRecord, IntegrityReport,
    SubtreeRemoval,
};
use crate::tree::hasher::HashAlgorithm;
use crate::tree::path::validate_name;
use crate::types::{now_millis, DirId, EntryRef, FileId, IdentityToken};
use bincode;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, TransactionResult};
use sled::Transactional;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument};

fn to_storage_io(context: &str, err: sled::Error) -> CatalogError {
    CatalogError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: {}", context, err),
    ))
}

fn encode<T: Serialize>(what: &str, value: &T) -> Result<Vec<u8>, CatalogError> {
    bincode::serialize(value)
        .map_err(|e| CatalogError::InvariantViolation(format!("Failed to serialize {}: {}", what, e)))
}

fn decode<T: DeserializeOwned>(what: &str, bytes: &[u8]) -> Result<T, CatalogError> {
    bincode::deserialize(bytes)
        .map_err(|e| CatalogError::InvariantViolation(format!("Failed to deserialize {}: {}", what, e)))
}

fn decode_u32(what: &str, bytes: &[u8]) -> Result<u32, CatalogError> {
    let raw: [u8; 4] = bytes
        .try_into()
        .map_err(|_| CatalogError::InvariantViolation(format!("corrupt {} ({} bytes)", what, bytes.len())))?;
    Ok(u32::from_be_bytes(raw))
}

/// Which tree a staged write targets.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Dirs,
    DirNames,
    Roots,
    Files,
    FileNames,
    ClosureUp,
    ClosureDown,
    Identities,
}

/// Writes computed under the writer lock and applied in one transaction, in order.
#[derive(Debug, Default)]
struct WriteSet {
    ops: Vec<(Slot, Vec<u8>, Option<Vec<u8>>)>,
}

impl WriteSet {
    fn put(&mut self, slot: Slot, key: &[u8], value: Vec<u8>) {
        self.ops.push((slot, key.to_vec(), Some(value)));
    }

    fn remove(&mut self, slot: Slot, key: &[u8]) {
        self.ops.push((slot, key.to_vec(), None));
    }

    fn put_row(&mut self, row: &ClosureRow) {
        self.put(
            Slot::ClosureUp,
            &schema::up_key(row.descendant, row.ancestor),
            row.depth.to_be_bytes().to_vec(),
        );
        self.put(
            Slot::ClosureDown,
            &schema::down_key(row.ancestor, row.depth, row.descendant),
            Vec::new(),
        );
    }

    fn remove_row(&mut self, row: &ClosureRow) {
        self.remove(Slot::ClosureUp, &schema::up_key(row.descendant, row.ancestor));
        self.remove(
            Slot::ClosureDown,
            &schema::down_key(row.ancestor, row.depth, row.descendant),
        );
    }
}

/// Sled-based implementation of [`CatalogStore`]
///
/// Reads go straight to sled and may run concurrently. Mutations are serialized by a writer
/// lock: each one reads what it needs, stages a [`WriteSet`] and commits it as a single
/// multi-tree transaction.
pub struct SledCatalog {
    db: sled::Db,
    location: Option<PathBuf>,
    meta: sled::Tree,
    dirs: sled::Tree,
    dir_names: sled::Tree,
    roots: sled::Tree,
    files: sled::Tree,
    file_names: sled::Tree,
    closure_up: sled::Tree,
    closure_down: sled::Tree,
    identities: sled::Tree,
    write_lock: Mutex<()>,
}

impl SledCatalog {
    /// Open (or create) a catalog database at the given directory.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| to_storage_io("Failed to open sled database", e))?;
        Self::from_db(db, Some(path.to_path_buf()))
    }

    /// An in-memory catalog removed when dropped. Used by tests and dry runs.
    pub fn temporary() -> Result<Self, CatalogError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| to_storage_io("Failed to open temporary database", e))?;
        Self::from_db(db, None)
    }

    fn from_db(db: sled::Db, location: Option<PathBuf>) -> Result<Self, CatalogError> {
        let has_data = Self::has_any_data(&db)?;
        let open = |name: &str| {
            db.open_tree(name)
                .map_err(|e| to_storage_io(&format!("Failed to open tree {}", name), e))
        };
        let meta = open(schema::TREE_META)?;

        let stored_version = meta
            .get(schema::META_SCHEMA_VERSION)
            .map_err(|e| to_storage_io("Failed to read schema version", e))?;
        match stored_version {
            Some(raw) => {
                let found = decode_u32("schema version", &raw)?;
                let migrated = schema::migrate(&db, found)?;
                if migrated != found {
                    meta.insert(schema::META_SCHEMA_VERSION, migrated.to_be_bytes().to_vec())
                        .map_err(|e| to_storage_io("Failed to write schema version", e))?;
                    debug!(from = found, to = migrated, "Migrated catalog schema");
                }
            }
            None if has_data => {
                return Err(CatalogError::NotACatalog(location.unwrap_or_default()));
            }
            None => {
                meta.insert(
                    schema::META_SCHEMA_VERSION,
                    CURRENT_SCHEMA_VERSION.to_be_bytes().to_vec(),
                )
                .map_err(|e| to_storage_io("Failed to write schema version", e))?;
                meta.insert(schema::META_CREATED_AT, now_millis().to_be_bytes().to_vec())
                    .map_err(|e| to_storage_io("Failed to write creation time", e))?;
                debug!(version = CURRENT_SCHEMA_VERSION, "Initialized new catalog");
            }
        }

        Ok(Self {
            dirs: open(schema::TREE_DIRS)?,
            dir_names: open(schema::TREE_DIR_NAMES)?,
            roots: open(schema::TREE_ROOTS)?,
            files: open(schema::TREE_FILES)?,
            file_names: open(schema::TREE_FILE_NAMES)?,
            closure_up: open(schema::TREE_CLOSURE_UP)?,
            closure_down: open(schema::TREE_CLOSURE_DOWN)?,
            identities: open(schema::TREE_IDENTITIES)?,
            meta,
            location,
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn has_any_data(db: &sled::Db) -> Result<bool, CatalogError> {
        for name in db.tree_names() {
            let tree = db
                .open_tree(&name)
                .map_err(|e| to_storage_io("Failed to inspect database", e))?;
            if !tree.is_empty() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Directory the database lives in (`None` for temporary catalogs).
    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn schema_version(&self) -> Result<u32, CatalogError> {
        match self
            .meta
            .get(schema::META_SCHEMA_VERSION)
            .map_err(|e| to_storage_io("Failed to read schema version", e))?
        {
            Some(raw) => decode_u32("schema version", &raw),
            None => Err(CatalogError::InvariantViolation(
                "catalog has no schema version".to_string(),
            )),
        }
    }

    /// Filesystem directory this catalog tracks, if one has been recorded.
    pub fn root(&self) -> Result<Option<PathBuf>, CatalogError> {
        let raw = self
            .meta
            .get(schema::META_ROOT)
            .map_err(|e| to_storage_io("Failed to read catalog root", e))?;
        match raw {
            Some(bytes) => {
                let text = std::str::from_utf8(&bytes).map_err(|_| {
                    CatalogError::InvariantViolation("catalog root is not valid UTF-8".to_string())
                })?;
                Ok(Some(PathBuf::from(text)))
            }
            None => Ok(None),
        }
    }

    pub fn set_root(&self, root: &Path) -> Result<(), CatalogError> {
        let text = root.to_str().ok_or_else(|| {
            CatalogError::InvalidPath(format!("non UTF-8 catalog root: {}", root.display()))
        })?;
        self.meta
            .insert(schema::META_ROOT, text.as_bytes().to_vec())
            .map_err(|e| to_storage_io("Failed to write catalog root", e))?;
        Ok(())
    }

    pub fn created_at_ms(&self) -> Result<Option<u64>, CatalogError> {
        let raw = self
            .meta
            .get(schema::META_CREATED_AT)
            .map_err(|e| to_storage_io("Failed to read creation time", e))?;
        raw.map(|bytes| schema::decode_id(&bytes)).transpose()
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> Result<(), CatalogError> {
        self.db
            .flush()
            .map_err(|e| to_storage_io("Failed to flush database", e))?;
        Ok(())
    }

    /// Flush and release the database.
    pub fn close(self) -> Result<(), CatalogError> {
        self.flush()?;
        debug!(location = ?self.location, "Closed catalog");
        Ok(())
    }

    pub fn stats(&self) -> Result<CatalogStats, CatalogError> {
        let unhashed_files = self
            .all_files()?
            .iter()
            .filter(|f| f.content_hash.is_none())
            .count();
        Ok(CatalogStats {
            directories: self.dirs.len(),
            files: self.files.len(),
            closure_rows: self.closure_up.len(),
            unhashed_files,
        })
    }

    fn next_id(&self) -> Result<u64, CatalogError> {
        self.db
            .generate_id()
            .map(|id| id + 1)
            .map_err(|e| to_storage_io("Failed to allocate id", e))
    }

    fn commit(&self, writes: &WriteSet) -> Result<(), CatalogError> {
        let result: TransactionResult<(), CatalogError> = (
            &self.dirs,
            &self.dir_names,
            &self.roots,
            &self.files,
            &self.file_names,
            &self.closure_up,
            &self.closure_down,
            &self.identities,
        )
            .transaction(|(dirs, dir_names, roots, files, file_names, up, down, identities)| {
                for (slot, key, value) in &writes.ops {
                    let tree = match slot {
                        Slot::Dirs => dirs,
                        Slot::DirNames => dir_names,
                        Slot::Roots => roots,
                        Slot::Files => files,
                        Slot::FileNames => file_names,
                        Slot::ClosureUp => up,
                        Slot::ClosureDown => down,
                        Slot::Identities => identities,
                    };
                    match value {
                        Some(value) => {
                            tree.insert(key.as_slice(), value.as_slice())?;
                        }
                        None => {
                            tree.remove(key.as_slice())?;
                        }
                    }
                }
                Ok(())
            });
        result.map_err(|e| match e {
            TransactionError::Abort(inner) => inner,
            TransactionError::Storage(err) => CatalogError::TransactionAbort(err.to_string()),
        })
    }

    fn require_directory(&self, dir: DirId) -> Result<DirectoryRecord, CatalogError> {
        self.get_directory(dir)?
            .ok_or(CatalogError::DirectoryNotFound(dir))
    }

    fn require_file(&self, file: FileId) -> Result<FileRecord, CatalogError> {
        self.get_file(file)?.ok_or(CatalogError::FileNotFound(file))
    }

    /// Parent of `dir` from its depth-1 closure row (`None` for roots).
    fn parent_of(&self, dir: DirId) -> Result<Option<DirId>, CatalogError> {
        Ok(self
            .ancestor_rows(dir)?
            .into_iter()
            .find(|row| row.depth == 1)
            .map(|row| row.ancestor))
    }

    /// Stage removal of the name entry that places `record` in its parent or among the roots.
    fn stage_name_release(
        &self,
        writes: &mut WriteSet,
        record: &DirectoryRecord,
        parent: Option<DirId>,
    ) -> Result<(), CatalogError> {
        match parent {
            Some(parent) => writes.remove(Slot::DirNames, &schema::dir_name_key(parent, &record.name)),
            None => {
                if self.is_registered_root(record)? {
                    writes.remove(Slot::Roots, record.name.as_bytes());
                }
            }
        }
        Ok(())
    }

    /// Every member of the subtree rooted at `dir` (itself included) with its depth below `dir`.
    fn subtree(&self, dir: DirId) -> Result<Vec<(DirId, u32)>, CatalogError> {
        let mut members = Vec::new();
        for item in self.closure_down.scan_prefix(dir.to_be_bytes()) {
            let (key, _) = item.map_err(|e| to_storage_io("Failed to scan subtree", e))?;
            let (_, depth, member) = schema::decode_down_key(&key)?;
            members.push((member, depth));
        }
        Ok(members)
    }

    fn is_registered_root(&self, record: &DirectoryRecord) -> Result<bool, CatalogError> {
        let raw = self
            .roots
            .get(record.name.as_bytes())
            .map_err(|e| to_storage_io("Failed to read roots", e))?;
        match raw {
            Some(bytes) => Ok(schema::decode_id(&bytes)? == record.id.0),
            None => Ok(false),
        }
    }

    /// Stage removal of the identity index entry for `token` if it still points at `owner`.
    fn stage_identity_release(
        &self,
        writes: &mut WriteSet,
        token: IdentityToken,
        owner: EntryRef,
    ) -> Result<(), CatalogError> {
        let key = token.to_key();
        let raw = self
            .identities
            .get(key)
            .map_err(|e| to_storage_io("Failed to read identity index", e))?;
        if let Some(bytes) = raw {
            if schema::decode_entry_ref(&bytes)? == owner {
                writes.remove(Slot::Identities, &key);
            }
        }
        Ok(())
    }

    /// Stage the index changes for `entry` switching from `old` to `new`.
    ///
    /// A token already held by another entry is taken over: that entry's record loses it.
    fn stage_identity_change(
        &self,
        writes: &mut WriteSet,
        entry: EntryRef,
        old: Option<IdentityToken>,
        new: Option<IdentityToken>,
    ) -> Result<(), CatalogError> {
        if let Some(old) = old {
            self.stage_identity_release(writes, old, entry)?;
        }
        let Some(new) = new else {
            return Ok(());
        };
        if let Some(holder) = self.find_by_identity(new)? {
            if holder != entry {
                match holder {
                    EntryRef::Directory(id) => {
                        if let Some(mut record) = self.get_directory(id)? {
                            record.identity = None;
                            writes.put(Slot::Dirs, &id.to_be_bytes(), encode("directory record", &record)?);
                        }
                    }
                    EntryRef::File(id) => {
                        if let Some(mut record) = self.get_file(id)? {
                            record.identity = None;
                            writes.put(Slot::Files, &id.to_be_bytes(), encode("file record", &record)?);
                        }
                    }
                }
            }
        }
        writes.put(
            Slot::Identities,
            &new.to_key(),
            schema::encode_entry_ref(entry).to_vec(),
        );
        Ok(())
    }

    fn stage_file_removal(&self, writes: &mut WriteSet, record: &FileRecord) -> Result<(), CatalogError> {
        writes.remove(Slot::Files, &record.id.to_be_bytes());
        writes.remove(Slot::FileNames, &schema::file_name_key(record.dir_id, &record.name));
        if let Some(token) = record.identity {
            self.stage_identity_release(writes, token, EntryRef::File(record.id))?;
        }
        Ok(())
    }

    /// Scan every relation and report anything that breaks the catalog invariants.
    pub fn verify_integrity(&self) -> Result<IntegrityReport, CatalogError> {
        let mut report = IntegrityReport::default();

        let mut dirs: HashMap<DirId, DirectoryRecord> = HashMap::new();
        for item in self.dirs.iter() {
            let (_, value) = item.map_err(|e| to_storage_io("Failed to scan directories", e))?;
            let record: DirectoryRecord = decode("directory record", &value)?;
            dirs.insert(record.id, record);
        }
        report.directories = dirs.len();

        let mut up: HashMap<(DirId, DirId), u32> = HashMap::new();
        for item in self.closure_up.iter() {
            let (key, value) = item.map_err(|e| to_storage_io("Failed to scan closure", e))?;
            let (descendant, ancestor) = schema::decode_up_key(&key)?;
            up.insert((descendant, ancestor), schema::decode_depth(&value)?);
        }
        report.closure_rows = up.len();

        let mut mirrored = 0usize;
        for item in self.closure_down.iter() {
            let (key, _) = item.map_err(|e| to_storage_io("Failed to scan closure", e))?;
            let (ancestor, depth, descendant) = schema::decode_down_key(&key)?;
            mirrored += 1;
            if up.get(&(descendant, ancestor)) != Some(&depth) {
                report.problems.push(format!(
                    "closure row ({}, {}, {}) exists only in the descendant index",
                    descendant, ancestor, depth
                ));
            }
        }
        if mirrored != up.len() {
            report.problems.push(format!(
                "closure indexes disagree: {} ancestor rows, {} descendant rows",
                up.len(),
                mirrored
            ));
        }

        let mut chains: HashMap<DirId, Vec<ClosureRow>> = HashMap::new();
        for (&(descendant, ancestor), &depth) in &up {
            if !dirs.contains_key(&descendant) || !dirs.contains_key(&ancestor) {
                report.problems.push(format!(
                    "closure row ({}, {}, {}) references a missing directory",
                    descendant, ancestor, depth
                ));
            }
            chains
                .entry(descendant)
                .or_default()
                .push(ClosureRow::new(descendant, ancestor, depth));
        }

        let mut parents: HashMap<DirId, Option<DirId>> = HashMap::new();
        for id in dirs.keys() {
            let rows = chains.remove(id).unwrap_or_default();
            match closure::ordered_chain(*id, rows) {
                Ok(chain) => {
                    let parent = chain.len().checked_sub(2).map(|i| chain[i].ancestor);
                    parents.insert(*id, parent);
                }
                Err(CatalogError::DirectoryNotFound(_)) => {
                    report.problems.push(format!("directory {} has no closure rows", id));
                }
                Err(e) => report.problems.push(e.to_string()),
            }
        }

        for (&(descendant, ancestor), &depth) in &up {
            if depth == 0 {
                continue;
            }
            if let Some(Some(parent)) = parents.get(&descendant) {
                if up.get(&(*parent, ancestor)) != Some(&(depth - 1)) {
                    report.problems.push(format!(
                        "closure row ({}, {}, {}) is not implied by parent {}",
                        descendant, ancestor, depth, parent
                    ));
                }
            }
        }

        let mut root_ids = HashSet::new();
        for item in self.roots.iter() {
            let (key, value) = item.map_err(|e| to_storage_io("Failed to scan roots", e))?;
            let id = DirId(schema::decode_id(&value)?);
            match dirs.get(&id) {
                Some(record) if record.name.as_bytes() == &key[..] => {}
                _ => report.problems.push(format!(
                    "root entry {:?} points at {} which does not carry that name",
                    String::from_utf8_lossy(&key),
                    id
                )),
            }
            root_ids.insert(id);
        }

        let mut sibling_names: HashSet<(Option<DirId>, &str)> = HashSet::new();
        for (id, parent) in &parents {
            match (parent, root_ids.contains(id)) {
                (None, false) => report
                    .problems
                    .push(format!("directory {} has no parent and is not a registered root", id)),
                (Some(_), true) => report
                    .problems
                    .push(format!("directory {} has a parent but is registered as a root", id)),
                _ => {}
            }
            if let Some(record) = dirs.get(id) {
                if !sibling_names.insert((*parent, record.name.as_str())) {
                    report.problems.push(format!(
                        "duplicate directory name {:?} under {:?}",
                        record.name, parent
                    ));
                }
            }
        }

        for (id, parent) in &parents {
            let (Some(parent), Some(record)) = (parent, dirs.get(id)) else {
                continue;
            };
            let indexed = self
                .dir_names
                .get(schema::dir_name_key(*parent, &record.name))
                .map_err(|e| to_storage_io("Failed to read directory names", e))?;
            match indexed {
                Some(bytes) if schema::decode_id(&bytes)? == id.0 => {}
                _ => report
                    .problems
                    .push(format!("directory {} is missing from the name index", id)),
            }
        }
        for item in self.dir_names.iter() {
            let (key, value) = item.map_err(|e| to_storage_io("Failed to scan directory names", e))?;
            let id = DirId(schema::decode_id(&value)?);
            let placed = match (dirs.get(&id), parents.get(&id)) {
                (Some(record), Some(Some(parent))) => {
                    schema::dir_name_key(*parent, &record.name) == &key[..]
                }
                _ => false,
            };
            if !placed {
                report
                    .problems
                    .push(format!("directory name index entry for {} is dangling", id));
            }
        }

        let mut files: HashMap<FileId, FileRecord> = HashMap::new();
        for item in self.files.iter() {
            let (_, value) = item.map_err(|e| to_storage_io("Failed to scan files", e))?;
            let record: FileRecord = decode("file record", &value)?;
            if !dirs.contains_key(&record.dir_id) {
                report.problems.push(format!(
                    "file {} belongs to missing directory {}",
                    record.id, record.dir_id
                ));
            }
            let indexed = self
                .file_names
                .get(schema::file_name_key(record.dir_id, &record.name))
                .map_err(|e| to_storage_io("Failed to read file names", e))?;
            match indexed {
                Some(bytes) if schema::decode_id(&bytes)? == record.id.0 => {}
                _ => report
                    .problems
                    .push(format!("file {} is missing from the name index", record.id)),
            }
            files.insert(record.id, record);
        }
        report.files = files.len();

        for item in self.file_names.iter() {
            let (key, value) = item.map_err(|e| to_storage_io("Failed to scan file names", e))?;
            let id = FileId(schema::decode_id(&value)?);
            match files.get(&id) {
                Some(record) if schema::file_name_key(record.dir_id, &record.name) == &key[..] => {}
                _ => report
                    .problems
                    .push(format!("name index entry for {} is dangling", id)),
            }
        }

        for item in self.identities.iter() {
            let (key, value) = item.map_err(|e| to_storage_io("Failed to scan identities", e))?;
            let entry = schema::decode_entry_ref(&value)?;
            let held = match entry {
                EntryRef::Directory(id) => dirs.get(&id).and_then(|r| r.identity),
                EntryRef::File(id) => files.get(&id).and_then(|r| r.identity),
            };
            match held {
                Some(token) if token.to_key().as_slice() == &key[..] => {}
                _ => report
                    .problems
                    .push(format!("identity index entry for {:?} is stale", entry)),
            }
        }

        Ok(report)
    }
}

impl CatalogStore for SledCatalog {
    #[instrument(skip(self), level = "debug")]
    fn create_directory(&self, parent: Option<DirId>, name: &str) -> Result<DirectoryRecord, CatalogError> {
        validate_name(name)?;
        let _guard = self.write_lock.lock();

        let chain = match parent {
            Some(parent_id) => {
                self.require_directory(parent_id)?;
                self.ancestor_rows(parent_id)?
            }
            None => Vec::new(),
        };
        if self.find_directory_by_parent_and_name(parent, name)?.is_some() {
            return Err(CatalogError::InvariantViolation(format!(
                "directory {:?} already exists under {}",
                name,
                parent.map(|p| p.to_string()).unwrap_or_else(|| "the top level".to_string())
            )));
        }

        let id = DirId(self.next_id()?);
        let record = DirectoryRecord {
            id,
            name: name.to_string(),
            identity: None,
            created_at_ms: now_millis(),
        };

        let mut writes = WriteSet::default();
        writes.put(Slot::Dirs, &id.to_be_bytes(), encode("directory record", &record)?);
        match parent {
            Some(parent) => writes.put(
                Slot::DirNames,
                &schema::dir_name_key(parent, name),
                id.to_be_bytes().to_vec(),
            ),
            None => writes.put(Slot::Roots, name.as_bytes(), id.to_be_bytes().to_vec()),
        }
        for row in closure::rows_for_new_directory(id, &chain) {
            writes.put_row(&row);
        }
        self.commit(&writes)?;

        debug!(dir = %id, "Created directory");
        Ok(record)
    }

    #[instrument(skip(self), level = "debug")]
    fn create_file(&self, dir: DirId, name: &str, size: u64, mtime_ns: i64) -> Result<FileRecord, CatalogError> {
        validate_name(name)?;
        let _guard = self.write_lock.lock();

        self.require_directory(dir)?;
        if self.find_file_by_parent_and_name(dir, name)?.is_some() {
            return Err(CatalogError::InvariantViolation(format!(
                "file {:?} already exists in {}",
                name, dir
            )));
        }

        let record = FileRecord {
            id: FileId(self.next_id()?),
            dir_id: dir,
            name: name.to_string(),
            size,
            mtime_ns,
            content_hash: None,
            hash_algorithm: None,
            identity: None,
            updated_at_ms: now_millis(),
        };

        let mut writes = WriteSet::default();
        writes.put(Slot::Files, &record.id.to_be_bytes(), encode("file record", &record)?);
        writes.put(
            Slot::FileNames,
            &schema::file_name_key(dir, name),
            record.id.to_be_bytes().to_vec(),
        );
        self.commit(&writes)?;

        debug!(file = %record.id, "Created file");
        Ok(record)
    }

    fn set_file_hash(
        &self,
        file: FileId,
        hash: &str,
        algorithm: HashAlgorithm,
        size: u64,
        mtime_ns: i64,
    ) -> Result<FileRecord, CatalogError> {
        let _guard = self.write_lock.lock();

        let mut record = self.require_file(file)?;
        record.content_hash = Some(hash.to_string());
        record.hash_algorithm = Some(algorithm);
        record.size = size;
        record.mtime_ns = mtime_ns;
        record.updated_at_ms = now_millis();

        let mut writes = WriteSet::default();
        writes.put(Slot::Files, &file.to_be_bytes(), encode("file record", &record)?);
        self.commit(&writes)?;
        Ok(record)
    }

    #[instrument(skip(self), level = "debug")]
    fn delete_directory_subtree(&self, dir: DirId) -> Result<SubtreeRemoval, CatalogError> {
        let _guard = self.write_lock.lock();

        self.require_directory(dir)?;
        let mut removal = SubtreeRemoval::default();
        let mut writes = WriteSet::default();

        for (member, _) in self.subtree(dir)? {
            let record = self.get_directory(member)?.ok_or_else(|| {
                CatalogError::InvariantViolation(format!(
                    "closure row under {} references missing directory {}",
                    dir, member
                ))
            })?;
            writes.remove(Slot::Dirs, &member.to_be_bytes());
            if let Some(token) = record.identity {
                self.stage_identity_release(&mut writes, token, EntryRef::Directory(member))?;
            }
            let rows = self.ancestor_rows(member)?;
            let parent = rows.iter().find(|row| row.depth == 1).map(|row| row.ancestor);
            self.stage_name_release(&mut writes, &record, parent)?;
            for row in rows {
                writes.remove_row(&row);
                removal.closure_rows += 1;
            }
            for file in self.files_in_directory(member)? {
                self.stage_file_removal(&mut writes, &file)?;
                removal.files += 1;
            }
            removal.directories += 1;
        }
        self.commit(&writes)?;

        debug!(
            dir = %dir,
            directories = removal.directories,
            files = removal.files,
            closure_rows = removal.closure_rows,
            "Deleted directory subtree"
        );
        Ok(removal)
    }

    fn delete_file(&self, file: FileId) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock();

        let record = self.require_file(file)?;
        let mut writes = WriteSet::default();
        self.stage_file_removal(&mut writes, &record)?;
        self.commit(&writes)?;

        debug!(file = %file, "Deleted file");
        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn relocate_directory(
        &self,
        dir: DirId,
        new_parent: DirId,
        new_name: &str,
    ) -> Result<DirectoryRecord, CatalogError> {
        validate_name(new_name)?;
        let _guard = self.write_lock.lock();

        let mut record = self.require_directory(dir)?;
        self.require_directory(new_parent)?;

        let subtree = self.subtree(dir)?;
        if subtree.iter().any(|(member, _)| *member == new_parent) {
            return Err(CatalogError::Cycle { dir, new_parent });
        }
        if let Some(existing) = self.find_directory_by_parent_and_name(Some(new_parent), new_name)? {
            if existing.id != dir {
                return Err(CatalogError::InvariantViolation(format!(
                    "directory {:?} already exists under {}",
                    new_name, new_parent
                )));
            }
        }

        let mut subtree_rows = Vec::new();
        for (member, _) in &subtree {
            subtree_rows.extend(self.ancestor_rows(*member)?);
        }
        let new_chain = self.ancestor_rows(new_parent)?;
        let new_rows = closure::rows_for_moved_subtree(&subtree, &subtree_rows, &new_chain);

        let mut writes = WriteSet::default();
        for row in &subtree_rows {
            writes.remove_row(row);
        }
        for row in &new_rows {
            writes.put_row(row);
        }
        self.stage_name_release(&mut writes, &record, self.parent_of(dir)?)?;
        record.name = new_name.to_string();
        writes.put(
            Slot::DirNames,
            &schema::dir_name_key(new_parent, new_name),
            dir.to_be_bytes().to_vec(),
        );
        writes.put(Slot::Dirs, &dir.to_be_bytes(), encode("directory record", &record)?);
        self.commit(&writes)?;

        debug!(
            dir = %dir,
            new_parent = %new_parent,
            subtree = subtree.len(),
            rows = new_rows.len(),
            "Moved directory"
        );
        Ok(record)
    }

    #[instrument(skip(self), level = "debug")]
    fn move_file(&self, file: FileId, new_dir: DirId, new_name: &str) -> Result<FileRecord, CatalogError> {
        validate_name(new_name)?;
        let _guard = self.write_lock.lock();

        let mut record = self.require_file(file)?;
        self.require_directory(new_dir)?;
        if let Some(existing) = self.find_file_by_parent_and_name(new_dir, new_name)? {
            if existing.id != file {
                return Err(CatalogError::InvariantViolation(format!(
                    "file {:?} already exists in {}",
                    new_name, new_dir
                )));
            }
        }

        let mut writes = WriteSet::default();
        writes.remove(Slot::FileNames, &schema::file_name_key(record.dir_id, &record.name));
        record.dir_id = new_dir;
        record.name = new_name.to_string();
        record.updated_at_ms = now_millis();
        writes.put(
            Slot::FileNames,
            &schema::file_name_key(new_dir, new_name),
            file.to_be_bytes().to_vec(),
        );
        writes.put(Slot::Files, &file.to_be_bytes(), encode("file record", &record)?);
        self.commit(&writes)?;

        debug!(file = %file, dir = %new_dir, "Moved file");
        Ok(record)
    }

    fn set_identity(&self, entry: EntryRef, identity: Option<IdentityToken>) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock();

        let mut writes = WriteSet::default();
        match entry {
            EntryRef::Directory(id) => {
                let mut record = self.require_directory(id)?;
                if record.identity == identity {
                    return Ok(());
                }
                self.stage_identity_change(&mut writes, entry, record.identity, identity)?;
                record.identity = identity;
                writes.put(Slot::Dirs, &id.to_be_bytes(), encode("directory record", &record)?);
            }
            EntryRef::File(id) => {
                let mut record = self.require_file(id)?;
                if record.identity == identity {
                    return Ok(());
                }
                self.stage_identity_change(&mut writes, entry, record.identity, identity)?;
                record.identity = identity;
                writes.put(Slot::Files, &id.to_be_bytes(), encode("file record", &record)?);
            }
        }
        self.commit(&writes)
    }

    fn find_by_identity(&self, identity: IdentityToken) -> Result<Option<EntryRef>, CatalogError> {
        let raw = self
            .identities
            .get(identity.to_key())
            .map_err(|e| to_storage_io("Failed to read identity index", e))?;
        raw.map(|bytes| schema::decode_entry_ref(&bytes)).transpose()
    }

    fn get_directory(&self, dir: DirId) -> Result<Option<DirectoryRecord>, CatalogError> {
        let raw = self
            .dirs
            .get(dir.to_be_bytes())
            .map_err(|e| to_storage_io("Failed to get directory record", e))?;
        raw.map(|bytes| decode("directory record", &bytes)).transpose()
    }

    fn get_file(&self, file: FileId) -> Result<Option<FileRecord>, CatalogError> {
        let raw = self
            .files
            .get(file.to_be_bytes())
            .map_err(|e| to_storage_io("Failed to get file record", e))?;
        raw.map(|bytes| decode("file record", &bytes)).transpose()
    }

    fn find_directory_by_parent_and_name(
        &self,
        parent: Option<DirId>,
        name: &str,
    ) -> Result<Option<DirectoryRecord>, CatalogError> {
        match parent {
            None => {
                let raw = self
                    .roots
                    .get(name.as_bytes())
                    .map_err(|e| to_storage_io("Failed to read roots", e))?;
                match raw {
                    Some(bytes) => self.get_directory(DirId(schema::decode_id(&bytes)?)),
                    None => Ok(None),
                }
            }
            Some(parent) => {
                let raw = self
                    .dir_names
                    .get(schema::dir_name_key(parent, name))
                    .map_err(|e| to_storage_io("Failed to read directory names", e))?;
                match raw {
                    Some(bytes) => self.get_directory(DirId(schema::decode_id(&bytes)?)),
                    None => Ok(None),
                }
            }
        }
    }

    fn find_file_by_parent_and_name(&self, dir: DirId, name: &str) -> Result<Option<FileRecord>, CatalogError> {
        let raw = self
            .file_names
            .get(schema::file_name_key(dir, name))
            .map_err(|e| to_storage_io("Failed to read file names", e))?;
        match raw {
            Some(bytes) => self.get_file(FileId(schema::decode_id(&bytes)?)),
            None => Ok(None),
        }
    }

    fn ancestor_rows(&self, dir: DirId) -> Result<Vec<ClosureRow>, CatalogError> {
        let mut rows = Vec::new();
        for item in self.closure_up.scan_prefix(dir.to_be_bytes()) {
            let (key, value) = item.map_err(|e| to_storage_io("Failed to scan ancestors", e))?;
            let (descendant, ancestor) = schema::decode_up_key(&key)?;
            rows.push(ClosureRow::new(descendant, ancestor, schema::decode_depth(&value)?));
        }
        Ok(rows)
    }

    fn descendant_rows(&self, dir: DirId, max_depth: Option<u32>) -> Result<Vec<ClosureRow>, CatalogError> {
        let max_depth = max_depth.unwrap_or(u32::MAX);
        if max_depth == 0 {
            return Ok(Vec::new());
        }
        let start = schema::down_key(dir, 1, DirId(0));
        let end = schema::down_key(dir, max_depth, DirId(u64::MAX));
        let mut rows = Vec::new();
        for item in self.closure_down.range(start..=end) {
            let (key, _) = item.map_err(|e| to_storage_io("Failed to scan descendants", e))?;
            let (ancestor, depth, descendant) = schema::decode_down_key(&key)?;
            rows.push(ClosureRow::new(descendant, ancestor, depth));
        }
        Ok(rows)
    }

    fn files_in_directory(&self, dir: DirId) -> Result<Vec<FileRecord>, CatalogError> {
        let mut records = Vec::new();
        for item in self.file_names.scan_prefix(dir.to_be_bytes()) {
            let (_, value) = item.map_err(|e| to_storage_io("Failed to scan file names", e))?;
            let id = FileId(schema::decode_id(&value)?);
            let record = self.get_file(id)?.ok_or_else(|| {
                CatalogError::InvariantViolation(format!("name index of {} references missing file {}", dir, id))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn root_directories(&self) -> Result<Vec<DirectoryRecord>, CatalogError> {
        let mut records = Vec::new();
        for item in self.roots.iter() {
            let (_, value) = item.map_err(|e| to_storage_io("Failed to scan roots", e))?;
            let id = DirId(schema::decode_id(&value)?);
            let record = self.get_directory(id)?.ok_or_else(|| {
                CatalogError::InvariantViolation(format!("root entry references missing directory {}", id))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn all_files(&self) -> Result<Vec<FileRecord>, CatalogError> {
        let mut records = Vec::new();
        for item in self.files.iter() {
            let (_, value) = item.map_err(|e| to_storage_io("Failed to scan files", e))?;
            records.push(decode("file record", &value)?);
        }
        Ok(records)
    }
}
