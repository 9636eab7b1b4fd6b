//! On-disk layout of the catalog
//!
//! One sled tree per relation. Integer ids are stored big-endian so that sled's lexicographic
//! key order matches numeric order, which turns "children of A" and "descendants of A up to
//! depth N" into plain prefix/range scans.

use crate::error::CatalogError;
use crate::store::DirectoryRecord;
use crate::types::{DirId, EntryRef, FileId};
use sled::Db;

/// Schema version written by this build.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

pub const TREE_META: &str = "meta";
pub const TREE_DIRS: &str = "dirs";
pub const TREE_ROOTS: &str = "roots";
pub const TREE_FILES: &str = "files";
pub const TREE_FILE_NAMES: &str = "file_names";
pub const TREE_CLOSURE_UP: &str = "closure_up";
pub const TREE_CLOSURE_DOWN: &str = "closure_down";
pub const TREE_IDENTITIES: &str = "identities";
/// Added in version 2: names of non-root directories under their parent.
pub const TREE_DIR_NAMES: &str = "dir_names";

pub const META_SCHEMA_VERSION: &[u8] = b"schema_version";
pub const META_ROOT: &[u8] = b"root";
pub const META_CREATED_AT: &[u8] = b"created_at_ms";

/// `closure_up` key: descendant ++ ancestor. Value is the depth.
pub fn up_key(descendant: DirId, ancestor: DirId) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&descendant.to_be_bytes());
    key[8..].copy_from_slice(&ancestor.to_be_bytes());
    key
}

/// `closure_down` key: ancestor ++ depth ++ descendant. Value is empty.
pub fn down_key(ancestor: DirId, depth: u32, descendant: DirId) -> [u8; 20] {
    let mut key = [0u8; 20];
    key[..8].copy_from_slice(&ancestor.to_be_bytes());
    key[8..12].copy_from_slice(&depth.to_be_bytes());
    key[12..].copy_from_slice(&descendant.to_be_bytes());
    key
}

pub fn decode_up_key(key: &[u8]) -> Result<(DirId, DirId), CatalogError> {
    if key.len() != 16 {
        return Err(corrupt("closure_up key", key.len()));
    }
    Ok((DirId(read_u64(&key[..8])), DirId(read_u64(&key[8..]))))
}

pub fn decode_down_key(key: &[u8]) -> Result<(DirId, u32, DirId), CatalogError> {
    if key.len() != 20 {
        return Err(corrupt("closure_down key", key.len()));
    }
    Ok((
        DirId(read_u64(&key[..8])),
        read_u32(&key[8..12]),
        DirId(read_u64(&key[12..])),
    ))
}

pub fn decode_depth(value: &[u8]) -> Result<u32, CatalogError> {
    if value.len() != 4 {
        return Err(corrupt("closure depth", value.len()));
    }
    Ok(read_u32(value))
}

/// `file_names` key: owning directory ++ name bytes.
pub fn file_name_key(dir: DirId, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + name.len());
    key.extend_from_slice(&dir.to_be_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

/// `dir_names` key: parent directory ++ name bytes.
pub fn dir_name_key(parent: DirId, name: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + name.len());
    key.extend_from_slice(&parent.to_be_bytes());
    key.extend_from_slice(name.as_bytes());
    key
}

pub fn decode_id(value: &[u8]) -> Result<u64, CatalogError> {
    if value.len() != 8 {
        return Err(corrupt("id", value.len()));
    }
    Ok(read_u64(value))
}

pub fn encode_entry_ref(entry: EntryRef) -> [u8; 9] {
    let mut out = [0u8; 9];
    let (tag, id) = match entry {
        EntryRef::Directory(DirId(id)) => (b'D', id),
        EntryRef::File(FileId(id)) => (b'F', id),
    };
    out[0] = tag;
    out[1..].copy_from_slice(&id.to_be_bytes());
    out
}

pub fn decode_entry_ref(value: &[u8]) -> Result<EntryRef, CatalogError> {
    if value.len() != 9 {
        return Err(corrupt("entry reference", value.len()));
    }
    let id = read_u64(&value[1..]);
    match value[0] {
        b'D' => Ok(EntryRef::Directory(DirId(id))),
        b'F' => Ok(EntryRef::File(FileId(id))),
        other => Err(CatalogError::InvariantViolation(format!(
            "unknown entry tag {:#x} in identity index",
            other
        ))),
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(bytes);
    u64::from_be_bytes(buf)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}

fn corrupt(what: &str, len: usize) -> CatalogError {
    CatalogError::InvariantViolation(format!("corrupt {} ({} bytes)", what, len))
}

/// A step upgrading the layout from `from` to `from + 1`.
type Migration = fn(&Db) -> Result<(), CatalogError>;

/// Registered upgrades, indexed by the version they start from.
const MIGRATIONS: &[(u32, Migration)] = &[(1, index_directory_names)];

/// Version 1 -> 2: build `dir_names` from the depth-1 closure rows.
fn index_directory_names(db: &Db) -> Result<(), CatalogError> {
    let open = |name: &str| {
        db.open_tree(name)
            .map_err(|e| storage(&format!("Failed to open tree {}", name), e))
    };
    let dirs = open(TREE_DIRS)?;
    let closure_down = open(TREE_CLOSURE_DOWN)?;
    let dir_names = open(TREE_DIR_NAMES)?;

    let mut batch = sled::Batch::default();
    for item in closure_down.iter() {
        let (key, _) = item.map_err(|e| storage("Failed to scan closure", e))?;
        let (parent, depth, child) = decode_down_key(&key)?;
        if depth != 1 {
            continue;
        }
        let raw = dirs
            .get(child.to_be_bytes())
            .map_err(|e| storage("Failed to read directory record", e))?
            .ok_or_else(|| {
                CatalogError::InvariantViolation(format!(
                    "closure row under {} references missing directory {}",
                    parent, child
                ))
            })?;
        let record: DirectoryRecord = bincode::deserialize(&raw).map_err(|e| {
            CatalogError::InvariantViolation(format!("Failed to deserialize directory record: {}", e))
        })?;
        batch.insert(dir_name_key(parent, &record.name), child.to_be_bytes().to_vec());
    }
    dir_names
        .apply_batch(batch)
        .map_err(|e| storage("Failed to write directory names", e))
}

fn storage(context: &str, err: sled::Error) -> CatalogError {
    CatalogError::Io(std::io::Error::new(
        std::io::ErrorKind::Other,
        format!("{}: {}", context, err),
    ))
}

/// Bring a catalog written at `found` up to [`CURRENT_SCHEMA_VERSION`].
///
/// Returns the version the catalog is at afterwards. Newer catalogs are refused rather than
/// guessed at.
pub fn migrate(db: &Db, found: u32) -> Result<u32, CatalogError> {
    if found > CURRENT_SCHEMA_VERSION {
        return Err(CatalogError::SchemaVersion {
            found,
            supported: CURRENT_SCHEMA_VERSION,
        });
    }
    let mut version = found;
    while version < CURRENT_SCHEMA_VERSION {
        let step = MIGRATIONS
            .iter()
            .find(|(from, _)| *from == version)
            .map(|(_, step)| *step)
            .ok_or(CatalogError::SchemaVersion {
                found,
                supported: CURRENT_SCHEMA_VERSION,
            })?;
        step(db)?;
        version += 1;
    }
    Ok(version)
}
