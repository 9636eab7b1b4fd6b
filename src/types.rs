//! Shared identifier and value types for the catalog.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a catalogued directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DirId(pub u64);

/// Identity of a catalogued file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u64);

impl DirId {
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl FileId {
    pub fn to_be_bytes(self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for DirId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Kind of a filesystem entry as seen by the walker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Directory,
    File,
}

/// Reference to either kind of catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryRef {
    Directory(DirId),
    File(FileId),
}

impl EntryRef {
    pub fn kind(&self) -> EntryKind {
        match self {
            EntryRef::Directory(_) => EntryKind::Directory,
            EntryRef::File(_) => EntryKind::File,
        }
    }
}

/// Platform-stable identity of a filesystem object (device + inode on unix).
///
/// Supplied by the walker when available; used only to recognise moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityToken {
    pub device: u64,
    pub inode: u64,
}

impl IdentityToken {
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }

    pub fn to_key(self) -> [u8; 16] {
        let mut key = [0u8; 16];
        key[..8].copy_from_slice(&self.device.to_be_bytes());
        key[8..].copy_from_slice(&self.inode.to_be_bytes());
        key
    }
}

/// Milliseconds since the unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
