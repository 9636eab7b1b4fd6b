//! Content hashing for catalogued files
//!
//! Files are streamed through a [`ContentHasher`] in fixed-size chunks, so memory use does not
//! depend on file size. A digest is produced only after the whole stream has been read; a read
//! error part-way through yields an error and no digest.

use crate::error::CatalogError;
use serde::{Deserialize, Serialize};
use sha2::Digest;
use std::fmt;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

/// Default read chunk size (64 KiB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
/// Smallest accepted chunk size.
pub const MIN_CHUNK_SIZE: usize = 4 * 1024;
/// Largest accepted chunk size.
pub const MAX_CHUNK_SIZE: usize = 1024 * 1024;

/// Incremental digest capability. Implementations are interchangeable behind [`HashAlgorithm`].
pub trait ContentHasher: Send {
    fn update(&mut self, chunk: &[u8]);

    /// Consume the hasher and return the lowercase hex digest.
    fn finalize_hex(self: Box<Self>) -> String;
}

/// Supported content hash algorithms. The tag is stored alongside every digest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Sha256,
    Md5,
}

impl HashAlgorithm {
    pub fn tag(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Md5 => "md5",
        }
    }

    /// Create a fresh hasher for this algorithm.
    pub fn hasher(&self) -> Box<dyn ContentHasher> {
        match self {
            HashAlgorithm::Blake3 => Box::new(Blake3Hasher(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Box::new(Sha256Hasher(sha2::Sha256::new())),
            HashAlgorithm::Md5 => Box::new(Md5Hasher(md5::Context::new())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A hash algorithm name that is not one of the supported tags.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown hash algorithm '{0}' (expected blake3, sha256 or md5)")]
pub struct UnknownHashAlgorithm(pub String);

impl FromStr for HashAlgorithm {
    type Err = UnknownHashAlgorithm;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" | "sha-256" => Ok(HashAlgorithm::Sha256),
            "md5" => Ok(HashAlgorithm::Md5),
            _ => Err(UnknownHashAlgorithm(s.to_string())),
        }
    }
}

struct Blake3Hasher(blake3::Hasher);

impl ContentHasher for Blake3Hasher {
    fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        self.0.finalize().to_hex().to_string()
    }
}

struct Sha256Hasher(sha2::Sha256);

impl ContentHasher for Sha256Hasher {
    fn update(&mut self, chunk: &[u8]) {
        Digest::update(&mut self.0, chunk);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        let Sha256Hasher(inner) = *self;
        hex::encode(inner.finalize())
    }
}

struct Md5Hasher(md5::Context);

impl ContentHasher for Md5Hasher {
    fn update(&mut self, chunk: &[u8]) {
        self.0.consume(chunk);
    }

    fn finalize_hex(self: Box<Self>) -> String {
        let Md5Hasher(inner) = *self;
        format!("{:x}", inner.compute())
    }
}

/// Stream `reader` through `algorithm` in chunks of `chunk_size` bytes.
pub fn hash_stream<R: Read>(
    mut reader: R,
    algorithm: HashAlgorithm,
    chunk_size: usize,
) -> Result<String, CatalogError> {
    let mut hasher = algorithm.hasher();
    let mut buf = vec![0u8; chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE)];
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(CatalogError::Io(e)),
        };
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize_hex())
}

/// Hashes file content with a fixed algorithm and chunk size.
///
/// Stateless apart from a counter of completed digests, which lets callers observe how much
/// hashing a reconciliation pass actually performed.
#[derive(Debug)]
pub struct HashEngine {
    algorithm: HashAlgorithm,
    chunk_size: usize,
    computed: AtomicU64,
}

impl HashEngine {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self::with_chunk_size(algorithm, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(algorithm: HashAlgorithm, chunk_size: usize) -> Self {
        Self {
            algorithm,
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
            computed: AtomicU64::new(0),
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Number of digests completed by this engine.
    pub fn computations(&self) -> u64 {
        self.computed.load(Ordering::Relaxed)
    }

    pub fn hash_reader<R: Read>(&self, reader: R) -> Result<String, CatalogError> {
        let digest = hash_stream(reader, self.algorithm, self.chunk_size)?;
        self.computed.fetch_add(1, Ordering::Relaxed);
        Ok(digest)
    }

    pub fn hash_file(&self, path: &Path) -> Result<String, CatalogError> {
        let file = File::open(path)?;
        self.hash_reader(file)
    }
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::new(HashAlgorithm::default())
    }
}
