//! Configuration System
//!
//! Layered configuration for catalog location, scanning and logging. Sources are merged in
//! order (defaults, global file, workspace file, explicit file, environment) by
//! [`ConfigLoader`]; the result is validated as a whole so every problem is reported at once.

use crate::logging::LoggingConfig;
use crate::tree::hasher::{HashAlgorithm, HashEngine, DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE};
use crate::tree::walker::WalkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;
pub use sources::global_file::global_config_path;
pub use sources::workspace_file::{workspace_config_path, STATE_DIR};

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoutConfig {
    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub scan: ScanConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the catalog database lives
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Catalog directory; relative paths are taken from the catalog root.
    /// Defaults to `<root>/.scout/catalog`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl CatalogConfig {
    pub fn resolve(&self, root: &Path) -> PathBuf {
        match &self.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => root.join(path),
            None => root.join(STATE_DIR).join("catalog"),
        }
    }
}

/// Scanning and hashing behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    #[serde(default)]
    pub algorithm: HashAlgorithm,

    /// Read chunk size in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Entry names skipped during scans (`*suffix` matches by suffix)
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Hashing threads; 0 means one per CPU
    #[serde(default)]
    pub hash_workers: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_ignore_patterns() -> Vec<String> {
    vec![STATE_DIR.to_string(), ".git".to_string()]
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            chunk_size: default_chunk_size(),
            follow_symlinks: false,
            ignore_patterns: default_ignore_patterns(),
            hash_workers: 0,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&self.chunk_size) {
            return Err(format!(
                "chunk_size {} is outside {}..={}",
                self.chunk_size, MIN_CHUNK_SIZE, MAX_CHUNK_SIZE
            ));
        }
        if self.ignore_patterns.iter().any(|p| p.trim().is_empty()) {
            return Err("ignore_patterns cannot contain empty entries".to_string());
        }
        Ok(())
    }

    pub fn walker_config(&self) -> WalkerConfig {
        WalkerConfig {
            follow_symlinks: self.follow_symlinks,
            ignore_patterns: self.ignore_patterns.clone(),
            excluded_paths: Vec::new(),
        }
    }

    pub fn hash_engine(&self) -> HashEngine {
        HashEngine::with_chunk_size(self.algorithm, self.chunk_size)
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    Scan(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Scan(msg) => write!(f, "Scan: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ScoutConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if let Err(e) = self.scan.validate() {
            errors.push(ValidationError::Scan(e));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
