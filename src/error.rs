//! Error types for the scout catalog.

use crate::types::{DirId, FileId};
use std::path::PathBuf;
use thiserror::Error;

/// Catalog-level errors
///
/// Structural failures (`Cycle`, `InvariantViolation`) are raised before anything is written,
/// so a failed operation never leaves a partial mutation behind.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Moving directory {dir} under {new_parent} would create a cycle")]
    Cycle { dir: DirId, new_parent: DirId },

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Transaction aborted: {0}")]
    TransactionAbort(String),

    #[error("Directory not found: {0}")]
    DirectoryNotFound(DirId),

    #[error("File not found: {0}")]
    FileNotFound(FileId),

    #[error("Unsupported catalog schema version {found} (this build supports up to {supported})")]
    SchemaVersion { found: u32, supported: u32 },

    #[error("Not a scout catalog: {0}")]
    NotACatalog(PathBuf),
}

impl CatalogError {
    /// Short machine-readable name of the error kind, used in pass summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            CatalogError::InvalidPath(_) => "invalid_path",
            CatalogError::Io(_) => "io",
            CatalogError::Cycle { .. } => "cycle",
            CatalogError::InvariantViolation(_) => "invariant_violation",
            CatalogError::TransactionAbort(_) => "transaction_abort",
            CatalogError::DirectoryNotFound(_) => "directory_not_found",
            CatalogError::FileNotFound(_) => "file_not_found",
            CatalogError::SchemaVersion { .. } => "schema_version",
            CatalogError::NotACatalog(_) => "not_a_catalog",
        }
    }
}

/// CLI and configuration errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Path not found in catalog: {0}. Run `scout sync` to update the catalog.")]
    PathNotInCatalog(PathBuf),

    #[error("No catalog found at {0}. Run `scout init` first.")]
    CatalogMissing(PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to render output: {0}")]
    Output(String),
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::ConfigError(err.to_string())
    }
}
