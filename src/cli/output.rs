//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::{ApiError, CatalogError};

/// Map domain/service errors to a string for CLI output.
pub fn map_error(e: &ApiError) -> String {
    match e {
        ApiError::Catalog(CatalogError::SchemaVersion { .. }) => {
            format!("{} Upgrade scout to open this catalog.", e)
        }
        ApiError::Catalog(CatalogError::NotACatalog(path)) => format!(
            "{} is not a scout catalog. Pass --catalog with a catalog directory or run `scout init`.",
            path.display()
        ),
        _ => e.to_string(),
    }
}
