//! Init and sync presentation.

use super::to_json;
use crate::error::ApiError;
use crate::reconcile::PassSummary;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::PathBuf;

/// What `scout init` set up.
#[derive(Debug, Clone, Serialize)]
pub struct InitSummary {
    pub root: PathBuf,
    pub catalog: PathBuf,
    /// Workspace config written by this run, if it did not exist yet
    pub config_written: Option<PathBuf>,
    pub reinitialized: bool,
}

pub fn format_init_summary(summary: &InitSummary) -> String {
    let mut out = if summary.reinitialized {
        String::from("Re-initialized scout catalog\n")
    } else {
        String::from("Initialized scout catalog\n")
    };
    out.push_str(&format!("  Root:    {}\n", summary.root.display()));
    out.push_str(&format!("  Catalog: {}\n", summary.catalog.display()));
    if let Some(config) = &summary.config_written {
        out.push_str(&format!("  Config:  {}\n", config.display()));
    }
    out.push_str("\nRun 'scout sync' to populate the catalog.");
    out
}

pub fn format_sync_summary(summary: &PassSummary, format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return to_json(summary);
    }
    let title = if summary.cancelled {
        "Sync cancelled"
    } else if summary.failures.is_empty() {
        "Sync complete"
    } else {
        "Sync completed with failures"
    };
    let mut out = format!("{}\n", title.bold());
    out.push_str(&format!(
        "  Directories: {} created, {} moved, {} removed\n",
        summary.directories_created, summary.directories_moved, summary.directories_removed
    ));
    out.push_str(&format!(
        "  Files:       {} created, {} moved, {} updated, {} unchanged, {} removed\n",
        summary.files_created,
        summary.files_moved,
        summary.files_updated,
        summary.files_unchanged,
        summary.files_removed
    ));
    out.push_str(&format!("  Hashed:      {}", summary.hashes_computed));
    if summary.walker_errors > 0 {
        out.push_str(&format!("\n  Unreadable:  {}", summary.walker_errors));
    }
    if !summary.failures.is_empty() {
        out.push_str(&format!("\n\nFailures ({}):", summary.failures.len()));
        for failure in &summary.failures {
            out.push_str(&format!("\n  - {} [{}]: {}", failure.path, failure.kind, failure.reason));
        }
    }
    Ok(out)
}
