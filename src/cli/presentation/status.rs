//! Status and integrity check presentation.

use super::to_json;
use crate::error::ApiError;
use crate::store::{CatalogStats, IntegrityReport};
use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;
use std::path::PathBuf;

/// Everything `scout status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub root: Option<PathBuf>,
    pub catalog: PathBuf,
    pub schema_version: u32,
    pub created_at_ms: Option<u64>,
    pub stats: CatalogStats,
}

fn format_timestamp(ms: u64) -> String {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

pub fn format_status(view: &StatusView, format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return to_json(view);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.add_row(vec![
        "Root".to_string(),
        view.root
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(not recorded)".to_string()),
    ]);
    table.add_row(vec!["Catalog".to_string(), view.catalog.display().to_string()]);
    table.add_row(vec!["Schema".to_string(), view.schema_version.to_string()]);
    if let Some(created) = view.created_at_ms {
        table.add_row(vec!["Created".to_string(), format_timestamp(created)]);
    }
    table.add_row(vec!["Directories".to_string(), view.stats.directories.to_string()]);
    table.add_row(vec!["Files".to_string(), view.stats.files.to_string()]);
    table.add_row(vec!["Unhashed files".to_string(), view.stats.unhashed_files.to_string()]);
    table.add_row(vec!["Closure rows".to_string(), view.stats.closure_rows.to_string()]);
    Ok(format!("{}\n{}", "Catalog status".bold().underline(), table))
}

pub fn format_check(report: &IntegrityReport, format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return to_json(report);
    }
    let counts = format!(
        "  Directories: {}\n  Files: {}\n  Closure rows: {}",
        report.directories, report.files, report.closure_rows
    );
    if report.is_ok() {
        return Ok(format!("Integrity check passed:\n{}", counts));
    }
    let mut out = format!(
        "Integrity check found {} problem(s):\n{}\n",
        report.problems.len(),
        counts
    );
    for problem in &report.problems {
        out.push_str(&format!("\n  - {}", problem));
    }
    Ok(out)
}
