//! Catalog browsing presentation: path, ls, tree, ancestors, find.

use super::to_json;
use crate::error::ApiError;
use crate::query::DirectoryEntry;
use crate::store::{DirectoryRecord, FileRecord};
use crate::types::EntryKind;
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;
use serde::Serialize;

/// A resolved catalog entry.
#[derive(Debug, Clone, Serialize)]
pub struct EntryPathView {
    pub path: String,
    pub kind: EntryKind,
    pub id: u64,
}

/// Contents of one directory.
#[derive(Debug, Clone, Serialize)]
pub struct ListingView {
    pub path: String,
    pub directories: Vec<DirectoryRecord>,
    pub files: Vec<FileRecord>,
}

fn short_hash(hash: Option<&str>) -> String {
    match hash {
        Some(hash) if hash.len() > 12 => format!("{}…", &hash[..12]),
        Some(hash) => hash.to_string(),
        None => "-".to_string(),
    }
}

pub fn format_entry_path(view: &EntryPathView, format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return to_json(view);
    }
    let prefix = match view.kind {
        EntryKind::Directory => "d",
        EntryKind::File => "f",
    };
    Ok(format!("{}\t{}{}", view.path, prefix, view.id))
}

pub fn format_listing(view: &ListingView, format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return to_json(view);
    }
    if view.directories.is_empty() && view.files.is_empty() {
        return Ok(format!("{} is empty.", view.path));
    }

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Name", "Size", "Hash"]);
    for dir in &view.directories {
        table.add_row(vec![format!("{}/", dir.name), String::new(), String::new()]);
    }
    for file in &view.files {
        table.add_row(vec![
            file.name.clone(),
            file.size.to_string(),
            short_hash(file.content_hash.as_deref()),
        ]);
    }
    Ok(format!("{}\n{}", view.path.bold(), table))
}

/// Render descendants as an indented outline under `path`.
pub fn format_tree(
    path: &str,
    entries: &[(String, DirectoryEntry)],
    format: &str,
) -> Result<String, ApiError> {
    if format == "json" {
        let rows: Vec<serde_json::Value> = entries
            .iter()
            .map(|(path, entry)| {
                serde_json::json!({
                    "path": path,
                    "id": entry.record.id,
                    "depth": entry.depth,
                })
            })
            .collect();
        return to_json(&serde_json::json!({ "root": path, "directories": rows }));
    }
    let mut lines = vec![path.to_string()];
    for (_, entry) in entries {
        let indent = "  ".repeat(entry.depth as usize);
        lines.push(format!("{}{}/", indent, entry.record.name));
    }
    Ok(lines.join("\n"))
}

pub fn format_ancestors(entries: &[DirectoryEntry], format: &str) -> Result<String, ApiError> {
    if format == "json" {
        return to_json(entries);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Depth", "Id", "Name"]);
    for entry in entries {
        table.add_row(vec![
            entry.depth.to_string(),
            entry.record.id.to_string(),
            entry.record.name.clone(),
        ]);
    }
    Ok(table.to_string())
}

/// Files found by `scout find`, each paired with its catalog path.
pub fn format_file_matches(
    matches: &[(String, FileRecord)],
    format: &str,
) -> Result<String, ApiError> {
    if format == "json" {
        let rows: Vec<serde_json::Value> = matches
            .iter()
            .map(|(path, file)| {
                serde_json::json!({
                    "path": path,
                    "id": file.id,
                    "size": file.size,
                    "content_hash": file.content_hash,
                    "hash_algorithm": file.hash_algorithm,
                })
            })
            .collect();
        return to_json(&rows);
    }
    if matches.is_empty() {
        return Ok("No matching files.".to_string());
    }
    Ok(matches
        .iter()
        .map(|(path, _)| path.as_str())
        .collect::<Vec<_>>()
        .join("\n"))
}
