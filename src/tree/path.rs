//! Catalog path codec
//!
//! Catalog paths are `/`-separated sequences of name segments rooted at the catalog top level,
//! e.g. `/photos/2024/raw`. Segments are compared byte-for-byte: no case folding and no Unicode
//! normalization, so names that differ only in encoding stay distinct.

use crate::error::CatalogError;
use std::path::{Component, Path, PathBuf};

/// Separator used in catalog paths.
pub const SEPARATOR: char = '/';

fn is_separator(c: char) -> bool {
    c == SEPARATOR || c == std::path::MAIN_SEPARATOR
}

/// Decompose a catalog path into its ordered name segments.
///
/// A single leading separator is accepted (and expected for absolute catalog paths). Platform
/// separators are treated as `/`. `""` and `"/"` decompose to the empty sequence.
///
/// Fails with `InvalidPath` on null bytes, empty segments (including an empty trailing segment
/// such as `/a/b/`), and `.`/`..` segments.
pub fn decompose(path: &str) -> Result<Vec<String>, CatalogError> {
    if path.contains('\0') {
        return Err(CatalogError::InvalidPath(format!(
            "path contains a null byte: {:?}",
            path
        )));
    }

    let mut rest = path;
    if let Some(first) = rest.chars().next() {
        if is_separator(first) {
            rest = &rest[first.len_utf8()..];
        }
    }
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let mut segments = Vec::new();
    for segment in rest.split(is_separator) {
        validate_segment(segment).map_err(|reason| {
            CatalogError::InvalidPath(format!("{} in path {:?}", reason, path))
        })?;
        segments.push(segment.to_string());
    }
    Ok(segments)
}

/// Join name segments into a catalog path. The empty sequence joins to `/`.
pub fn join<S: AsRef<str>>(segments: &[S]) -> String {
    let mut out = String::new();
    for segment in segments {
        out.push(SEPARATOR);
        out.push_str(segment.as_ref());
    }
    if out.is_empty() {
        out.push(SEPARATOR);
    }
    out
}

/// Check that `name` is usable as a single catalog segment.
pub fn validate_name(name: &str) -> Result<(), CatalogError> {
    validate_segment(name).map_err(|reason| CatalogError::InvalidPath(format!("{}: {:?}", reason, name)))
}

fn validate_segment(segment: &str) -> Result<(), &'static str> {
    if segment.is_empty() {
        return Err("empty segment");
    }
    if segment.contains('\0') {
        return Err("null byte in segment");
    }
    if segment.chars().any(is_separator) {
        return Err("separator in segment");
    }
    if segment == "." || segment == ".." {
        return Err("relative segment");
    }
    Ok(())
}

/// Canonicalize a catalog root directory on disk.
///
/// Resolves symlinks and relative components (via `dunce`, which avoids UNC prefixes on
/// Windows) and requires the result to have a final name segment.
pub fn canonicalize_root(path: &Path) -> Result<PathBuf, CatalogError> {
    let canonical = dunce::canonicalize(path).map_err(|e| {
        CatalogError::InvalidPath(format!("Failed to canonicalize {}: {}", path.display(), e))
    })?;
    if root_name(&canonical).is_none() {
        return Err(CatalogError::InvalidPath(format!(
            "{} has no final name segment and cannot be a catalog root",
            canonical.display()
        )));
    }
    Ok(canonical)
}

/// The catalog name of a root directory (its final path segment).
pub fn root_name(root: &Path) -> Option<String> {
    root.file_name().and_then(|n| n.to_str()).map(str::to_string)
}

/// Map a filesystem path inside `root` to its catalog path.
///
/// Relative paths are taken as relative to `root`. The root itself maps to `/<root-name>`.
/// `..` components and paths outside the root are rejected.
pub fn to_catalog_path(root: &Path, path: &Path) -> Result<String, CatalogError> {
    let name = root_name(root).ok_or_else(|| {
        CatalogError::InvalidPath(format!("{} has no final name segment", root.display()))
    })?;

    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(CatalogError::InvalidPath(format!(
            "relative ancestor components (..) are not supported: {}",
            path.display()
        )));
    }

    let relative = if path.is_absolute() {
        path.strip_prefix(root).map_err(|_| {
            CatalogError::InvalidPath(format!(
                "{} is outside of catalog root {}",
                path.display(),
                root.display()
            ))
        })?
    } else {
        path
    };

    let mut segments = vec![name];
    for component in relative.components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or_else(|| {
                    CatalogError::InvalidPath(format!("non UTF-8 name in {}", path.display()))
                })?;
                validate_name(part)?;
                segments.push(part.to_string());
            }
            Component::CurDir => {}
            _ => {
                return Err(CatalogError::InvalidPath(format!(
                    "unsupported component in {}",
                    path.display()
                )))
            }
        }
    }
    Ok(join(&segments))
}

/// Map a catalog path back to a filesystem path under `root`.
pub fn to_fs_path(root: &Path, catalog_path: &str) -> Result<PathBuf, CatalogError> {
    let segments = decompose(catalog_path)?;
    let name = root_name(root).ok_or_else(|| {
        CatalogError::InvalidPath(format!("{} has no final name segment", root.display()))
    })?;
    match segments.split_first() {
        Some((first, rest)) if *first == name => {
            let mut out = root.to_path_buf();
            for segment in rest {
                out.push(segment);
            }
            Ok(out)
        }
        _ => Err(CatalogError::InvalidPath(format!(
            "{} is not under catalog root /{}",
            catalog_path, name
        ))),
    }
}
