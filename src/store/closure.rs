//! Ancestor-closure row derivation
//!
//! Pure functions over [`ClosureRow`] sets. The persistence layer reads the rows it needs,
//! asks this module what the new row set must be, and writes the difference in one
//! transaction.

use crate::error::CatalogError;
use crate::store::ClosureRow;
use crate::types::DirId;
use std::collections::HashSet;

/// Rows for a directory created under a parent whose ancestor chain is `parent_chain`
/// (every row with `descendant == parent`, including the parent's self row).
///
/// With no parent the result is the single self row.
pub fn rows_for_new_directory(id: DirId, parent_chain: &[ClosureRow]) -> Vec<ClosureRow> {
    let mut rows = Vec::with_capacity(parent_chain.len() + 1);
    rows.push(ClosureRow::new(id, id, 0));
    for row in parent_chain {
        rows.push(ClosureRow::new(id, row.ancestor, row.depth + 1));
    }
    rows
}

/// Re-derive the rows of a moved subtree.
///
/// `subtree_rows` are the current rows whose descendant lies in the subtree (the moved root
/// included). `subtree` maps each member to its depth below the moved root. `new_parent_chain`
/// is the chain of the destination parent. Rows internal to the subtree keep their relative
/// depth; rows above it are rebuilt from the destination chain.
pub fn rows_for_moved_subtree(
    subtree: &[(DirId, u32)],
    subtree_rows: &[ClosureRow],
    new_parent_chain: &[ClosureRow],
) -> Vec<ClosureRow> {
    let members: HashSet<DirId> = subtree.iter().map(|(id, _)| *id).collect();
    let mut rows: Vec<ClosureRow> = subtree_rows
        .iter()
        .filter(|row| members.contains(&row.ancestor))
        .copied()
        .collect();
    for (member, depth_below_root) in subtree {
        for above in new_parent_chain {
            rows.push(ClosureRow::new(
                *member,
                above.ancestor,
                depth_below_root + 1 + above.depth,
            ));
        }
    }
    rows
}

/// Order a directory's ancestor rows root-first and check them.
///
/// The rows must contain exactly one self row at depth 0 and one row for every depth up to
/// the deepest one; anything else means the closure relation is corrupt.
pub fn ordered_chain(dir: DirId, mut rows: Vec<ClosureRow>) -> Result<Vec<ClosureRow>, CatalogError> {
    if rows.is_empty() {
        return Err(CatalogError::DirectoryNotFound(dir));
    }
    rows.sort_by(|a, b| b.depth.cmp(&a.depth));
    let deepest = rows[0].depth as usize;
    if deepest + 1 != rows.len() {
        return Err(CatalogError::InvariantViolation(format!(
            "directory {} has {} ancestor rows but its deepest ancestor is at depth {}",
            dir,
            rows.len(),
            deepest
        )));
    }
    for (i, row) in rows.iter().enumerate() {
        let expected = (deepest - i) as u32;
        if row.descendant != dir || row.depth != expected {
            return Err(CatalogError::InvariantViolation(format!(
                "ancestor chain of {} is broken at depth {}",
                dir, expected
            )));
        }
    }
    let last = rows[rows.len() - 1];
    if last.ancestor != dir {
        return Err(CatalogError::InvariantViolation(format!(
            "directory {} has no self row",
            dir
        )));
    }
    Ok(rows)
}
