//! Scout: File-Tree Catalog
//!
//! Catalogs a directory tree in an embedded store, keeps it in agreement with the filesystem
//! through incremental reconciliation passes, and answers hierarchy queries (ancestors,
//! descendants, paths) from a precomputed ancestor closure instead of recursive walks.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod query;
pub mod reconcile;
pub mod store;
pub mod tree;
pub mod types;
