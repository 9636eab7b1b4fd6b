//! Filesystem side of the catalog
//!
//! Path codec, content hashing and the walker that enumerates a live directory tree.

pub mod hasher;
pub mod path;
pub mod walker;
