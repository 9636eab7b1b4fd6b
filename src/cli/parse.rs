//! CLI parse: clap types for scout. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Scout CLI - File-tree catalog with constant-time hierarchy queries
#[derive(Parser)]
#[command(name = "scout")]
#[command(about = "Catalog a directory tree, keep it in sync and query its hierarchy")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Catalog root directory
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Catalog database directory (default: <root>/.scout/catalog)
    #[arg(long)]
    pub catalog: Option<PathBuf>,

    /// Additional configuration file, applied after global and workspace files
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Enable logging to stderr at debug level (default: off)
    #[arg(long, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr)
    #[arg(long)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a catalog for a directory and write a starter config
    Init {
        /// Directory to catalog (default: --root)
        target: Option<PathBuf>,
        /// Re-initialize even if a catalog already exists
        #[arg(long)]
        force: bool,
    },
    /// Reconcile the catalog with the directory tree on disk
    Sync {
        /// Hashing threads (default: scan.hash_workers)
        #[arg(long)]
        workers: Option<usize>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the catalog path and id of an entry
    Path {
        /// Path relative to the root, or absolute inside it
        target: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the subdirectories and files of a directory
    Ls {
        /// Directory (default: the root)
        target: Option<PathBuf>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show the directories below a directory
    Tree {
        /// Directory (default: the root)
        target: Option<PathBuf>,
        /// Only descend this many levels
        #[arg(long)]
        max_depth: Option<u32>,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// List the ancestors of a directory, root first
    Ancestors {
        /// Directory
        target: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Find files by content hash, or files still waiting for one
    Find {
        /// Hex digest to search for
        #[arg(long, conflicts_with = "unhashed", required_unless_present = "unhashed")]
        hash: Option<String>,
        /// List files that have no hash yet
        #[arg(long)]
        unhashed: bool,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Show catalog statistics
    Status {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Verify the closure relation and record consistency
    Check {
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
    },
}
