//! Merge rules: defaults, override order, conflict handling.
//!
//! Later sources win key by key: defaults < global file < workspace file < explicit file <
//! environment.

use crate::tree::hasher::DEFAULT_CHUNK_SIZE;
use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("scan.algorithm", "blake3")?
        .set_default("scan.chunk_size", DEFAULT_CHUNK_SIZE as i64)?
        .set_default("scan.follow_symlinks", false)?
        .set_default("scan.ignore_patterns", vec![".scout", ".git"])?
        .set_default("scan.hash_workers", 0i64)?
        .set_default("logging.enabled", false)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
