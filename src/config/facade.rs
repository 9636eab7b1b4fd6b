//! Configuration loading entry points.

use crate::config::merge::merge_policy;
use crate::config::sources::{environment, global_file, workspace_file};
use crate::config::ScoutConfig;
use crate::error::ApiError;
use config::File;
use std::path::Path;
use tracing::debug;

/// Loads [`ScoutConfig`] from the layered sources.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration for a catalog root: defaults, global file, workspace file, environment.
    pub fn load(root: &Path) -> Result<ScoutConfig, ApiError> {
        Self::load_with(root, None)
    }

    /// Like [`ConfigLoader::load`], with an explicit file layered above the workspace file.
    pub fn load_with(root: &Path, explicit: Option<&Path>) -> Result<ScoutConfig, ApiError> {
        let mut builder = merge_policy::builder_with_defaults()?;
        builder = global_file::add_to_builder(builder)?;
        builder = workspace_file::add_to_builder(builder, root)?;
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ApiError::ConfigError(format!(
                    "Configuration file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }
        builder = environment::add_to_builder(builder);

        let config: ScoutConfig = builder.build()?.try_deserialize()?;
        debug!(root = %root.display(), algorithm = %config.scan.algorithm, "Loaded configuration");
        Ok(config)
    }
}
