//! CLI route: single route table and run context. Dispatches to the catalog, reconciler and
//! query facade, then hands results to presentation.

use crate::cli::parse::{Cli, Commands};
use crate::cli::presentation::{
    format_ancestors, format_check, format_entry_path, format_file_matches, format_init_summary,
    format_listing, format_status, format_sync_summary, format_tree, EntryPathView, InitSummary,
    ListingView, StatusView,
};
use crate::config::{workspace_config_path, ConfigLoader, ScanConfig, ScoutConfig};
use crate::error::ApiError;
use crate::query::CatalogQuery;
use crate::reconcile::{CancelToken, ReconcileOptions, Reconciler};
use crate::store::{FileRecord, SledCatalog};
use crate::tree::path;
use crate::tree::walker::Walker;
use crate::types::{DirId, EntryKind, EntryRef};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

/// Directory a command operates on: `init <target>` overrides `--root`.
pub fn command_root(cli: &Cli) -> PathBuf {
    match &cli.command {
        Commands::Init {
            target: Some(target),
            ..
        } => target.clone(),
        _ => cli.root.clone(),
    }
}

fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Init { .. } => "init",
        Commands::Sync { .. } => "sync",
        Commands::Path { .. } => "path",
        Commands::Ls { .. } => "ls",
        Commands::Tree { .. } => "tree",
        Commands::Ancestors { .. } => "ancestors",
        Commands::Find { .. } => "find",
        Commands::Status { .. } => "status",
        Commands::Check { .. } => "check",
    }
}

/// Runtime context for CLI execution: catalog root, catalog location and loaded config.
/// Built from the root and optional overrides using ConfigLoader only.
pub struct RunContext {
    root: PathBuf,
    catalog_path: PathBuf,
    config: ScoutConfig,
}

impl RunContext {
    /// Create a run context. `catalog` overrides the configured catalog location and `config`
    /// adds an explicit configuration file above the global and workspace files.
    pub fn new(
        root: PathBuf,
        catalog: Option<PathBuf>,
        config_path: Option<PathBuf>,
    ) -> Result<Self, ApiError> {
        let root = path::canonicalize_root(&root)?;
        let config = ConfigLoader::load_with(&root, config_path.as_deref())?;
        config.validate().map_err(|errors| {
            ApiError::ConfigError(
                errors
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;
        let catalog_path = catalog.unwrap_or_else(|| config.catalog.resolve(&root));
        debug!(root = %root.display(), catalog = %catalog_path.display(), "Run context ready");
        Ok(Self {
            root,
            catalog_path,
            config,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_path(&self) -> &Path {
        &self.catalog_path
    }

    pub fn config(&self) -> &ScoutConfig {
        &self.config
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let started = Instant::now();
        let result = self.execute_inner(command);
        info!(
            command = command_name(command),
            ok = result.is_ok(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        result
    }

    fn execute_inner(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Init { force, .. } => self.handle_init(*force),
            Commands::Sync { workers, format } => self.handle_sync(*workers, format),
            Commands::Path { target, format } => {
                let catalog = self.open_catalog()?;
                let root = self.tracked_root(&catalog)?;
                let query = CatalogQuery::new(&catalog);
                let view = match self.resolve_entry(&query, &root, target)? {
                    EntryRef::Directory(id) => EntryPathView {
                        path: query.materialize_path(id)?,
                        kind: EntryKind::Directory,
                        id: id.0,
                    },
                    EntryRef::File(id) => EntryPathView {
                        path: query.file_path(id)?,
                        kind: EntryKind::File,
                        id: id.0,
                    },
                };
                format_entry_path(&view, format)
            }
            Commands::Ls { target, format } => {
                let catalog = self.open_catalog()?;
                let root = self.tracked_root(&catalog)?;
                let query = CatalogQuery::new(&catalog);
                let dir = self.resolve_directory(&query, &root, target.as_deref())?;
                let view = ListingView {
                    path: query.materialize_path(dir)?,
                    directories: query.list_children(dir)?,
                    files: query.list_files(dir)?,
                };
                format_listing(&view, format)
            }
            Commands::Tree {
                target,
                max_depth,
                format,
            } => {
                let catalog = self.open_catalog()?;
                let root = self.tracked_root(&catalog)?;
                let query = CatalogQuery::new(&catalog);
                let dir = self.resolve_directory(&query, &root, target.as_deref())?;
                let top = query.materialize_path(dir)?;
                let mut entries = query
                    .list_descendants(dir, *max_depth)?
                    .into_iter()
                    .map(|entry| Ok((query.materialize_path(entry.record.id)?, entry)))
                    .collect::<Result<Vec<_>, ApiError>>()?;
                // Sorting by path bytes gives a depth-first outline.
                entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
                format_tree(&top, &entries, format)
            }
            Commands::Ancestors { target, format } => {
                let catalog = self.open_catalog()?;
                let root = self.tracked_root(&catalog)?;
                let query = CatalogQuery::new(&catalog);
                let dir = self.resolve_directory(&query, &root, Some(target.as_path()))?;
                format_ancestors(&query.list_ancestors(dir)?, format)
            }
            Commands::Find {
                hash,
                unhashed,
                format,
            } => {
                let catalog = self.open_catalog()?;
                let query = CatalogQuery::new(&catalog);
                let files = match (hash, unhashed) {
                    (Some(digest), _) => query.find_files_by_hash(digest)?,
                    (None, true) => query.list_unhashed_files()?,
                    (None, false) => {
                        return Err(ApiError::InvalidArgument(
                            "find needs --hash <digest> or --unhashed".to_string(),
                        ))
                    }
                };
                let mut matches = files
                    .into_iter()
                    .map(|file| Ok((query.file_path(file.id)?, file)))
                    .collect::<Result<Vec<(String, FileRecord)>, ApiError>>()?;
                matches.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
                format_file_matches(&matches, format)
            }
            Commands::Status { format } => {
                let catalog = self.open_catalog()?;
                let view = StatusView {
                    root: catalog.root()?,
                    catalog: self.catalog_path.clone(),
                    schema_version: catalog.schema_version()?,
                    created_at_ms: catalog.created_at_ms()?,
                    stats: catalog.stats()?,
                };
                format_status(&view, format)
            }
            Commands::Check { format } => {
                let catalog = self.open_catalog()?;
                let report = catalog.verify_integrity()?;
                format_check(&report, format)
            }
        }
    }

    fn handle_init(&self, force: bool) -> Result<String, ApiError> {
        let existed = self.catalog_path.exists();
        if existed && !force {
            return Err(ApiError::InvalidArgument(format!(
                "a catalog already exists at {}; pass --force to re-initialize it",
                self.catalog_path.display()
            )));
        }
        if existed {
            std::fs::remove_dir_all(&self.catalog_path).map_err(crate::error::CatalogError::from)?;
        }

        let config_file = workspace_config_path(&self.root);
        let config_written = if config_file.exists() {
            None
        } else {
            write_starter_config(&config_file, &self.config.scan)?;
            Some(config_file)
        };

        if let Some(parent) = self.catalog_path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::CatalogError::from)?;
        }
        let catalog = SledCatalog::open(&self.catalog_path)?;
        catalog.set_root(&self.root)?;
        catalog.close()?;
        info!(root = %self.root.display(), catalog = %self.catalog_path.display(), "Initialized catalog");

        Ok(format_init_summary(&InitSummary {
            root: self.root.clone(),
            catalog: self.catalog_path.clone(),
            config_written,
            reinitialized: existed,
        }))
    }

    fn handle_sync(&self, workers: Option<usize>, format: &str) -> Result<String, ApiError> {
        let catalog = self.open_catalog()?;
        let root = self.tracked_root(&catalog)?;
        let mut walker_config = self.config.scan.walker_config();
        walker_config.excluded_paths.push(
            dunce::canonicalize(&self.catalog_path).unwrap_or_else(|_| self.catalog_path.clone()),
        );
        let walker = Walker::with_config(root, walker_config);
        let engine = self.config.scan.hash_engine();
        let options = ReconcileOptions {
            hash_workers: workers.unwrap_or(self.config.scan.hash_workers),
            cancel: CancelToken::new(),
        };
        let summary = Reconciler::with_options(&catalog, &engine, options).run(walker.entries())?;
        catalog.flush()?;
        format_sync_summary(&summary, format)
    }

    fn open_catalog(&self) -> Result<SledCatalog, ApiError> {
        if !self.catalog_path.exists() {
            return Err(ApiError::CatalogMissing(self.catalog_path.clone()));
        }
        Ok(SledCatalog::open(&self.catalog_path)?)
    }

    /// The root recorded in the catalog, falling back to the context root.
    fn tracked_root(&self, catalog: &SledCatalog) -> Result<PathBuf, ApiError> {
        Ok(catalog.root()?.unwrap_or_else(|| self.root.clone()))
    }

    fn resolve_entry(
        &self,
        query: &CatalogQuery<'_, SledCatalog>,
        root: &Path,
        target: &Path,
    ) -> Result<EntryRef, ApiError> {
        let absolute;
        let target_path = if target.is_absolute() {
            // Canonicalize so symlinked spellings of the root still map inside it.
            absolute = dunce::canonicalize(target).unwrap_or_else(|_| target.to_path_buf());
            absolute.as_path()
        } else {
            target
        };
        let catalog_path = path::to_catalog_path(root, target_path)?;
        query
            .resolve_path(&catalog_path)?
            .ok_or_else(|| ApiError::PathNotInCatalog(target.to_path_buf()))
    }

    fn resolve_directory(
        &self,
        query: &CatalogQuery<'_, SledCatalog>,
        root: &Path,
        target: Option<&Path>,
    ) -> Result<DirId, ApiError> {
        match self.resolve_entry(query, root, target.unwrap_or(Path::new(".")))? {
            EntryRef::Directory(id) => Ok(id),
            EntryRef::File(_) => Err(ApiError::InvalidArgument(format!(
                "{} is a file, not a directory",
                target.unwrap_or(Path::new(".")).display()
            ))),
        }
    }
}

#[derive(Serialize)]
struct StarterConfig<'a> {
    scan: &'a ScanConfig,
}

fn write_starter_config(path: &Path, scan: &ScanConfig) -> Result<(), ApiError> {
    let body = toml::to_string_pretty(&StarterConfig { scan })
        .map_err(|e| ApiError::ConfigError(format!("Failed to encode starter config: {}", e)))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(crate::error::CatalogError::from)?;
    }
    std::fs::write(path, body).map_err(crate::error::CatalogError::from)?;
    Ok(())
}
