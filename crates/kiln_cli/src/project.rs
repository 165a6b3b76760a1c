//! Project discovery and wiring of the build collaborators from `kiln.toml`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use kiln_cache::{
    CacheAccess, LayeredPipelineCache, LocalPipelineCache, RemoteCacheOptions,
    RemotePipelineCache,
};
use kiln_common::Guid;
use kiln_config::{KilnConfig, CONFIG_FILE};
use kiln_db::{DbLocation, PipelineDb};
use kiln_pipeline::{MemorySourceDatabase, PipelineRegistry, SourceAsset};
use tracing::{debug, info};

use crate::pipelines;
use crate::GlobalArgs;

/// Walks up from `start` looking for `kiln.toml`.
pub fn find_project_root(start: &Path) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let mut current = start.to_path_buf();
    loop {
        if current.join(CONFIG_FILE).exists() {
            return Ok(current);
        }
        if !current.pop() {
            return Err(format!(
                "could not find {CONFIG_FILE} in {} or any parent directory",
                start.display()
            )
            .into());
        }
    }
}

/// Resolves the configuration file from global CLI args.
///
/// `--config` may name the file or its directory. Without it the current
/// directory and its parents are searched.
pub fn resolve_config_path(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match global.config {
        Some(ref config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_dir() {
                Ok(p.join(CONFIG_FILE))
            } else {
                Ok(p)
            }
        }
        None => Ok(find_project_root(&std::env::current_dir()?)?.join(CONFIG_FILE)),
    }
}

/// A loaded project: its directory and validated configuration.
pub struct Project {
    /// Directory containing `kiln.toml`; relative config paths resolve here.
    pub dir: PathBuf,
    /// The validated configuration.
    pub config: KilnConfig,
}

impl Project {
    /// Locates and loads the project selected by the global args.
    pub fn load(global: &GlobalArgs) -> Result<Self, Box<dyn std::error::Error>> {
        let path = resolve_config_path(global)?;
        let config = kiln_config::load_config_file(&path)?;
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        info!(
            project = %config.project.name,
            assets = config.assets.len(),
            "loaded {}",
            path.display()
        );
        Ok(Self { dir, config })
    }

    /// Base directory of `raw` asset files.
    pub fn asset_root(&self) -> PathBuf {
        self.dir.join(&self.config.project.root)
    }

    /// Source database holding every declared asset.
    ///
    /// An asset's payload is its declaration serialized as JSON.
    pub fn sources(&self) -> Result<MemorySourceDatabase, Box<dyn std::error::Error>> {
        let sources = MemorySourceDatabase::new();
        for decl in &self.config.assets {
            let payload = serde_json::to_vec(decl)?;
            sources.insert(SourceAsset::new(decl.guid, decl.asset_type.clone(), payload));
        }
        Ok(sources)
    }

    /// Pipelines of the built-in asset kinds.
    pub fn registry(&self) -> PipelineRegistry {
        pipelines::registry()
    }

    /// Connection string with file paths made relative to the project.
    pub fn db_connection(&self) -> Result<String, kiln_db::DbError> {
        match self.config.database.connection.parse::<DbLocation>()? {
            DbLocation::Memory => Ok("memory:".to_string()),
            DbLocation::File(path) => Ok(format!("file:{}", self.dir.join(path).display())),
        }
    }

    /// Opens the pipeline database.
    pub fn open_db(&self) -> Result<PipelineDb, Box<dyn std::error::Error>> {
        let connection = self.db_connection()?;
        debug!(connection = %connection, "opening pipeline database");
        Ok(PipelineDb::open_with(&connection)?)
    }

    /// The enabled cache backends, local first.
    pub fn cache(&self) -> LayeredPipelineCache {
        let mut layers = LayeredPipelineCache::new();
        let local = &self.config.cache.local;
        if local.enabled {
            let access = CacheAccess {
                read: local.read,
                write: local.write,
            };
            layers.push(Arc::new(LocalPipelineCache::with_access(
                &self.dir.join(&local.path),
                access,
            )));
        }
        let remote = &self.config.cache.remote;
        if remote.enabled {
            let mut options = RemoteCacheOptions::new(format!("{}:{}", remote.host, remote.port));
            options.access = CacheAccess {
                read: remote.read,
                write: remote.write,
            };
            options.connect_timeout = Duration::from_millis(remote.connect_timeout_ms);
            options.io_timeout = Duration::from_millis(remote.io_timeout_ms);
            options.retry_delay = Duration::from_millis(remote.retry_delay_ms);
            layers.push(Arc::new(RemotePipelineCache::new(options)));
        }
        debug!(layers = layers.len(), "configured artifact cache");
        layers
    }

    /// The requested roots, or every declared asset when none are given.
    pub fn roots(&self, guids: &[Guid]) -> Vec<Guid> {
        if guids.is_empty() {
            self.config.assets.iter().map(|a| a.guid).collect()
        } else {
            guids.to_vec()
        }
    }
}
