//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::KilnConfig;
use std::collections::HashSet;
use std::path::Path;

/// Name of the project configuration file.
pub const CONFIG_FILE: &str = "kiln.toml";

/// Loads and validates `kiln.toml` from a project directory.
pub fn load_config(project_dir: &Path) -> Result<KilnConfig, ConfigError> {
    load_config_file(&project_dir.join(CONFIG_FILE))
}

/// Loads and validates a configuration file at an explicit path.
pub fn load_config_file(path: &Path) -> Result<KilnConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    load_config_from_str(&content)
}

/// Parses and validates a `kiln.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<KilnConfig, ConfigError> {
    let config: KilnConfig =
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates required fields and cross-field consistency.
///
/// Dependencies on GUIDs that are not declared are accepted here; they fail
/// at build time as missing sources.
fn validate_config(config: &KilnConfig) -> Result<(), ConfigError> {
    let missing = |key: &str| ConfigError::MissingField {
        key: key.to_string(),
    };
    if config.project.name.is_empty() {
        return Err(missing("project.name"));
    }
    if config.database.connection.is_empty() {
        return Err(missing("database.connection"));
    }
    if config.cache.remote.enabled && config.cache.remote.port == 0 {
        return Err(ConfigError::InvalidValue {
            key: "cache.remote.port".to_string(),
            reason: "must not be 0 while the remote cache is enabled".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for asset in &config.assets {
        if asset.guid.is_null() {
            return Err(ConfigError::InvalidValue {
                key: "asset.guid".to_string(),
                reason: "the null GUID is reserved".to_string(),
            });
        }
        if !seen.insert(asset.guid) {
            return Err(ConfigError::DuplicateAsset { guid: asset.guid });
        }
        let incomplete = |key| ConfigError::IncompleteAsset {
            guid: asset.guid,
            asset_type: asset.asset_type.clone(),
            key,
        };
        if asset.asset_type.is_empty() {
            return Err(incomplete("type"));
        }
        if asset.asset_type == "raw" && asset.file.is_none() {
            return Err(incomplete("file"));
        }
    }
    Ok(())
}
