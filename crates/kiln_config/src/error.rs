//! Errors raised while loading `kiln.toml`.

use std::path::PathBuf;

use kiln_common::Guid;

/// Why a project configuration could not be loaded.
///
/// Every variant names the file, key or asset it concerns so the CLI can
/// print it without further context.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read {path}: {source}")]
    Io {
        /// The file that was read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The text is not valid TOML or does not match the schema.
    #[error("malformed kiln.toml: {reason}")]
    Parse {
        /// Parser message, including the location.
        reason: String,
    },

    /// A key that must have a value is empty or absent.
    #[error("`{key}` must be set")]
    MissingField {
        /// Dotted key path, e.g. `project.name`.
        key: String,
    },

    /// A key has a value outside its allowed range.
    #[error("`{key}` is invalid: {reason}")]
    InvalidValue {
        /// Dotted key path.
        key: String,
        /// What is wrong with the value.
        reason: String,
    },

    /// Two `[[asset]]` tables declare the same GUID.
    #[error("asset {guid} is declared more than once")]
    DuplicateAsset {
        /// The repeated GUID.
        guid: Guid,
    },

    /// An `[[asset]]` table lacks a key its type requires.
    #[error("asset {guid} of type '{asset_type}' needs `{key}`")]
    IncompleteAsset {
        /// The asset.
        guid: Guid,
        /// Its declared type.
        asset_type: String,
        /// The missing key.
        key: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_key() {
        let err = ConfigError::MissingField {
            key: "project.name".to_string(),
        };
        assert_eq!(err.to_string(), "`project.name` must be set");

        let err = ConfigError::InvalidValue {
            key: "cache.remote.port".to_string(),
            reason: "must not be 0".to_string(),
        };
        assert_eq!(err.to_string(), "`cache.remote.port` is invalid: must not be 0");
    }

    #[test]
    fn asset_errors_carry_the_guid() {
        let guid = Guid::from_u128(7);
        let err = ConfigError::IncompleteAsset {
            guid,
            asset_type: "raw".to_string(),
            key: "file",
        };
        assert_eq!(
            err.to_string(),
            format!("asset {guid} of type 'raw' needs `file`")
        );
        assert!(ConfigError::DuplicateAsset { guid }
            .to_string()
            .contains(&guid.to_string()));
    }

    #[test]
    fn io_error_names_the_path() {
        let err = ConfigError::Io {
            path: PathBuf::from("demo/kiln.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
        };
        assert!(err.to_string().starts_with("cannot read demo/kiln.toml:"));
    }
}
