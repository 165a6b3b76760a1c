//! Configuration types deserialized from `kiln.toml`.

use kiln_common::Guid;
use serde::{Deserialize, Serialize};

/// Default connection descriptor for the pipeline database.
pub const DEFAULT_DB_CONNECTION: &str = "file:.kiln/pipeline.db";

/// Default port of the remote cache server.
pub const DEFAULT_REMOTE_PORT: u16 = 21813;

/// The top-level project configuration parsed from `kiln.toml`.
#[derive(Debug, Deserialize)]
pub struct KilnConfig {
    /// Core project metadata.
    pub project: ProjectMeta,
    /// Pipeline database settings.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Artifact cache backends.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Build scheduling settings.
    #[serde(default)]
    pub build: BuildConfig,
    /// Source assets declared by the project, in declaration order.
    #[serde(default, rename = "asset")]
    pub assets: Vec<AssetDecl>,
}

/// Core project metadata.
#[derive(Debug, Deserialize)]
pub struct ProjectMeta {
    /// The project name.
    pub name: String,
    /// Directory that `raw` asset file paths are relative to.
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_root() -> String {
    ".".to_string()
}

/// Where the pipeline database lives.
#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    /// Connection descriptor: `memory:`, `file:<path>` or a bare path.
    #[serde(default = "default_connection")]
    pub connection: String,
}

fn default_connection() -> String {
    DEFAULT_DB_CONNECTION.to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            connection: default_connection(),
        }
    }
}

/// Artifact cache backends. Both may be enabled at once; the local cache is
/// consulted first.
#[derive(Debug, Default, Deserialize)]
pub struct CacheConfig {
    /// Local file-backed cache.
    #[serde(default)]
    pub local: LocalCacheConfig,
    /// Remote socket-backed cache.
    #[serde(default)]
    pub remote: RemoteCacheConfig,
}

/// Settings of the local file-backed cache.
#[derive(Debug, Deserialize)]
pub struct LocalCacheConfig {
    /// Whether the local cache is used at all.
    #[serde(default = "yes")]
    pub enabled: bool,
    /// Cache directory.
    #[serde(default = "default_local_path")]
    pub path: String,
    /// Whether artifacts are read from this cache.
    #[serde(default = "yes")]
    pub read: bool,
    /// Whether new artifacts are written to this cache.
    #[serde(default = "yes")]
    pub write: bool,
}

fn default_local_path() -> String {
    ".kiln/cache".to_string()
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_local_path(),
            read: true,
            write: true,
        }
    }
}

/// Settings of the remote cache client.
#[derive(Debug, Deserialize)]
pub struct RemoteCacheConfig {
    /// Whether the remote cache is used at all.
    #[serde(default)]
    pub enabled: bool,
    /// Server host name or address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Whether artifacts are read from the server.
    #[serde(default = "yes")]
    pub read: bool,
    /// Whether new artifacts are uploaded to the server.
    #[serde(default = "yes")]
    pub write: bool,
    /// Connect timeout in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Read/write timeout in milliseconds.
    #[serde(default = "default_io_timeout")]
    pub io_timeout_ms: u64,
    /// How long an unreachable server is skipped before reconnecting, in
    /// milliseconds.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_REMOTE_PORT
}

fn default_connect_timeout() -> u64 {
    2_000
}

fn default_io_timeout() -> u64 {
    5_000
}

fn default_retry_delay() -> u64 {
    10_000
}

impl Default for RemoteCacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_host(),
            port: default_port(),
            read: true,
            write: true,
            connect_timeout_ms: default_connect_timeout(),
            io_timeout_ms: default_io_timeout(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

fn yes() -> bool {
    true
}

/// Build scheduling settings.
#[derive(Debug, Default, Deserialize)]
pub struct BuildConfig {
    /// Worker thread count; `0` means one per CPU.
    #[serde(default)]
    pub threads: usize,
    /// Rebuild every node even when its fingerprint is cached.
    #[serde(default)]
    pub force: bool,
}

/// A source asset declared in `kiln.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetDecl {
    /// Stable asset identifier.
    pub guid: Guid,
    /// Asset type id, e.g. `raw` or `group`.
    #[serde(rename = "type")]
    pub asset_type: String,
    /// Source file, relative to [`ProjectMeta::root`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    /// Declared dependencies, in order.
    #[serde(default)]
    pub dependencies: Vec<DependencyDecl>,
}

/// A dependency edge declared on an [`AssetDecl`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyDecl {
    /// Target asset.
    pub guid: Guid,
    /// Edge kind.
    #[serde(default)]
    pub kind: DependencyKindDecl,
}

/// Edge kind as written in `kiln.toml`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKindDecl {
    /// Must be built before the dependent.
    #[default]
    Hard,
    /// Referenced only.
    Soft,
}
