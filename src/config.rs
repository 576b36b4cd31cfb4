use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

// =============================================================================
// Server defaults
// =============================================================================

/// Default listen port, same as the service has always used
pub const DEFAULT_PORT: u16 = 3000;

/// Default listen address
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Number of shards in the in-memory lookup cache
pub const CACHE_SHARDS: usize = 16;

/// Prefix every client version string must carry
pub const VERSION_PREFIX: &str = "EDOPRO";

/// Server configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret publishers must present. `None` rejects every publish.
    pub secret: Option<String>,
    pub db_path: PathBuf,
    pub cache_backend: CacheBackend,
    pub log: LogConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            secret: None,
            db_path: db_path(),
            cache_backend: CacheBackend::default(),
            log: LogConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Where computed lookup results are memoized
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Sharded in-process map
    #[default]
    Memory,
    /// `responses` table next to the catalog
    Sqlite,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct LogConfig {
    /// Default level when `RUST_LOG` is not set
    pub level: String,
    pub format: LogFormat,
    /// Write daily-rolling files here instead of stdout
    pub dir: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Returns the path to the data directory for hercules-base.
/// Uses $XDG_DATA_HOME/hercules-base if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/hercules-base,
/// or ./hercules-base if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the default path to the patch database file.
pub fn db_path() -> PathBuf {
    data_dir().join("patches.db")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("hercules-base")
}
