use std::path::PathBuf;

use hoard_core::EngineConfig;
use serde::{Deserialize, Serialize};

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    /// `$HOARD_CONFIG_PATH`.
    EnvPath(PathBuf),
    /// `$HOARD_CONFIG_JSON`.
    EnvInline,
    /// A default file found relative to the working directory.
    File(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => f.write_str("built-in defaults"),
            ConfigSource::EnvPath(path) => write!(f, "HOARD_CONFIG_PATH ({})", path.display()),
            ConfigSource::EnvInline => f.write_str("HOARD_CONFIG_JSON"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite:///var/lib/hoard/catalog.db`.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://hoard.db".to_string(),
            max_connections: 4,
        }
    }
}

/// Everything a Hoard process needs to start the engine.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HoardConfig {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub engine: EngineConfig,
    pub database: DatabaseConfig,
}

impl Default for HoardConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,hoard_core=info".to_string(),
            engine: EngineConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}
