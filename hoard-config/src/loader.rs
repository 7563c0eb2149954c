use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::{env, fs};

use anyhow::{Context, anyhow};
use tracing::debug;

use crate::models::{ConfigSource, HoardConfig};
use crate::validation::validate;

pub const CONFIG_PATH_VAR: &str = "HOARD_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "HOARD_CONFIG_JSON";
pub const MEDIA_ROOT_VAR: &str = "HOARD_MEDIA_ROOT";
pub const DATABASE_URL_VAR: &str = "HOARD_DATABASE_URL";

const DEFAULT_FILES: &[&str] = &[
    "hoard.toml",
    "hoard.json",
    "config/hoard.toml",
    "config/hoard.json",
];

/// A loaded, validated configuration and where it came from.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: HoardConfig,
    pub source: ConfigSource,
}

/// Resolves configuration from files and environment variables.
///
/// Evaluation order:
/// 1) `$HOARD_CONFIG_PATH` (TOML or JSON file),
/// 2) `$HOARD_CONFIG_JSON` (inline JSON),
/// 3) `hoard.toml` / `config/hoard.toml` (or `.json`) under the base directory,
/// 4) defaults.
///
/// `$HOARD_MEDIA_ROOT` and `$HOARD_DATABASE_URL` then override whatever was
/// loaded.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    vars: HashMap<String, String>,
    base_dir: PathBuf,
}

impl ConfigLoader {
    /// Loader reading the process environment, resolving default files
    /// against the current directory.
    pub fn from_env() -> Self {
        Self {
            vars: env::vars().collect(),
            base_dir: PathBuf::from("."),
        }
    }

    /// Loader over an explicit variable set.
    pub fn with_vars<I, K, V>(vars: I, base_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
            base_dir: base_dir.into(),
        }
    }

    fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn load(&self) -> anyhow::Result<ConfigLoad> {
        let (mut config, source) = self.load_base()?;

        if let Some(root) = self.var(MEDIA_ROOT_VAR) {
            config.engine.media_root = PathBuf::from(root.trim());
        }
        if let Some(url) = self.var(DATABASE_URL_VAR) {
            config.database.url = url.trim().to_string();
        }

        validate(&config).with_context(|| format!("invalid configuration from {source}"))?;
        debug!(target: "hoard::config", %source, root = %config.engine.media_root.display(), "configuration loaded");
        Ok(ConfigLoad { config, source })
    }

    fn load_base(&self) -> anyhow::Result<(HoardConfig, ConfigSource)> {
        if let Some(path) = self.var(CONFIG_PATH_VAR) {
            let path = PathBuf::from(path.trim());
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::EnvPath(path)));
        }

        if let Some(raw) = self.var(CONFIG_JSON_VAR) {
            let config = parse_json(raw).context("failed to parse HOARD_CONFIG_JSON")?;
            return Ok((config, ConfigSource::EnvInline));
        }

        if let Some(path) = self.find_default_file() {
            let config = load_from_file(&path)?;
            return Ok((config, ConfigSource::File(path)));
        }

        Ok((HoardConfig::default(), ConfigSource::Default))
    }

    fn find_default_file(&self) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| self.base_dir.join(candidate))
            .find(|path| path.is_file())
    }
}

/// Shorthand for `ConfigLoader::from_env().load()`.
pub fn load_from_env() -> anyhow::Result<ConfigLoad> {
    ConfigLoader::from_env().load()
}

pub fn load_from_file(path: &Path) -> anyhow::Result<HoardConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config from {}", path.display()))?;

    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => {
            parse_json(&contents).with_context(|| format!("invalid config {}", path.display()))
        }
        Some("toml") => toml::from_str(&contents)
            .map_err(|err| anyhow!("invalid config {}: {}", path.display(), err)),
        _ => parse_from_str(&contents, &path.display().to_string()),
    }
}

/// Parse TOML, falling back to JSON.
pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<HoardConfig> {
    toml::from_str(contents).or_else(|toml_err| {
        serde_json::from_str(contents).map_err(|json_err| {
            anyhow!(
                "failed to parse config {}: toml error: {}; json error: {}",
                origin,
                toml_err,
                json_err
            )
        })
    })
}

pub fn parse_json(raw: &str) -> anyhow::Result<HoardConfig> {
    serde_json::from_str(raw).map_err(|err| anyhow!("invalid config json: {err}"))
}

/// Render `config` as TOML, e.g. for a starter `hoard.toml`.
pub fn to_toml(config: &HoardConfig) -> anyhow::Result<String> {
    toml::to_string(config).context("failed to render config as TOML")
}
