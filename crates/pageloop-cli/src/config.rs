//! Global configuration loading from TOML files

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global configuration for pageloop
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub http: HttpSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Seconds to wait for a connection
    pub connect_timeout: u64,
    /// Seconds a whole request may take
    pub read_timeout: u64,
    pub max_concurrency: usize,
    /// Replaces the default browser User-Agent; `${VAR}` is expanded
    #[serde(deserialize_with = "deserialize_env_var")]
    pub user_agent: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            connect_timeout: 30,
            read_timeout: 60,
            max_concurrency: 10,
            user_agent: None,
        }
    }
}

/// Deserialize a string that may be a `${VAR}` reference
pub fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// `${VAR}` → value of VAR (None when unset); anything else verbatim
pub fn expand_env_var(s: &str) -> Option<String> {
    match s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        Some(var_name) => std::env::var(var_name).ok(),
        None => Some(s.to_string()),
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./pageloop.toml
    /// 2. <user config dir>/pageloop/config.toml
    ///
    /// Defaults when neither exists.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("pageloop.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "pageloop") {
            let user_config = dirs.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }
}
