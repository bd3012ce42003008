//! CLI configuration file.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dirs_next::config_dir;
use serde::{Deserialize, Serialize};

/// Environment variable overriding the default configuration path.
pub const CONFIG_PATH_ENV: &str = "SWITCHYARD_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwitchyardConfig {
    /// Log filter used when `RUST_LOG` is not set.
    pub log_level: String,
    /// Codec used by `encode` and `decode` when `--codec` is not given.
    pub default_codec: String,
    /// Manifest used when `--manifest` is not given.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            default_codec: "json".to_string(),
            manifest: None,
        }
    }
}

/// Configuration path: the `--config` flag, then `SWITCHYARD_CONFIG_PATH`, then `<config dir>/switchyard/config.yaml`.
pub fn config_path(flag: Option<&Path>) -> PathBuf {
    config_path_from(flag, env::var(CONFIG_PATH_ENV).ok())
}

fn config_path_from(flag: Option<&Path>, environment: Option<String>) -> PathBuf {
    if let Some(path) = flag {
        return path.to_path_buf();
    }
    if let Some(path) = environment
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("switchyard")
        .join("config.yaml")
}

/// Load the configuration at `path`. A missing file yields the defaults; `.json` files are read as JSON, everything
/// else as YAML.
pub fn load_config(path: &Path) -> Result<SwitchyardConfig> {
    if !path.exists() {
        return Ok(SwitchyardConfig::default());
    }

    let content = fs::read_to_string(path).with_context(|| format!("failed to read config {}", path.display()))?;
    if content.trim().is_empty() {
        return Ok(SwitchyardConfig::default());
    }
    let config = if is_json(path) {
        serde_json::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("failed to parse config {}", path.display()))?
    };
    Ok(config)
}

pub(crate) fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}
