use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::transfer::DEFAULT_TX_RETRIES;

pub const CONFIG_ENV: &str = "NARWHAL_CONFIG";

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NarwhalConfig {
    pub read_only: bool,
    #[serde(alias = "call_timeout")]
    pub call_timeout_secs: u64,
    pub kubectl: String,
    /// Offer every init container as a target, not only persistent ones.
    pub all_containers: bool,
    pub port_forward: bool,
    #[serde(alias = "retries")]
    pub transfer_retries: u32,
}

impl Default for NarwhalConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            call_timeout_secs: 10,
            kubectl: "kubectl".to_string(),
            all_containers: false,
            port_forward: true,
            transfer_retries: DEFAULT_TX_RETRIES,
        }
    }
}

impl NarwhalConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub source: Option<String>,
    pub config: NarwhalConfig,
}

/// Loads the first config file found, or defaults when there is none.
pub fn load() -> Result<LoadedConfig> {
    match discover_config_path() {
        Some(path) => Ok(LoadedConfig {
            source: Some(path.display().to_string()),
            config: load_from(&path)?,
        }),
        None => Ok(LoadedConfig {
            source: None,
            config: NarwhalConfig::default(),
        }),
    }
}

pub fn load_from(path: &Path) -> Result<NarwhalConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(NarwhalConfig::default());
    }
    serde_yaml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV)
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [
        PathBuf::from("narwhal.yaml"),
        PathBuf::from("narwhal.yml"),
        PathBuf::from(".narwhal.yaml"),
    ];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let user_candidates = [
            PathBuf::from(&home).join(".config/narwhal/config.yaml"),
            PathBuf::from(&home).join(".config/narwhal/config.yml"),
            PathBuf::from(&home).join(".narwhal.yaml"),
        ];
        for candidate in user_candidates {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    None
}
