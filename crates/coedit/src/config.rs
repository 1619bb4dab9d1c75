//! Configuration file loading

use std::path::Path;

use anyhow::{Context, Result};
use coedit_core::EngineConfig;
use serde::Deserialize;

/// Contents of a coedit TOML configuration file
///
/// ```toml
/// log_level = "debug"
///
/// [engine]
/// rebase_window = "unseen"
/// max_history = 5000
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub log_level: Option<String>,
    pub engine: EngineConfig,
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("Invalid config file {}", path.display()))
    }
}
