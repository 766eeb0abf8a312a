//! `cfgroots.toml` loading.
//!
//! A missing file is not an error: the engine runs on the built-in root table
//! with a `settings.db` next to the config.

use crate::core::error::EngineError;
use crate::core::roots::VersionRootTable;
use crate::core::schemas;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "cfgroots.toml";

/// One `[[roots]]` entry, newest first.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RootDef {
    pub location: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct EngineConfig {
    #[serde(default = "default_store")]
    pub store: PathBuf,
    #[serde(default)]
    pub audit_log: Option<PathBuf>,
    #[serde(default = "default_actor")]
    pub actor: String,
    /// Replaces the built-in table when non-empty.
    #[serde(default)]
    pub roots: Vec<RootDef>,
}

fn default_store() -> PathBuf {
    PathBuf::from(schemas::SETTINGS_DB_NAME)
}

fn default_actor() -> String {
    "cfgroots".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            store: default_store(),
            audit_log: None,
            actor: default_actor(),
            roots: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn root_table(&self) -> Result<VersionRootTable, EngineError> {
        if self.roots.is_empty() {
            return Ok(VersionRootTable::builtin());
        }
        VersionRootTable::from_entries(self.roots.iter().map(|r| {
            let label = if r.label.is_empty() {
                r.location.clone()
            } else {
                r.label.clone()
            };
            (r.location.clone(), label)
        }))
    }

    /// Makes relative `store` and `audit_log` paths relative to `base`.
    pub fn resolve_paths(mut self, base: &Path) -> Self {
        if self.store.is_relative() {
            self.store = base.join(&self.store);
        }
        if let Some(log) = &self.audit_log {
            if log.is_relative() {
                self.audit_log = Some(base.join(log));
            }
        }
        self
    }
}

pub fn parse_config(content: &str) -> Result<EngineConfig, EngineError> {
    let config: EngineConfig =
        toml::from_str(content).map_err(|e| EngineError::ConfigError(e.to_string()))?;
    config.root_table()?;
    Ok(config)
}

/// Loads `path`, or defaults when it does not exist. Relative paths in the file
/// resolve against the file's directory.
pub fn load_config(path: &Path) -> Result<EngineConfig, EngineError> {
    let base = path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    if !path.exists() {
        return Ok(EngineConfig::default().resolve_paths(&base));
    }
    let content = fs::read_to_string(path).map_err(EngineError::IoError)?;
    Ok(parse_config(&content)?.resolve_paths(&base))
}
