/// `config.rs` - usermod configuration document
///
/// Loaded from JSON, the same format the firmware keeps its usermod settings in.
/// Every field has a default, so `{}` is a valid config.
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::scripting::EngineOptions;

/// Script loaded when nothing else is configured.
pub const EXAMPLE_MODULE: &str = include_str!("../scripts/lua_plugin.lua");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One script to load, in the order it appears in the config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptSource {
    pub name: String,
    pub source: String,
}

impl ScriptSource {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Read a script file; the plugin is named after the file stem.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { name, source })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LuaFxConfig {
    /// When false the usermod never creates a VM.
    pub enabled: bool,
    /// Inline scripts, loaded first.
    pub scripts: Vec<ScriptSource>,
    /// Script files, loaded after the inline ones.
    pub script_files: Vec<PathBuf>,
    #[serde(flatten)]
    pub engine: EngineOptions,
}

impl Default for LuaFxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            scripts: vec![ScriptSource::new("LuaPlugin", EXAMPLE_MODULE)],
            script_files: Vec::new(),
            engine: EngineOptions::default(),
        }
    }
}

impl LuaFxConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// All scripts in load order. Unreadable files come back as errors in place.
    pub fn sources(&self) -> Vec<Result<ScriptSource, ConfigError>> {
        self.scripts
            .iter()
            .cloned()
            .map(Ok)
            .chain(self.script_files.iter().map(|p| ScriptSource::from_file(p)))
            .collect()
    }
}
