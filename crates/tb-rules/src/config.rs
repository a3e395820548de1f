//! Pipeline configuration. Every field has a default so a partial JSON file is valid.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::source::AppSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub manager: ManagerConfig,
    pub updater: UpdaterConfig,
    /// Settings the page scripts start from.
    pub settings: AppSettings,
    /// Directory for compiled rule lists. No on-disk cache when unset.
    pub cache_dir: Option<PathBuf>,
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Update events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
    pub error_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_capacity: 16,
            error_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    /// Bundles buffered per subscriber before it starts lagging.
    pub bundle_capacity: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self { bundle_capacity: 16 }
    }
}
