//! Configuration-related functionality for the resolution engine.

use std::path::Path;

use eyre::{Result, WrapErr};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::data::load_from_file;

/// Engine configuration, shared by every view resolved against the same
/// cache.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// First segment of every cache path.
    pub path_root: String,
    /// Database environment segment following the root.
    pub env: String,
    /// Maximum number of rows requested per view unless the view sets its
    /// own `dataSize`.
    pub page_cap: usize,
    /// Column width used when a view does not size a column.
    pub default_width: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path_root: "dama".to_string(),
            env: "default".to_string(),
            page_cap: 100,
            default_width: "15%".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a JSON or YAML file. Missing fields take their
    /// default values.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Attempting to load config file: {}", path.display());
        let config: Self = load_from_file(path)
            .wrap_err_with(|| format!("failed to load configuration from {}", path.display()))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Convenience method for constructing a configuration with a specific
    /// environment.
    pub fn with_env<S: AsRef<str>>(mut self, env: S) -> Self {
        self.env = env.as_ref().to_string();
        self
    }

    /// Convenience method for constructing a configuration with a specific
    /// page cap.
    pub fn with_page_cap(mut self, page_cap: usize) -> Self {
        self.page_cap = page_cap;
        self
    }
}
