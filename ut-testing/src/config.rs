//! Runner configuration

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "ut.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Print each test's log to stdout as it completes
    #[serde(default = "default_true")]
    pub emit: bool,

    /// Colorize emitted logs
    #[serde(default = "default_true")]
    pub color: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            emit: default_true(),
            color: default_true(),
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file, falling back to defaults when the
    /// file does not exist
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config_path = match config_path {
            Some(path) => path.to_owned(),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            return Ok(Self::default());
        }

        Self::from_file(&config_path)
    }

    pub fn from_file(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

fn default_true() -> bool {
    true
}
