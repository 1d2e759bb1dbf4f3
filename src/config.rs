use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::info;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineSettings,
    pub registry: RegistrySettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Upper bound on concurrently evaluated entity groups
    pub workers: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Directory holding the declarative schema/rule documents
    pub dir: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            dir: "registry".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    /// Directory the JSON-lines sink writes batch output into
    pub dir: String,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: &str) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path, e
            ))
        })?;
        let config: AppConfig = toml::from_str(&config_content)?;
        Ok(config)
    }

    /// Load the default config file when present, falling back to
    /// built-in defaults when it is not.
    pub fn load_or_default(config_path: &str) -> Result<Self> {
        if Path::new(config_path).is_file() {
            Self::load(config_path)
        } else {
            info!(config_path, "no config file found, using defaults");
            Ok(Self::default())
        }
    }
}
