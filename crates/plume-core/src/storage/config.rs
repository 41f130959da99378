use std::fs;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
#[cfg(feature = "yaml-config")]
use serde_yaml;
#[cfg(feature = "toml-config")]
use toml;

use crate::kernel::constants;
use crate::storage::error::StorageSystemError;

/// Supported configuration and descriptor file formats
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigFormat {
    /// JSON format (.json)
    Json,
    /// YAML format (.yaml, .yml) - requires "yaml-config" feature
    #[cfg(feature = "yaml-config")]
    Yaml,
    /// TOML format (.toml) - requires "toml-config" feature
    #[cfg(feature = "toml-config")]
    Toml,
}

impl ConfigFormat {
    /// Get the file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            ConfigFormat::Json => "json",
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => "yaml",
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => "toml",
        }
    }

    /// Determine format from file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| match ext.to_lowercase().as_str() {
                "json" => Some(ConfigFormat::Json),
                #[cfg(feature = "yaml-config")]
                "yaml" | "yml" => Some(ConfigFormat::Yaml),
                #[cfg(feature = "toml-config")]
                "toml" => Some(ConfigFormat::Toml),
                _ => None,
            })
    }

    /// Deserialize `data` in this format. The error is the parser's message.
    pub fn parse<T: DeserializeOwned>(&self, data: &str) -> Result<T, String> {
        match self {
            ConfigFormat::Json => serde_json::from_str(data).map_err(|e| e.to_string()),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|e| e.to_string()),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::from_str(data).map_err(|e| e.to_string()),
        }
    }

    /// Serialize `value` in this format.
    pub fn render<T: Serialize>(&self, value: &T) -> Result<String, String> {
        match self {
            ConfigFormat::Json => serde_json::to_string_pretty(value).map_err(|e| e.to_string()),
            #[cfg(feature = "yaml-config")]
            ConfigFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
            #[cfg(feature = "toml-config")]
            ConfigFormat::Toml => toml::to_string_pretty(value).map_err(|e| e.to_string()),
        }
    }
}

/// Host settings: where plugins live, where state is kept and how new
/// plugins are treated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directories searched for plugins, in order
    pub plugin_dirs: Vec<PathBuf>,
    /// Directory holding the descriptor cache and the active plugin list
    pub state_dir: PathBuf,
    /// Loader tag used by descriptors that don't declare a loader
    pub default_loader: Option<String>,
    /// Activate plugins discovered for the first time
    pub activate_new: bool,
    /// Locale used to pick translated plugin names
    pub locale: Option<String>,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            plugin_dirs: vec![PathBuf::from(constants::DEFAULT_PLUGINS_DIR)],
            state_dir: PathBuf::from(constants::DEFAULT_STATE_DIR),
            default_loader: None,
            activate_new: true,
            locale: None,
        }
    }
}

impl HostConfig {
    /// Load a configuration file, picking the format from its extension.
    ///
    /// Relative directories in the file are resolved against the file's
    /// own directory.
    pub fn load(path: &Path) -> Result<Self, StorageSystemError> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| StorageSystemError::UnsupportedConfigFormat(path.display().to_string()))?;
        let data = fs::read_to_string(path).map_err(|e| StorageSystemError::io(e, "read_config", path.to_path_buf()))?;
        let mut config: HostConfig =
            format
                .parse(&data)
                .map_err(|message| StorageSystemError::DeserializationError {
                    format: format.extension().to_string(),
                    message,
                })?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        Ok(config)
    }

    /// Save this configuration, picking the format from the extension.
    pub fn save(&self, path: &Path) -> Result<(), StorageSystemError> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| StorageSystemError::UnsupportedConfigFormat(path.display().to_string()))?;
        let data = format
            .render(self)
            .map_err(|message| StorageSystemError::SerializationError {
                format: format.extension().to_string(),
                message,
            })?;
        crate::storage::state::write_atomic(path, data.as_bytes())
    }

    /// Make every relative path absolute against `base`.
    pub fn resolve_relative_to(&mut self, base: &Path) {
        for dir in &mut self.plugin_dirs {
            if dir.is_relative() {
                *dir = base.join(&*dir);
            }
        }
        if self.state_dir.is_relative() {
            self.state_dir = base.join(&self.state_dir);
        }
    }
}
