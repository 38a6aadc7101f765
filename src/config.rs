//! YAML configuration stored in the per-user config directory.
//!
//! The file is created with platform defaults on first run. Fields that are
//! missing or empty fall back to those defaults, and command-line flags
//! override whatever the file says.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::application::SyncError;

pub const APP_DIR_NAME: &str = "ollama-sync";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub manifest_dir: PathBuf,
    pub blob_dir: PathBuf,
    pub destinations: Vec<PathBuf>,
}

/// Values given on the command line. `None` keeps the configured value.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub manifest_dir: Option<PathBuf>,
    pub blob_dir: Option<PathBuf>,
    /// Comma-separated destination roots.
    pub destinations: Option<String>,
}

impl Config {
    /// `~/.config/ollama-sync/config.yaml`, or `%APPDATA%\ollama-sync\config.yaml`.
    pub fn default_path() -> Result<PathBuf, SyncError> {
        let base = if cfg!(windows) {
            dirs::config_dir()
        } else {
            dirs::home_dir().map(|home| home.join(".config"))
        };

        base.map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
            .ok_or(SyncError::NoHomeDir)
    }

    /// Conventional Ollama and LM Studio locations for this platform.
    pub fn platform_defaults() -> Result<Self, SyncError> {
        let home = dirs::home_dir().ok_or(SyncError::NoHomeDir)?;

        if cfg!(windows) {
            let app_data = dirs::config_dir().unwrap_or_else(|| home.clone());
            let local_app_data = dirs::data_local_dir().unwrap_or_else(|| home.clone());
            let models = app_data.join("Ollama").join("models");

            Ok(Self {
                manifest_dir: models.join("manifests").join("registry.ollama.ai"),
                blob_dir: models.join("blobs"),
                destinations: vec![local_app_data.join("lm-studio").join("ollama")],
            })
        } else {
            Ok(Self::unix_defaults(&home))
        }
    }

    pub fn unix_defaults(home: &Path) -> Self {
        let models = home.join(".ollama").join("models");

        Self {
            manifest_dir: models.join("manifests").join("registry.ollama.ai"),
            blob_dir: models.join("blobs"),
            destinations: vec![home.join(".cache").join("lm-studio").join("ollama")],
        }
    }

    /// Reads `path`, writing `defaults` there first if it does not exist.
    pub fn load_or_init(path: &Path, defaults: &Config) -> Result<Self, SyncError> {
        if !path.exists() {
            write_default(path, defaults)?;
        }

        let data = fs::read_to_string(path).map_err(|source| SyncError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config =
            serde_yaml::from_str(&data).map_err(|source| SyncError::ConfigDecode {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(config.with_fallback(defaults))
    }

    pub fn with_fallback(mut self, defaults: &Config) -> Self {
        if self.manifest_dir.as_os_str().is_empty() {
            self.manifest_dir = defaults.manifest_dir.clone();
        }
        if self.blob_dir.as_os_str().is_empty() {
            self.blob_dir = defaults.blob_dir.clone();
        }
        if self.destinations.is_empty() {
            self.destinations = defaults.destinations.clone();
        }
        self
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(manifest_dir) = overrides.manifest_dir {
            self.manifest_dir = manifest_dir;
        }
        if let Some(blob_dir) = overrides.blob_dir {
            self.blob_dir = blob_dir;
        }
        if let Some(destinations) = overrides.destinations {
            let destinations = split_destinations(&destinations);
            if !destinations.is_empty() {
                self.destinations = destinations;
            }
        }
    }

    /// Resolves relative directories against the working directory.
    pub fn absolutized(&self) -> Result<Self, SyncError> {
        let absolute = |path: &Path| {
            std::path::absolute(path).map_err(|source| SyncError::Absolutize {
                path: path.to_path_buf(),
                source,
            })
        };

        Ok(Self {
            manifest_dir: absolute(&self.manifest_dir)?,
            blob_dir: absolute(&self.blob_dir)?,
            destinations: self
                .destinations
                .iter()
                .map(|destination| absolute(destination.as_path()))
                .collect::<Result<_, _>>()?,
        })
    }
}

fn write_default(path: &Path, defaults: &Config) -> Result<(), SyncError> {
    let write_err = |source| SyncError::ConfigWrite {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(write_err)?;
    }

    let yaml = serde_yaml::to_string(defaults).map_err(|source| SyncError::ConfigEncode {
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, yaml).map_err(write_err)
}

fn split_destinations(list: &str) -> Vec<PathBuf> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(PathBuf::from)
        .collect()
}
