//! User interface settings
//!
//! A small JSON sidecar kept in the first enabled source. Missing or
//! unreadable files fall back to defaults.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::sources::SourceRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub dark_mode: bool,
    pub sidebar_pin: bool,
    pub encryption: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            dark_mode: false,
            sidebar_pin: true,
            encryption: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store in the first enabled source, or the working directory when
    /// every source is disabled
    pub fn for_registry(registry: &SourceRegistry, file_name: &str) -> Self {
        match registry.default_source() {
            Some(source) => Self::new(source.root().join(file_name)),
            None => Self::new(file_name),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> UserSettings {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return UserSettings::default(),
            Err(e) => {
                warn!("Cannot read settings {}: {}", self.path.display(), e);
                return UserSettings::default();
            }
        };

        serde_json::from_slice(&data).unwrap_or_else(|e| {
            warn!("Ignoring unparsable settings {}: {}", self.path.display(), e);
            UserSettings::default()
        })
    }

    pub fn save(&self, settings: &UserSettings) -> Result<(), StorageError> {
        let data = serde_json::to_vec_pretty(settings).map_err(io::Error::other)?;
        fs::write(&self.path, data).map_err(|e| StorageError::io("settings", e))?;
        info!("Saved settings to {}", self.path.display());
        Ok(())
    }
}
