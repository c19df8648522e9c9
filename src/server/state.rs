//! Shared application state

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::settings::SettingsStore;
use crate::sources::SourceRegistry;
use crate::storage::{Storage, StorageOptions};

/// Everything a handler needs, shared behind an `Arc`
#[derive(Debug)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub storage: Storage,
    pub settings: SettingsStore,
}

impl AppState {
    pub fn new(config: ServerConfig, registry: SourceRegistry) -> Self {
        let registry = Arc::new(registry);
        let settings = SettingsStore::for_registry(&registry, &config.settings_file);
        let storage = Storage::new(registry, StorageOptions::from_config(&config));

        Self {
            config: Arc::new(config),
            storage,
            settings,
        }
    }

    /// Build the source registry from configuration, then the state around it
    pub fn from_config(config: ServerConfig) -> Result<Self, ServerError> {
        let registry =
            SourceRegistry::from_config(&config.effective_sources(), config.create_missing_roots)?;
        Ok(Self::new(config, registry))
    }
}
