//! Configuration management for the file manager server
//!
//! Everything here is read once at startup and handed to the components that
//! need it. Nothing is reloaded while the server runs.

use config::{Config, Environment, File};
use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use crate::storage::CopyStrategy;

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "FILEMANAGER_CONFIG";

/// Prefix for environment overrides (`FILEMANAGER_PORT=9000`)
const ENV_PREFIX: &str = "FILEMANAGER";

/// One configured filesystem root as written in the config file
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SourceConfig {
    pub name: String,
    pub path: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Complete server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    // ═══ NETWORK ═══
    /// IP address the HTTP listener binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP port
    #[serde(default = "default_port")]
    pub port: u16,

    // ═══ SOURCES ═══
    /// Named roots exposed through the API
    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    /// Single implicit root, used only when `sources` is empty
    #[serde(default)]
    pub root_dir: Option<String>,

    /// Create source roots that do not exist yet
    #[serde(default = "default_true")]
    pub create_missing_roots: bool,

    // ═══ BEHAVIOR ═══
    /// Buffer size for streamed transfers and copies
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Files below this size are read whole for inline preview
    #[serde(default = "default_preview_max_bytes")]
    pub preview_max_bytes: u64,

    /// Upload size ceiling in MB
    #[serde(default = "default_max_upload_size_mb")]
    pub max_upload_size_mb: u64,

    /// How copies are written to their destination
    #[serde(default)]
    pub copy_strategy: CopyStrategy,

    /// Serialize mutating operations on overlapping paths
    #[serde(default = "default_true")]
    pub lock_paths: bool,

    /// Settings sidecar file name, stored in the first enabled source
    #[serde(default = "default_settings_file")]
    pub settings_file: String,

    /// Seconds to wait for in-flight requests on shutdown
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_buffer_size() -> usize {
    64 * 1024
}

fn default_preview_max_bytes() -> u64 {
    1024 * 1024
}

fn default_max_upload_size_mb() -> u64 {
    1024
}

fn default_settings_file() -> String {
    ".settings.json".to_string()
}

fn default_shutdown_timeout_secs() -> u64 {
    10
}

impl ServerConfig {
    /// Load configuration from a config file with environment overrides.
    ///
    /// `FILEMANAGER_CONFIG` wins when set. Otherwise the production path is
    /// tried before the development path, and if neither exists the
    /// configuration comes from the environment alone.
    pub fn load() -> Result<Self, config::ConfigError> {
        if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load_from(Some(&explicit));
        }

        let config_paths = [
            "filemanager-server/config", // container layout: /app/filemanager-server/config.yaml
            "config",                    // local development: ./config.yaml
        ];

        for config_path in &config_paths {
            match Self::load_from(Some(config_path)) {
                Ok(config) => return Ok(config),
                Err(e) if is_missing_file(&e) => continue,
                Err(e) => return Err(e),
            }
        }

        log::warn!(
            "No config file found (tried {config_paths:?}); using environment and defaults"
        );
        Self::load_from(None)
    }

    /// Load from one file (if given) plus environment overrides
    pub fn load_from(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::with_name(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: ServerConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validation for all configuration values
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.port == 0 {
            return Err(config::ConfigError::Message("port cannot be 0".into()));
        }

        if self.bind_address.parse::<std::net::IpAddr>().is_err() {
            return Err(config::ConfigError::Message(format!(
                "bind_address is not an IP address: {}",
                self.bind_address
            )));
        }

        let has_root_dir = self
            .root_dir
            .as_deref()
            .is_some_and(|root| !root.trim().is_empty());
        if self.sources.is_empty() && !has_root_dir {
            return Err(config::ConfigError::Message(
                "configure at least one source (or root_dir)".into(),
            ));
        }

        for source in &self.sources {
            if source.name.trim().is_empty() {
                return Err(config::ConfigError::Message(
                    "source name cannot be empty".into(),
                ));
            }
            if source.path.trim().is_empty() {
                return Err(config::ConfigError::Message(format!(
                    "source '{}' has an empty path",
                    source.name
                )));
            }
        }

        if self.buffer_size < 512 {
            return Err(config::ConfigError::Message(
                "buffer_size must be at least 512 bytes".into(),
            ));
        }

        if self.max_upload_size_mb == 0 {
            return Err(config::ConfigError::Message(
                "max_upload_size_mb must be greater than 0".into(),
            ));
        }

        let settings_name = self.settings_file.as_str();
        if !crate::utils::validation::is_valid_entry_name(settings_name) {
            return Err(config::ConfigError::Message(format!(
                "settings_file must be a plain file name: {settings_name}"
            )));
        }

        Ok(())
    }

    /// Socket address for the HTTP listener
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        let ip: std::net::IpAddr = self.bind_address.parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Upload ceiling in bytes
    pub fn max_upload_size_bytes(&self) -> u64 {
        self.max_upload_size_mb * 1024 * 1024
    }

    /// Graceful shutdown window
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Configured sources, with the legacy `root_dir` folded in when no
    /// explicit sources exist
    pub fn effective_sources(&self) -> Vec<SourceConfig> {
        if !self.sources.is_empty() {
            return self.sources.clone();
        }
        self.root_dir
            .iter()
            .filter(|root| !root.trim().is_empty())
            .map(|root| SourceConfig {
                name: "root".to_string(),
                path: root.clone(),
                enabled: true,
            })
            .collect()
    }
}

fn is_missing_file(err: &config::ConfigError) -> bool {
    // a missing file surfaces as a foreign io error, not `NotFound`
    err.to_string().contains("not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn parse(yaml: &str) -> Result<ServerConfig, config::ConfigError> {
        let config: ServerConfig = Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn yaml_sources_with_defaults() {
        let config = parse(
            r#"
sources:
  - name: Media
    path: /srv/media
  - name: Backups
    path: /srv/backups
    enabled: false
"#,
        )
        .expect("valid config");

        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_address, "0.0.0.0");
        assert_eq!(config.sources.len(), 2);
        assert!(config.sources[0].enabled);
        assert!(!config.sources[1].enabled);
        assert_eq!(config.copy_strategy, CopyStrategy::Direct);
        assert!(config.lock_paths);
        assert_eq!(config.settings_file, ".settings.json");
        assert_eq!(config.max_upload_size_bytes(), 1024 * 1024 * 1024);
    }

    #[test]
    fn root_dir_becomes_single_source() {
        let config = parse("root_dir: /srv/files\nport: 9000\ncopy_strategy: staged\n")
            .expect("valid config");

        let sources = config.effective_sources();
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].path, "/srv/files");
        assert_eq!(config.copy_strategy, CopyStrategy::Staged);
        assert_eq!(config.socket_addr().unwrap().port(), 9000);
    }

    #[test]
    fn rejects_missing_sources() {
        let err = parse("port: 8080\n").unwrap_err();
        assert!(err.to_string().contains("at least one source"));
    }

    #[test]
    fn rejects_bad_values() {
        assert!(parse("root_dir: /srv\nport: 0\n").is_err());
        assert!(parse("root_dir: /srv\nbind_address: localhost\n").is_err());
        assert!(parse("root_dir: /srv\nmax_upload_size_mb: 0\n").is_err());
        assert!(parse("root_dir: /srv\nsettings_file: ../escape.json\n").is_err());
        assert!(parse("sources:\n  - name: ''\n    path: /srv\n").is_err());
    }
}
