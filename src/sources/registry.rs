//! Source registry
//!
//! Immutable mapping from source id to root directory, built once at startup
//! and shared by reference with every component that resolves paths.

use log::{info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::SourceConfig;
use crate::error::StorageError;

/// Kind of backing store. Only the local filesystem exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Local,
}

/// A named, independently rooted filesystem tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
    #[serde(rename = "type")]
    pub kind: SourceType,
    pub enabled: bool,
}

impl Source {
    /// Canonical root directory
    pub fn root(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceRegistry {
    sources: Vec<Source>,
}

impl SourceRegistry {
    /// Build the registry from configuration.
    ///
    /// Roots are made absolute and canonicalized here, once, so that path
    /// resolution never touches the filesystem.
    pub fn from_config(
        configs: &[SourceConfig],
        create_missing: bool,
    ) -> Result<Self, StorageError> {
        let mut taken = HashSet::new();
        let mut sources = Vec::with_capacity(configs.len());

        for config in configs {
            let id = unique_id(&slugify(&config.name), &mut taken);
            let path = prepare_root(Path::new(&config.path), create_missing && config.enabled)?;

            info!(
                "Source '{}' ({}) -> {}{}",
                config.name,
                id,
                path.display(),
                if config.enabled { "" } else { " [disabled]" }
            );

            sources.push(Source {
                id,
                name: config.name.clone(),
                path,
                kind: SourceType::Local,
                enabled: config.enabled,
            });
        }

        Ok(Self { sources })
    }

    /// Build a registry from already-prepared sources
    pub fn from_sources(sources: Vec<Source>) -> Self {
        Self { sources }
    }

    /// Look up an enabled source; an empty or missing id selects the first
    /// enabled source.
    pub fn get(&self, id: Option<&str>) -> Result<&Source, StorageError> {
        match id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => self
                .sources
                .iter()
                .find(|source| source.id == id && source.enabled)
                .ok_or_else(|| StorageError::SourceNotFound(id.to_string())),
            None => self
                .default_source()
                .ok_or_else(|| StorageError::SourceNotFound(String::new())),
        }
    }

    /// First enabled source
    pub fn default_source(&self) -> Option<&Source> {
        self.sources.iter().find(|source| source.enabled)
    }

    /// All enabled sources in configuration order
    pub fn enabled(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter().filter(|source| source.enabled)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Make a root absolute and canonical, creating it first if asked to
fn prepare_root(path: &Path, create_missing: bool) -> Result<PathBuf, StorageError> {
    if create_missing && !path.exists() {
        fs::create_dir_all(path).map_err(|e| StorageError::io(&path.to_string_lossy(), e))?;
        info!("Created source root {}", path.display());
    }

    match dunce::canonicalize(path) {
        Ok(canonical) => Ok(canonical),
        Err(e) => {
            // A missing root still gets a stable absolute form; operations on
            // it fail later with NotFound.
            warn!("Cannot canonicalize source root {}: {}", path.display(), e);
            let absolute = std::path::absolute(path)?;
            Ok(crate::storage::resolver::normalize_lexically(&absolute))
        }
    }
}

/// Lowercase ASCII slug; runs of anything else collapse to a single `-`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "source".to_string()
    } else {
        slug.to_string()
    }
}

fn unique_id(base: &str, taken: &mut HashSet<String>) -> String {
    let mut candidate = base.to_string();
    let mut n = 2;
    while taken.contains(&candidate) {
        candidate = format!("{base}-{n}");
        n += 1;
    }
    taken.insert(candidate.clone());
    candidate
}
