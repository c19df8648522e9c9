//! Path resolution
//!
//! Turns a `(source id, relative path)` pair from a client into an absolute
//! path that is guaranteed to lie inside the source's root. Every storage
//! operation goes through [`PathResolver::resolve`] before it touches the
//! filesystem.
//!
//! Resolution is purely lexical. Roots are canonicalized once when the
//! [`SourceRegistry`] is built; after that no call here performs I/O.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::StorageError;
use crate::sources::{Source, SourceRegistry};
use crate::utils::validation::is_valid_entry_name;

/// An absolute path proven to lie within its source's root.
///
/// Only [`PathResolver`] constructs these, so holding one means the
/// containment check has already passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    source_id: String,
    relative: String,
    absolute: PathBuf,
}

impl ResolvedPath {
    /// Id of the source this path belongs to
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Normalized relative form, `/`-separated with a leading `/`
    pub fn relative(&self) -> &str {
        &self.relative
    }

    /// Absolute filesystem path
    pub fn as_path(&self) -> &Path {
        &self.absolute
    }

    /// True when this is the source root itself
    pub fn is_root(&self) -> bool {
        self.relative == "/"
    }

    /// Final path segment, `None` for the root
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            None
        } else {
            self.relative.rsplit('/').next()
        }
    }

    /// Relative path of the parent directory (the root is its own parent)
    pub fn parent_relative(&self) -> &str {
        match self.relative.rfind('/') {
            Some(0) | None => "/",
            Some(idx) => &self.relative[..idx],
        }
    }
}

/// Resolves client paths against the registry's roots
#[derive(Debug, Clone)]
pub struct PathResolver {
    registry: Arc<SourceRegistry>,
}

impl PathResolver {
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Look up the source a request targets
    pub fn source(&self, source_id: Option<&str>) -> Result<&Source, StorageError> {
        self.registry.get(source_id)
    }

    /// Resolve `relative` inside the source named by `source_id`.
    ///
    /// An empty or `/` path means the root. Fails with `SourceNotFound` for an
    /// unknown or disabled source and with `PathEscape` for any path that would
    /// leave the root, including a `..` that climbs above it.
    pub fn resolve(
        &self,
        source_id: Option<&str>,
        relative: &str,
    ) -> Result<ResolvedPath, StorageError> {
        let source = self.registry.get(source_id)?;
        let segments = normalize_relative(relative)?;

        let mut joined = source.root().to_path_buf();
        for segment in &segments {
            joined.push(segment);
        }

        // join() does not collapse anything itself; normalize the result and
        // check containment on the final form
        let candidate = normalize_lexically(&joined);
        if !is_within_root(source.root(), &candidate) {
            return Err(StorageError::PathEscape(relative.to_string()));
        }

        Ok(ResolvedPath {
            source_id: source.id.clone(),
            relative: format!("/{}", segments.join("/")),
            absolute: candidate,
        })
    }
}

/// Split a client path into plain segments.
///
/// Both `/` and `\` separate. Empty and `.` segments vanish, `..` removes the
/// previous segment. A `..` with nothing left to remove is an escape attempt
/// and is rejected rather than clamped to the root.
pub fn normalize_relative(input: &str) -> Result<Vec<String>, StorageError> {
    let mut segments: Vec<String> = Vec::new();

    for segment in input.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(StorageError::PathEscape(input.to_string()));
                }
            }
            name => {
                if !is_valid_entry_name(name) {
                    return Err(StorageError::PathEscape(input.to_string()));
                }
                segments.push(name.to_string());
            }
        }
    }

    Ok(segments)
}

/// Collapse `.` and `..` in an absolute path without consulting the
/// filesystem. `..` at the root stays at the root.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Segment-wise containment: every component of `root` must be a prefix of
/// `candidate`'s components. `/data/pub` contains `/data/pub/x` but not
/// `/data/public/x`.
pub fn is_within_root(root: &Path, candidate: &Path) -> bool {
    let mut candidate_components = candidate.components();
    root.components()
        .all(|component| candidate_components.next() == Some(component))
}
