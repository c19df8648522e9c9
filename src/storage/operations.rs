//! Storage operations
//!
//! Filesystem operations behind the API: list, info, create, delete, rename,
//! copy and move, plus the checks that run before an upload or a download
//! starts streaming.
//!
//! Every entry point resolves all of its paths before touching the disk, so
//! a bad path never causes a partial mutation.

use log::{debug, error, info, warn};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::StorageError;
use crate::sources::SourceRegistry;
use crate::storage::copy::{self, CollisionPolicy, CopyPlan, CopyStrategy};
use crate::storage::disk;
use crate::storage::locks::PathLocks;
use crate::storage::resolver::{PathResolver, ResolvedPath, is_within_root, normalize_lexically};
use crate::storage::results::{
    FileEntry, RetrieveResult, StorageInfo, TransferResult, UploadTarget,
};
use crate::utils::validation::{is_valid_entry_name, trim_leading_separators};

/// Rename never replaces an existing entry
pub const RENAME_POLICY: CollisionPolicy = CollisionPolicy::Fail;
/// Copy and move pick a fresh `name(n).ext`
pub const TRANSFER_POLICY: CollisionPolicy = CollisionPolicy::Unique;
/// Uploads replace what is there
pub const UPLOAD_POLICY: CollisionPolicy = CollisionPolicy::Overwrite;

/// Tunables taken from the server configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageOptions {
    pub copy_strategy: CopyStrategy,
    pub buffer_size: usize,
    pub lock_paths: bool,
}

impl StorageOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            copy_strategy: config.copy_strategy,
            buffer_size: config.buffer_size,
            lock_paths: config.lock_paths,
        }
    }
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            copy_strategy: CopyStrategy::Direct,
            buffer_size: 64 * 1024,
            lock_paths: true,
        }
    }
}

/// Filesystem operation executor shared by all request handlers
#[derive(Debug)]
pub struct Storage {
    resolver: PathResolver,
    locks: PathLocks,
    options: StorageOptions,
}

impl Storage {
    pub fn new(registry: Arc<SourceRegistry>, options: StorageOptions) -> Self {
        Self {
            resolver: PathResolver::new(registry),
            locks: PathLocks::new(options.lock_paths),
            options,
        }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn registry(&self) -> &SourceRegistry {
        self.resolver.registry()
    }

    pub fn options(&self) -> StorageOptions {
        self.options
    }

    /// Entries of a directory, sorted by name.
    ///
    /// Entries whose metadata cannot be read are left out rather than
    /// failing the whole listing.
    pub fn list_directory(
        &self,
        source: Option<&str>,
        path: &str,
    ) -> Result<Vec<FileEntry>, StorageError> {
        let dir = self.resolver.resolve(source, path)?;
        self.confine(&dir)?;

        let metadata =
            fs::metadata(dir.as_path()).map_err(|e| StorageError::io(dir.relative(), e))?;
        if !metadata.is_dir() {
            return Err(StorageError::NotADirectory(dir.relative().to_string()));
        }

        let reader = fs::read_dir(dir.as_path()).map_err(|e| {
            error!(
                "Failed to list directory {} (real: {}): {}",
                dir.relative(),
                dir.as_path().display(),
                e
            );
            StorageError::io(dir.relative(), e)
        })?;

        let mut entries = Vec::new();
        for entry in reader.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.metadata() {
                Ok(metadata) => entries.push(FileEntry::from_metadata(
                    &name,
                    copy::join_relative(dir.relative(), &name),
                    &metadata,
                )),
                Err(e) => debug!("Skipping {} in {}: {}", name, dir.relative(), e),
            }
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        info!(
            "Listed directory {}:{} - {} entries",
            dir.source_id(),
            dir.relative(),
            entries.len()
        );
        Ok(entries)
    }

    /// Metadata for a single path
    pub fn info(&self, source: Option<&str>, path: &str) -> Result<FileEntry, StorageError> {
        let target = self.resolver.resolve(source, path)?;
        self.confine(&target)?;

        let metadata =
            fs::metadata(target.as_path()).map_err(|e| StorageError::io(target.relative(), e))?;
        let name = target.file_name().unwrap_or("/");
        Ok(FileEntry::from_metadata(
            name,
            target.relative().to_string(),
            &metadata,
        ))
    }

    /// Create a directory (with parents, idempotent) or an empty file.
    ///
    /// An existing file is truncated; an existing directory where a file was
    /// asked for is `AlreadyExists`.
    pub fn create(
        &self,
        source: Option<&str>,
        path: &str,
        is_dir: bool,
    ) -> Result<TransferResult, StorageError> {
        let target = self.resolver.resolve(source, path)?;
        self.confine(&target)?;
        let _guard = self.locks.acquire(&[target.as_path()]);

        if is_dir {
            fs::create_dir_all(target.as_path())
                .map_err(|e| StorageError::io(target.relative(), e))?;
            info!("Created directory {}:{}", target.source_id(), target.relative());
        } else {
            if target.is_root() {
                return Err(StorageError::InvalidRequest(
                    "Cannot create a file at the source root".into(),
                ));
            }
            if target.as_path().is_dir() {
                return Err(StorageError::AlreadyExists(target.relative().to_string()));
            }
            if let Some(parent) = target.as_path().parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| StorageError::io(target.parent_relative(), e))?;
            }
            File::create(target.as_path()).map_err(|e| StorageError::io(target.relative(), e))?;
            info!("Created file {}:{}", target.source_id(), target.relative());
        }

        Ok(TransferResult::from(&target))
    }

    /// Remove a file or directory tree. A path that is already gone counts
    /// as deleted.
    pub fn delete(&self, source: Option<&str>, path: &str) -> Result<(), StorageError> {
        let target = self.resolver.resolve(source, path)?;
        if target.is_root() {
            return Err(StorageError::InvalidRequest(
                "Cannot delete a source root".into(),
            ));
        }
        // the entry itself may be a link; only its parent has to stay inside
        self.confine_parent(&target)?;
        let _guard = self.locks.acquire(&[target.as_path()]);

        match copy::remove_entry(target.as_path()) {
            Ok(()) => {
                info!("Deleted {}:{}", target.source_id(), target.relative());
                Ok(())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
                debug!(
                    "Delete of missing {}:{} treated as done",
                    target.source_id(),
                    target.relative()
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to delete {} (real: {}): {}",
                    target.relative(),
                    target.as_path().display(),
                    e
                );
                Err(StorageError::io(target.relative(), e))
            }
        }
    }

    /// Rename an entry within its directory
    pub fn rename(
        &self,
        source: Option<&str>,
        path: &str,
        new_name: &str,
    ) -> Result<TransferResult, StorageError> {
        if !is_valid_entry_name(new_name) {
            return Err(StorageError::InvalidName(new_name.to_string()));
        }

        let from = self.resolver.resolve(source, path)?;
        if from.is_root() {
            return Err(StorageError::InvalidRequest(
                "Cannot rename a source root".into(),
            ));
        }
        let requested = self.resolver.resolve(
            Some(from.source_id()),
            &copy::join_relative(from.parent_relative(), new_name),
        )?;
        self.confine_parent(&from)?;

        let _guard = self.locks.acquire(&[from.as_path(), requested.as_path()]);

        if !copy::entry_exists(from.as_path()).map_err(|e| StorageError::io(from.relative(), e))? {
            return Err(StorageError::NotFound(from.relative().to_string()));
        }
        if requested == from {
            return Ok(TransferResult::from(&from));
        }

        let to = copy::apply_collision_policy(&self.resolver, &requested, RENAME_POLICY)?;
        fs::rename(from.as_path(), to.as_path()).map_err(|e| {
            error!("Failed to rename {} -> {}: {}", from.relative(), to.relative(), e);
            match e.kind() {
                io::ErrorKind::NotFound => StorageError::NotFound(from.relative().to_string()),
                _ => StorageError::RenameFailed {
                    path: from.relative().to_string(),
                    source: e,
                },
            }
        })?;

        info!(
            "Renamed {}:{} -> {}",
            from.source_id(),
            from.relative(),
            to.relative()
        );
        Ok(TransferResult::from(&to))
    }

    /// Copy a file or directory tree, possibly into another source.
    ///
    /// The destination is the full target path; when it is taken the copy
    /// lands at the first free `name(n).ext`.
    pub fn copy(
        &self,
        source_id: Option<&str>,
        source_path: &str,
        dest_id: Option<&str>,
        destination: &str,
    ) -> Result<TransferResult, StorageError> {
        let (source, requested) =
            self.resolve_transfer(source_id, source_path, dest_id, destination)?;
        let _guard = self.locks.acquire(&[source.as_path(), requested.as_path()]);

        let plan = self.plan_transfer(source, requested)?;
        copy::execute_copy(&plan, self.options.copy_strategy, self.options.buffer_size).map_err(
            |e| {
                error!(
                    "Failed to copy {}:{} -> {}:{}: {}",
                    plan.source.source_id(),
                    plan.source.relative(),
                    plan.destination.source_id(),
                    plan.destination.relative(),
                    e
                );
                StorageError::io(plan.source.relative(), e)
            },
        )?;

        Ok(TransferResult::from(&plan.destination))
    }

    /// Move a file or directory tree.
    ///
    /// Within one source this is a single rename. Across sources it is a copy
    /// followed by a delete of the original; if only the delete fails the
    /// result is `PartialMoveFailure` and both copies exist.
    pub fn move_entry(
        &self,
        source_id: Option<&str>,
        source_path: &str,
        dest_id: Option<&str>,
        destination: &str,
    ) -> Result<TransferResult, StorageError> {
        let (source, requested) =
            self.resolve_transfer(source_id, source_path, dest_id, destination)?;
        if source.is_root() {
            return Err(StorageError::InvalidRequest(
                "Cannot move a source root".into(),
            ));
        }
        let _guard = self.locks.acquire(&[source.as_path(), requested.as_path()]);

        let plan = self.plan_transfer(source, requested)?;
        let strategy = self.options.copy_strategy;
        let buffer_size = self.options.buffer_size;

        if plan.source.source_id() == plan.destination.source_id() {
            match fs::rename(plan.source.as_path(), plan.destination.as_path()) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
                    debug!(
                        "{} spans devices, falling back to copy and delete",
                        plan.source.source_id()
                    );
                    copy::move_across(&plan, strategy, buffer_size, copy::remove_entry)?;
                }
                Err(e) => {
                    error!(
                        "Failed to move {} -> {}: {}",
                        plan.source.relative(),
                        plan.destination.relative(),
                        e
                    );
                    return Err(StorageError::io(plan.source.relative(), e));
                }
            }
        } else {
            copy::move_across(&plan, strategy, buffer_size, copy::remove_entry)?;
        }

        info!(
            "Moved {}:{} -> {}:{}",
            plan.source.source_id(),
            plan.source.relative(),
            plan.destination.source_id(),
            plan.destination.relative()
        );
        Ok(TransferResult::from(&plan.destination))
    }

    /// Resolve and check an upload target before any bytes arrive.
    ///
    /// Parent directories are created here. The returned temporary path is a
    /// hidden sibling of the target, unique to this upload, that the caller
    /// streams into and renames over the target once the body is complete.
    pub fn prepare_upload(
        &self,
        source: Option<&str>,
        dir: &str,
        file_name: &str,
    ) -> Result<UploadTarget, StorageError> {
        let requested = self
            .resolver
            .resolve(source, &copy::join_relative(dir, file_name))?;
        if !requested.file_name().is_some_and(is_valid_entry_name) {
            return Err(StorageError::InvalidName(file_name.to_string()));
        }
        self.confine_parent(&requested)?;

        if requested.as_path().is_dir() {
            return Err(StorageError::IsADirectory(requested.relative().to_string()));
        }

        let target = copy::apply_collision_policy(&self.resolver, &requested, UPLOAD_POLICY)?;
        if let Some(parent) = target.as_path().parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(target.parent_relative(), e))?;
        }

        let temp_path = copy::scratch_path(target.as_path(), "upload");

        info!(
            "Prepared upload for {}:{} (real: {})",
            target.source_id(),
            target.relative(),
            target.as_path().display()
        );
        Ok(UploadTarget { target, temp_path })
    }

    /// Resolve a regular file for preview, serving or download
    pub fn prepare_file_retrieval(
        &self,
        source: Option<&str>,
        path: &str,
    ) -> Result<RetrieveResult, StorageError> {
        let file = self.resolver.resolve(source, path)?;
        self.confine(&file)?;

        let metadata =
            fs::metadata(file.as_path()).map_err(|e| StorageError::io(file.relative(), e))?;
        if metadata.is_dir() {
            return Err(StorageError::IsADirectory(file.relative().to_string()));
        }

        let entry = FileEntry::from_metadata(
            file.file_name().unwrap_or_default(),
            file.relative().to_string(),
            &metadata,
        );
        debug!(
            "Prepared retrieval of {}:{} ({} bytes)",
            file.source_id(),
            file.relative(),
            entry.size
        );
        Ok(RetrieveResult { file, entry })
    }

    /// Capacity of the filesystem holding a source root
    pub fn disk_usage(&self, source: Option<&str>) -> Result<StorageInfo, StorageError> {
        let source = self.resolver.source(source)?;
        disk::usage(source.root())
    }

    fn resolve_transfer(
        &self,
        source_id: Option<&str>,
        source_path: &str,
        dest_id: Option<&str>,
        destination: &str,
    ) -> Result<(ResolvedPath, ResolvedPath), StorageError> {
        let source = self
            .resolver
            .resolve(source_id, trim_leading_separators(source_path))?;
        let requested = self
            .resolver
            .resolve(dest_id, trim_leading_separators(destination))?;
        if requested.is_root() {
            return Err(StorageError::InvalidRequest(
                "Destination must name an entry".into(),
            ));
        }

        self.confine(&source)?;
        self.confine_parent(&requested)?;
        Ok((source, requested))
    }

    fn plan_transfer(
        &self,
        source: ResolvedPath,
        requested: ResolvedPath,
    ) -> Result<CopyPlan, StorageError> {
        let metadata =
            fs::metadata(source.as_path()).map_err(|e| StorageError::io(source.relative(), e))?;
        let destination = copy::apply_collision_policy(&self.resolver, &requested, TRANSFER_POLICY)?;

        if metadata.is_dir() && is_within_root(source.as_path(), destination.as_path()) {
            return Err(StorageError::InvalidRequest(
                "Cannot copy a directory into itself".into(),
            ));
        }

        if let Some(parent) = destination.as_path().parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::io(destination.parent_relative(), e))?;
        }

        Ok(CopyPlan {
            source,
            requested,
            destination,
        })
    }

    /// Check that following `target` on disk stays inside its source root
    fn confine(&self, target: &ResolvedPath) -> Result<(), StorageError> {
        self.confine_path(target, target.as_path())
    }

    /// Like [`Storage::confine`] but for operations that act on the entry
    /// itself rather than on what it points to
    fn confine_parent(&self, target: &ResolvedPath) -> Result<(), StorageError> {
        let parent = target.as_path().parent().unwrap_or(target.as_path());
        self.confine_path(target, parent)
    }

    /// Canonicalize the deepest existing ancestor of `path` and recheck
    /// containment. Resolution is lexical, so this is where symlinks inside a
    /// root are caught.
    fn confine_path(&self, target: &ResolvedPath, path: &Path) -> Result<(), StorageError> {
        let root = self.resolver.source(Some(target.source_id()))?.root();
        let mut cursor = path;

        loop {
            match dunce::canonicalize(cursor) {
                Ok(real) if is_within_root(root, &real) => return Ok(()),
                Ok(real) => {
                    warn!(
                        "{}:{} leads outside its root (real: {})",
                        target.source_id(),
                        target.relative(),
                        real.display()
                    );
                    return Err(StorageError::PathEscape(target.relative().to_string()));
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
                    ) =>
                {
                    // dangling link: check where it would land once created
                    if let Ok(link) = fs::read_link(cursor) {
                        let base = cursor.parent().unwrap_or(root);
                        let landing = normalize_lexically(&base.join(link));
                        if !is_within_root(root, &landing) {
                            warn!(
                                "{}:{} is a dangling link outside its root",
                                target.source_id(),
                                target.relative()
                            );
                            return Err(StorageError::PathEscape(target.relative().to_string()));
                        }
                    }
                    match cursor.parent() {
                        Some(parent) if is_within_root(root, parent) => cursor = parent,
                        _ => return Ok(()),
                    }
                }
                Err(e) => return Err(StorageError::io(target.relative(), e)),
            }
        }
    }
}
