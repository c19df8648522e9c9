//! Copy and move mechanics
//!
//! Collision handling, recursive copying with cleanup on failure, and the
//! copy-then-delete path used when a move crosses sources.

use log::{debug, info, warn};
use serde::Deserialize;
use std::fs::{self, File, Metadata};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::StorageError;
use crate::storage::resolver::{PathResolver, ResolvedPath};
use crate::utils::validation::MAX_NAME_BYTES;

/// Deepest directory nesting a recursive copy will follow where links are
/// followed rather than recreated
#[cfg(not(unix))]
const MAX_COPY_DEPTH: usize = 256;

static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// How copied bytes reach their final name
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CopyStrategy {
    /// Write straight into the destination; remove it again on failure
    #[default]
    Direct,
    /// Write into a hidden sibling and rename it into place as the last step
    Staged,
}

/// What an operation does when its destination name is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Pick `name(1).ext`, `name(2).ext`, ... until a free name turns up
    Unique,
    /// Replace whatever is there
    Overwrite,
    /// Refuse with `AlreadyExists`
    Fail,
}

/// Source, requested destination and the collision-adjusted final
/// destination of one copy or move
#[derive(Debug, Clone)]
pub struct CopyPlan {
    pub source: ResolvedPath,
    pub requested: ResolvedPath,
    pub destination: ResolvedPath,
}

/// Apply `policy` to a requested destination
pub fn apply_collision_policy(
    resolver: &PathResolver,
    requested: &ResolvedPath,
    policy: CollisionPolicy,
) -> Result<ResolvedPath, StorageError> {
    match policy {
        CollisionPolicy::Overwrite => Ok(requested.clone()),
        CollisionPolicy::Fail => {
            if entry_exists(requested.as_path())? {
                Err(StorageError::AlreadyExists(requested.relative().to_string()))
            } else {
                Ok(requested.clone())
            }
        }
        CollisionPolicy::Unique => unique_destination(resolver, requested),
    }
}

/// First free name among `name.ext`, `name(1).ext`, `name(2).ext`, ...
///
/// Each candidate goes back through the resolver, so the result is a
/// `ResolvedPath` like any other.
pub fn unique_destination(
    resolver: &PathResolver,
    requested: &ResolvedPath,
) -> Result<ResolvedPath, StorageError> {
    if !entry_exists(requested.as_path())? {
        return Ok(requested.clone());
    }

    let Some(name) = requested.file_name() else {
        return Err(StorageError::InvalidRequest(
            "Destination must name an entry".into(),
        ));
    };
    let (stem, ext) = match split_name(name) {
        // an extension this long cannot be kept intact
        (_, ext) if ext.len() + 24 > MAX_NAME_BYTES => (name, ""),
        parts => parts,
    };

    let mut n: u64 = 1;
    loop {
        let marker = format!("({n}){ext}");
        // a long stem gives way so the numbered name stays legal
        let stem = truncate_to(stem, MAX_NAME_BYTES.saturating_sub(marker.len()));
        let candidate_name = format!("{stem}{marker}");
        let candidate = resolver.resolve(
            Some(requested.source_id()),
            &join_relative(requested.parent_relative(), &candidate_name),
        )?;
        if !entry_exists(candidate.as_path())? {
            debug!(
                "Destination {} taken, using {}",
                requested.relative(),
                candidate.relative()
            );
            return Ok(candidate);
        }
        n += 1;
    }
}

/// Split `report.txt` into `("report", ".txt")`. Dotfiles keep their whole
/// name as the stem.
pub fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}

/// Join a relative parent and a child name
pub fn join_relative(parent: &str, name: &str) -> String {
    format!("{}/{}", parent.trim_end_matches('/'), name)
}

/// Whether anything (including a dangling symlink) occupies `path`
pub fn entry_exists(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Remove a file, symlink or directory tree
pub fn remove_entry(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Copy `plan.source` to `plan.destination` with the given strategy.
///
/// On failure whatever was written is removed before the error is returned,
/// so no half-written tree is left under the destination name.
pub fn execute_copy(plan: &CopyPlan, strategy: CopyStrategy, buffer_size: usize) -> io::Result<()> {
    let source = plan.source.as_path();
    let destination = plan.destination.as_path();
    let mut buffer = vec![0u8; buffer_size.max(512)];

    match strategy {
        CopyStrategy::Direct => {
            if let Err(e) = copy_tree(source, destination, &mut buffer, 0) {
                cleanup_partial(destination);
                return Err(e);
            }
        }
        CopyStrategy::Staged => {
            let staging = staging_path(destination);
            if let Err(e) = copy_tree(source, &staging, &mut buffer, 0) {
                cleanup_partial(&staging);
                return Err(e);
            }
            if let Err(e) = fs::rename(&staging, destination) {
                cleanup_partial(&staging);
                return Err(e);
            }
        }
    }

    info!(
        "Copied {} -> {}",
        plan.source.relative(),
        plan.destination.relative()
    );
    Ok(())
}

/// Copy across sources, then delete the source with `remove_source`.
///
/// A failed copy leaves the source untouched. A failed delete after a good
/// copy is reported as `PartialMoveFailure`: both copies now exist.
pub fn move_across<F>(
    plan: &CopyPlan,
    strategy: CopyStrategy,
    buffer_size: usize,
    remove_source: F,
) -> Result<(), StorageError>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    execute_copy(plan, strategy, buffer_size)
        .map_err(|e| StorageError::io(plan.source.relative(), e))?;

    remove_source(plan.source.as_path()).map_err(|e| {
        warn!(
            "Moved copy to {} but could not remove {}: {}",
            plan.destination.relative(),
            plan.source.relative(),
            e
        );
        StorageError::PartialMoveFailure {
            destination: plan.destination.relative().to_string(),
            source: e,
        }
    })
}

fn copy_tree(source: &Path, destination: &Path, buffer: &mut [u8], depth: usize) -> io::Result<()> {
    // Links below the top level are recreated rather than followed, so a
    // tree copy never pulls in content from outside the tree.
    #[cfg(unix)]
    if depth > 0 && fs::symlink_metadata(source)?.file_type().is_symlink() {
        return std::os::unix::fs::symlink(fs::read_link(source)?, destination);
    }

    let metadata = fs::metadata(source)?;
    if metadata.is_dir() {
        copy_dir(source, destination, &metadata, buffer, depth)
    } else {
        copy_file(source, destination, &metadata, buffer)
    }
}

fn copy_dir(
    source: &Path,
    destination: &Path,
    metadata: &Metadata,
    buffer: &mut [u8],
    depth: usize,
) -> io::Result<()> {
    // links are followed here, so a cycle would never bottom out
    #[cfg(not(unix))]
    if depth >= MAX_COPY_DEPTH {
        return Err(io::Error::other(format!(
            "directory nesting deeper than {MAX_COPY_DEPTH} levels"
        )));
    }

    fs::create_dir_all(destination)?;
    for entry in fs::read_dir(source)? {
        let entry = entry?;
        copy_tree(
            &entry.path(),
            &destination.join(entry.file_name()),
            buffer,
            depth + 1,
        )?;
    }

    // Applied last so a read-only directory can still be filled
    fs::set_permissions(destination, metadata.permissions())
}

fn copy_file(source: &Path, destination: &Path, metadata: &Metadata, buffer: &mut [u8]) -> io::Result<()> {
    let mut reader = File::open(source)?;
    let mut writer = File::create(destination)?;

    loop {
        let n = match reader.read(buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..n])?;
    }
    writer.flush()?;
    drop(writer);

    fs::set_permissions(destination, metadata.permissions())
}

/// Hidden sibling used by the staged strategy
fn staging_path(destination: &Path) -> PathBuf {
    scratch_path(destination, "partial")
}

/// Hidden sibling `.{name}.{tag}-{pid}-{n}`, distinct for every call in
/// this process. Long names are cut so the result stays a legal file name.
pub fn scratch_path(destination: &Path, tag: &str) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let n = SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed);
    let suffix = format!(".{tag}-{}-{n}", std::process::id());
    let name = truncate_to(&name, MAX_NAME_BYTES.saturating_sub(suffix.len() + 1));
    destination.with_file_name(format!(".{name}{suffix}"))
}

/// Longest prefix of `value` that fits in `max` bytes without splitting a
/// character
fn truncate_to(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

fn cleanup_partial(path: &Path) {
    match remove_entry(path) {
        Ok(()) => debug!("Removed partial copy at {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Could not remove partial copy at {}: {}", path.display(), e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{Source, SourceRegistry, SourceType};
    use std::sync::Arc;
    use tempfile::{TempDir, tempdir};

    fn setup() -> (TempDir, PathResolver) {
        let temp = tempdir().unwrap();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        fs::create_dir_all(&a).unwrap();
        fs::create_dir_all(&b).unwrap();
        let sources = vec![
            Source {
                id: "a".into(),
                name: "A".into(),
                path: dunce::canonicalize(&a).unwrap(),
                kind: SourceType::Local,
                enabled: true,
            },
            Source {
                id: "b".into(),
                name: "B".into(),
                path: dunce::canonicalize(&b).unwrap(),
                kind: SourceType::Local,
                enabled: true,
            },
        ];
        let resolver = PathResolver::new(Arc::new(SourceRegistry::from_sources(sources)));
        (temp, resolver)
    }

    fn plan(resolver: &PathResolver, from: (&str, &str), to: (&str, &str)) -> CopyPlan {
        let source = resolver.resolve(Some(from.0), from.1).unwrap();
        let requested = resolver.resolve(Some(to.0), to.1).unwrap();
        let destination = unique_destination(resolver, &requested).unwrap();
        CopyPlan {
            source,
            requested,
            destination,
        }
    }

    #[test]
    fn split_name_handles_extensions_and_dotfiles() {
        assert_eq!(split_name("report.txt"), ("report", ".txt"));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".bashrc"), (".bashrc", ""));
    }

    #[test]
    fn unique_destination_counts_up() {
        let (_temp, resolver) = setup();
        let requested = resolver.resolve(Some("a"), "report.txt").unwrap();

        let first = unique_destination(&resolver, &requested).unwrap();
        assert_eq!(first.relative(), "/report.txt");
        fs::write(first.as_path(), b"0").unwrap();

        let second = unique_destination(&resolver, &requested).unwrap();
        assert_eq!(second.relative(), "/report(1).txt");
        fs::write(second.as_path(), b"1").unwrap();

        let third = unique_destination(&resolver, &requested).unwrap();
        assert_eq!(third.relative(), "/report(2).txt");
    }

    #[test]
    fn unique_destination_in_subdirectory_without_extension() {
        let (_temp, resolver) = setup();
        fs::create_dir_all(resolver.resolve(Some("a"), "docs/notes").unwrap().as_path()).unwrap();
        let requested = resolver.resolve(Some("a"), "docs/notes").unwrap();
        let unique = unique_destination(&resolver, &requested).unwrap();
        assert_eq!(unique.relative(), "/docs/notes(1)");
    }

    #[test]
    fn unique_destination_shortens_long_names() {
        let (_temp, resolver) = setup();
        let long_name = format!("{}.txt", "é".repeat(125));
        assert_eq!(long_name.len(), 254);
        let requested = resolver.resolve(Some("a"), &long_name).unwrap();
        fs::write(requested.as_path(), b"0").unwrap();

        let first = unique_destination(&resolver, &requested).unwrap();
        let name = first.file_name().unwrap();
        assert!(name.len() <= MAX_NAME_BYTES);
        assert!(name.ends_with("(1).txt"), "{name}");
        fs::write(first.as_path(), b"1").unwrap();

        let second = unique_destination(&resolver, &requested).unwrap();
        assert!(second.file_name().unwrap().ends_with("(2).txt"));
    }

    #[test]
    fn scratch_paths_are_hidden_distinct_and_bounded() {
        let dir = Path::new("/srv/files");
        let first = scratch_path(&dir.join("scan.pdf"), "upload");
        let second = scratch_path(&dir.join("scan.pdf"), "upload");
        assert_ne!(first, second);
        assert_eq!(first.parent(), Some(dir));
        assert!(
            first
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(".scan.pdf.upload-")
        );

        let long = scratch_path(&dir.join("x".repeat(MAX_NAME_BYTES)), "partial");
        assert!(long.file_name().unwrap().len() <= MAX_NAME_BYTES);
    }

    #[test]
    fn collision_policies() {
        let (_temp, resolver) = setup();
        let requested = resolver.resolve(Some("a"), "x.txt").unwrap();
        fs::write(requested.as_path(), b"x").unwrap();

        let overwrite =
            apply_collision_policy(&resolver, &requested, CollisionPolicy::Overwrite).unwrap();
        assert_eq!(overwrite, requested);

        assert!(matches!(
            apply_collision_policy(&resolver, &requested, CollisionPolicy::Fail),
            Err(StorageError::AlreadyExists(_))
        ));

        let unique =
            apply_collision_policy(&resolver, &requested, CollisionPolicy::Unique).unwrap();
        assert_eq!(unique.relative(), "/x(1).txt");
    }

    #[test]
    fn copies_directory_tree_byte_for_byte() {
        let (_temp, resolver) = setup();
        let root = resolver.resolve(Some("a"), "").unwrap();
        fs::create_dir_all(root.as_path().join("tree/sub/deeper")).unwrap();
        fs::write(root.as_path().join("tree/top.txt"), b"top").unwrap();
        fs::write(root.as_path().join("tree/sub/deeper/leaf.bin"), [0u8, 1, 2, 255]).unwrap();

        let plan = plan(&resolver, ("a", "tree"), ("b", "copied"));
        execute_copy(&plan, CopyStrategy::Direct, 512).unwrap();

        let dest = plan.destination.as_path();
        assert_eq!(fs::read(dest.join("top.txt")).unwrap(), b"top");
        assert_eq!(
            fs::read(dest.join("sub/deeper/leaf.bin")).unwrap(),
            vec![0u8, 1, 2, 255]
        );
        // source untouched
        assert!(root.as_path().join("tree/top.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn deeply_nested_trees_are_copied_whole() {
        let (_temp, resolver) = setup();
        let root = resolver.resolve(Some("a"), "").unwrap();
        let mut deepest = root.as_path().join("deep");
        for _ in 0..300 {
            deepest.push("d");
        }
        fs::create_dir_all(&deepest).unwrap();
        fs::write(deepest.join("leaf.txt"), b"bottom").unwrap();

        let plan = plan(&resolver, ("a", "deep"), ("b", "deep"));
        execute_copy(&plan, CopyStrategy::Direct, 512).unwrap();

        let copied_leaf = plan
            .destination
            .as_path()
            .join(deepest.strip_prefix(root.as_path().join("deep")).unwrap())
            .join("leaf.txt");
        assert_eq!(fs::read(copied_leaf).unwrap(), b"bottom");
    }

    #[test]
    fn staged_copy_leaves_no_staging_files() {
        let (_temp, resolver) = setup();
        let root = resolver.resolve(Some("a"), "").unwrap();
        fs::write(root.as_path().join("data.csv"), b"a,b\n1,2\n").unwrap();

        let plan = plan(&resolver, ("a", "data.csv"), ("b", "data.csv"));
        execute_copy(&plan, CopyStrategy::Staged, 4096).unwrap();

        let dest_root = resolver.resolve(Some("b"), "").unwrap();
        let names: Vec<_> = fs::read_dir(dest_root.as_path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["data.csv"]);
        assert_eq!(
            fs::read(plan.destination.as_path()).unwrap(),
            b"a,b\n1,2\n"
        );
    }

    #[test]
    fn failed_copy_removes_partial_destination() {
        let (_temp, resolver) = setup();
        let root = resolver.resolve(Some("a"), "").unwrap();
        fs::create_dir_all(root.as_path().join("tree")).unwrap();
        fs::write(root.as_path().join("tree/ok.txt"), b"ok").unwrap();

        let plan = plan(&resolver, ("a", "tree"), ("b", "tree"));
        // vanished source: the copy fails before anything lands
        fs::remove_dir_all(root.as_path().join("tree")).unwrap();

        assert!(execute_copy(&plan, CopyStrategy::Direct, 512).is_err());
        assert!(!plan.destination.as_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn file_permissions_are_replicated() {
        use std::os::unix::fs::PermissionsExt;

        let (_temp, resolver) = setup();
        let root = resolver.resolve(Some("a"), "").unwrap();
        let script = root.as_path().join("run.sh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o751)).unwrap();

        let plan = plan(&resolver, ("a", "run.sh"), ("b", "run.sh"));
        execute_copy(&plan, CopyStrategy::Direct, 512).unwrap();

        let mode = fs::metadata(plan.destination.as_path())
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o751);
    }

    #[cfg(unix)]
    #[test]
    fn nested_symlinks_are_copied_as_links() {
        let (temp, resolver) = setup();
        let root = resolver.resolve(Some("a"), "").unwrap();
        let outside = temp.path().join("secret.txt");
        fs::write(&outside, b"secret").unwrap();
        fs::create_dir_all(root.as_path().join("tree")).unwrap();
        std::os::unix::fs::symlink(&outside, root.as_path().join("tree/link")).unwrap();

        let plan = plan(&resolver, ("a", "tree"), ("b", "tree"));
        execute_copy(&plan, CopyStrategy::Direct, 512).unwrap();

        let copied = plan.destination.as_path().join("link");
        assert!(fs::symlink_metadata(&copied).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_link(&copied).unwrap(), outside);
    }

    #[test]
    fn cross_source_move_removes_source() {
        let (_temp, resolver) = setup();
        let root = resolver.resolve(Some("a"), "").unwrap();
        fs::write(root.as_path().join("m.txt"), b"move me").unwrap();

        let plan = plan(&resolver, ("a", "m.txt"), ("b", "m.txt"));
        move_across(&plan, CopyStrategy::Direct, 512, remove_entry).unwrap();

        assert!(!root.as_path().join("m.txt").exists());
        assert_eq!(fs::read(plan.destination.as_path()).unwrap(), b"move me");
    }

    #[test]
    fn failed_source_delete_is_partial_move_failure() {
        let (_temp, resolver) = setup();
        let root = resolver.resolve(Some("a"), "").unwrap();
        fs::write(root.as_path().join("keep.txt"), b"twice").unwrap();

        let plan = plan(&resolver, ("a", "keep.txt"), ("b", "keep.txt"));
        let result = move_across(&plan, CopyStrategy::Direct, 512, |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))
        });

        match result {
            Err(StorageError::PartialMoveFailure { destination, .. }) => {
                assert_eq!(destination, "/keep.txt")
            }
            other => panic!("expected PartialMoveFailure, got {other:?}"),
        }
        // both copies present
        assert_eq!(fs::read(root.as_path().join("keep.txt")).unwrap(), b"twice");
        assert_eq!(fs::read(plan.destination.as_path()).unwrap(), b"twice");
    }

    #[test]
    fn failed_copy_during_move_keeps_source() {
        let (_temp, resolver) = setup();
        let plan = plan(&resolver, ("a", "ghost.txt"), ("b", "ghost.txt"));

        let result = move_across(&plan, CopyStrategy::Direct, 512, |_| {
            panic!("delete must not run after a failed copy")
        });
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
