//! Per-path advisory locks
//!
//! Mutating operations hold every path they touch for their whole duration.
//! Two requests conflict when one of their paths is equal to, an ancestor
//! of, or a descendant of a path the other holds, so a move of `/a` waits
//! for a copy out of `/a/b` to finish.

use log::debug;
use parking_lot::{Condvar, Mutex};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct PathLocks {
    enabled: bool,
    held: Mutex<Vec<PathBuf>>,
    released: Condvar,
}

/// Releases its paths on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PathLockGuard<'a> {
    locks: &'a PathLocks,
    paths: Vec<PathBuf>,
}

impl PathLocks {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            held: Mutex::new(Vec::new()),
            released: Condvar::new(),
        }
    }

    /// Block until none of `paths` overlaps a held path, then take them all.
    ///
    /// All paths are taken at once, so two callers can never each hold half
    /// of what the other needs.
    pub fn acquire(&self, paths: &[&Path]) -> PathLockGuard<'_> {
        if !self.enabled {
            return PathLockGuard {
                locks: self,
                paths: Vec::new(),
            };
        }

        let mut held = self.held.lock();
        while paths
            .iter()
            .any(|wanted| held.iter().any(|h| overlaps(h, wanted)))
        {
            debug!("Waiting for path lock on {paths:?}");
            self.released.wait(&mut held);
        }

        let owned: Vec<PathBuf> = paths.iter().map(|p| p.to_path_buf()).collect();
        held.extend(owned.iter().cloned());

        PathLockGuard {
            locks: self,
            paths: owned,
        }
    }

    /// Number of paths currently held
    pub fn held_count(&self) -> usize {
        self.held.lock().len()
    }
}

impl Default for PathLocks {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Drop for PathLockGuard<'_> {
    fn drop(&mut self) {
        if self.paths.is_empty() {
            return;
        }
        let mut held = self.locks.held.lock();
        for path in &self.paths {
            if let Some(idx) = held.iter().position(|h| h == path) {
                held.swap_remove(idx);
            }
        }
        drop(held);
        self.locks.released.notify_all();
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn overlap_is_ancestor_or_descendant() {
        assert!(overlaps(Path::new("/a"), Path::new("/a/b")));
        assert!(overlaps(Path::new("/a/b"), Path::new("/a")));
        assert!(overlaps(Path::new("/a"), Path::new("/a")));
        assert!(!overlaps(Path::new("/a/b"), Path::new("/a/bc")));
    }

    #[test]
    fn guard_releases_on_drop() {
        let locks = PathLocks::new(true);
        {
            let _guard = locks.acquire(&[Path::new("/x"), Path::new("/y")]);
            assert_eq!(locks.held_count(), 2);
        }
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn disabled_locks_hold_nothing() {
        let locks = PathLocks::new(false);
        let _a = locks.acquire(&[Path::new("/x")]);
        let _b = locks.acquire(&[Path::new("/x")]);
        assert_eq!(locks.held_count(), 0);
    }

    #[test]
    fn overlapping_request_waits() {
        let locks = Arc::new(PathLocks::new(true));
        let guard = locks.acquire(&[Path::new("/root/dir")]);
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _guard = locks.acquire(&[Path::new("/root/dir/child")]);
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!acquired.load(Ordering::SeqCst));

        drop(guard);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }

    #[test]
    fn disjoint_paths_do_not_block() {
        let locks = PathLocks::new(true);
        let _a = locks.acquire(&[Path::new("/root/a")]);
        let _b = locks.acquire(&[Path::new("/root/b")]);
        assert_eq!(locks.held_count(), 2);
    }
}
