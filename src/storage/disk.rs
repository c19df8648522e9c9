//! Disk usage for a source root

use std::path::Path;

use crate::error::StorageError;
use crate::storage::results::StorageInfo;

/// Capacity of the filesystem holding `root`
#[cfg(unix)]
pub fn usage(root: &Path) -> Result<StorageInfo, StorageError> {
    let stats = rustix::fs::statvfs(root)
        .map_err(|e| StorageError::io(&root.to_string_lossy(), std::io::Error::from(e)))?;

    let total = stats.f_blocks.saturating_mul(stats.f_frsize);
    let free = stats.f_bavail.saturating_mul(stats.f_frsize);
    Ok(storage_info(root, total, free))
}

/// Capacity of the volume holding `root`
#[cfg(windows)]
pub fn usage(root: &Path) -> Result<StorageInfo, StorageError> {
    use std::os::windows::ffi::OsStrExt;
    use windows_sys::Win32::Storage::FileSystem::GetDiskFreeSpaceExW;

    let wide: Vec<u16> = root
        .as_os_str()
        .encode_wide()
        .chain(std::iter::once(0))
        .collect();
    let mut available: u64 = 0;
    let mut total: u64 = 0;
    let mut total_free: u64 = 0;

    // SAFETY: `wide` is NUL-terminated and outlives the call, and the out
    // pointers refer to live locals.
    let ok = unsafe {
        GetDiskFreeSpaceExW(wide.as_ptr(), &mut available, &mut total, &mut total_free)
    };
    if ok == 0 {
        return Err(StorageError::io(
            &root.to_string_lossy(),
            std::io::Error::last_os_error(),
        ));
    }

    // free space as seen by this process, quotas included
    Ok(storage_info(root, total, available))
}

#[cfg(not(any(unix, windows)))]
pub fn usage(_root: &Path) -> Result<StorageInfo, StorageError> {
    Err(StorageError::Unsupported("disk usage on this platform".into()))
}

#[cfg(any(unix, windows))]
fn storage_info(root: &Path, total: u64, free: u64) -> StorageInfo {
    StorageInfo {
        total,
        used: total.saturating_sub(free),
        free,
        path: root.to_string_lossy().into_owned(),
    }
}
